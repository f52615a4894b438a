//! Browser tools: `web_search`, `web_open`, `web_find` over an
//! Exa-compatible search backend.
//!
//! Pages live on a per-run stack ([`BrowserState`]); a search result page
//! registers numbered links that `web_open` resolves, so link ids from one
//! run can never leak into another. Views are windows of numbered lines.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{Tool, ToolContext, ToolError, ToolSpec};

/// Lines shown per page view.
const VIEW_LINES: usize = 50;
/// Wrap width applied to fetched page text.
const WRAP_WIDTH: usize = 100;
/// Search results are capped here regardless of the requested `topn`.
const TOPN_MAX: u64 = 10;
/// Match cap for `web_find`.
const FIND_MAX_MATCHES: usize = 20;

/// One fetched or synthesized page.
#[derive(Clone, Debug)]
pub struct Page {
    pub url: String,
    pub title: String,
    pub lines: Vec<String>,
    /// Link id → URL, populated by search result pages.
    pub links: HashMap<String, String>,
}

impl Page {
    pub fn new(url: String, title: String, text: &str, links: HashMap<String, String>) -> Self {
        Self { url, title, lines: wrap_lines(text, WRAP_WIDTH), links }
    }
}

fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.split('\n') {
        if line.chars().count() <= width {
            out.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out
}

fn domain_of(url: &str) -> &str {
    url.splitn(4, '/').nth(2).unwrap_or(url)
}

/// Per-run page stack. `cursor = -1` addresses the top.
#[derive(Default)]
pub struct BrowserState {
    pages: Vec<Page>,
}

impl BrowserState {
    /// Pushes a page; returns its cursor.
    pub fn add_page(&mut self, page: Page) -> usize {
        self.pages.push(page);
        self.pages.len() - 1
    }

    pub fn current_cursor(&self) -> Option<usize> {
        self.pages.len().checked_sub(1)
    }

    pub fn get(&self, cursor: i64) -> Option<(usize, &Page)> {
        let idx = if cursor < 0 {
            self.current_cursor()?
        } else {
            cursor as usize
        };
        self.pages.get(idx).map(|p| (idx, p))
    }
}

/// Windowed page rendering with absolute line numbers.
pub fn format_page_view(page: &Page, cursor: usize, start_line: usize, num_lines: i64) -> String {
    let total = page.lines.len();
    let want = if num_lines <= 0 { VIEW_LINES } else { num_lines as usize };
    let start = start_line.min(total.saturating_sub(1));
    let end = (start + want).min(total);

    let mut header = format!("[{cursor}] {}", page.title);
    if !page.url.is_empty() {
        header.push_str(&format!(" ({})", domain_of(&page.url)));
    }
    let scrollbar = format!(
        "**viewing lines [{start} - {}] of {}**",
        end.saturating_sub(1),
        total.saturating_sub(1)
    );
    let body: Vec<String> = page.lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("L{}: {}", start + i, line))
        .collect();
    format!("{header}\n{scrollbar}\n\n{}", body.join("\n"))
}

/// Exa-compatible search backend client.
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ToolError> {
        let res = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ToolError::Transport(format!("search API error {status}: {body}")));
        }
        res.json().await.map_err(|e| ToolError::Transport(e.to_string()))
    }

    pub async fn search(&self, query: &str, topn: u64) -> Result<Value, ToolError> {
        self.post(
            "/search",
            json!({
                "query": query,
                "numResults": topn.min(TOPN_MAX),
                "contents": {"text": true, "summary": true},
            }),
        )
        .await
    }

    /// Fetches page text; returns `(title, text)`.
    pub async fn contents(&self, url: &str) -> Result<(String, String), ToolError> {
        let out = self
            .post("/contents", json!({"urls": [url], "text": {"includeHtmlTags": false}}))
            .await?;
        let result = out
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| ToolError::Transport(format!("no content for {url}")))?;
        let title = result
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("Untitled")
            .to_string();
        let text = result
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((title, text))
    }
}

/// Builds the numbered results page for one search response.
fn results_page(query: &str, response: &Value) -> Page {
    let results = response
        .get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    let mut lines = vec![format!("Search results for: {query}"), "=".repeat(50), String::new()];
    let mut links = HashMap::new();
    for (i, r) in results.iter().enumerate() {
        let title = r.get("title").and_then(|t| t.as_str()).unwrap_or("(no title)");
        let url = r.get("url").and_then(|u| u.as_str()).unwrap_or("");
        lines.push(format!("[{i}] {title}"));
        lines.push(format!("  URL: {url}"));
        if let Some(summary) = r.get("summary").and_then(|s| s.as_str()) {
            let summary: String = summary.chars().take(200).collect();
            if !summary.is_empty() {
                lines.push(format!("  {}", summary.replace('\n', " ")));
            }
        }
        lines.push(String::new());
        links.insert(i.to_string(), url.to_string());
    }
    Page::new(
        format!("search://{}", query.replace(' ', "+")),
        format!("Search: {query}"),
        &lines.join("\n"),
        links,
    )
}

pub struct WebSearchTool {
    client: std::sync::Arc<SearchClient>,
}

impl WebSearchTool {
    pub fn new(client: std::sync::Arc<SearchClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".into(),
            description: "Search the web. Returns a numbered result page; open a result with \
                 web_open using its number."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query."},
                    "topn": {"type": "integer", "description": "Result count (max 10).", "default": 10}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing query".into()))?;
        let topn = args.get("topn").and_then(|v| v.as_u64()).unwrap_or(TOPN_MAX);

        let response = self.client.search(query, topn).await?;
        let page = results_page(query, &response);

        let mut state = ctx.browser.lock().await;
        let cursor = state.add_page(page);
        let (_, page) = state.get(cursor as i64).expect("page just pushed");
        Ok(format_page_view(page, cursor, 0, -1))
    }
}

pub struct WebOpenTool {
    client: std::sync::Arc<SearchClient>,
}

impl WebOpenTool {
    pub fn new(client: std::sync::Arc<SearchClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebOpenTool {
    fn name(&self) -> &str {
        "web_open"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_open".into(),
            description: "Open a numbered link from the current page, a raw URL, or scroll the \
                 current page by omitting id_or_url."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id_or_url": {
                        "type": ["integer", "string"],
                        "description": "Link number from a search page, or a full URL."
                    },
                    "cursor": {"type": "integer", "description": "Page cursor, -1 = current.", "default": -1},
                    "loc": {"type": "integer", "description": "First line to show.", "default": 0},
                    "num_lines": {"type": "integer", "description": "Lines to show, -1 = default.", "default": -1}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let cursor = args.get("cursor").and_then(|v| v.as_i64()).unwrap_or(-1);
        let loc = args.get("loc").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let num_lines = args.get("num_lines").and_then(|v| v.as_i64()).unwrap_or(-1);

        // Resolve the target: a raw URL, a numbered link of the current
        // page, or (absent/negative) scrolling in place.
        enum Target {
            Url(String),
            Link(String),
            Scroll,
        }
        let target = match args.get("id_or_url") {
            Some(Value::String(s)) if s.starts_with("http") => Target::Url(s.clone()),
            Some(Value::String(s)) if s.parse::<i64>().is_ok_and(|i| i >= 0) => {
                Target::Link(s.clone())
            }
            Some(Value::Number(n)) if n.as_i64().is_some_and(|i| i >= 0) => {
                Target::Link(n.as_i64().unwrap_or_default().to_string())
            }
            None | Some(Value::Number(_)) => Target::Scroll,
            Some(other) => {
                return Err(ToolError::InvalidInput(format!("invalid id_or_url: {other}")));
            }
        };

        let url = match target {
            Target::Url(url) => url,
            Target::Link(id) => {
                let state = ctx.browser.lock().await;
                let (_, page) = state.get(cursor).ok_or_else(|| {
                    ToolError::InvalidInput(
                        "no open page; call web_search first or pass a full URL".into(),
                    )
                })?;
                page.links.get(&id).cloned().ok_or_else(|| {
                    let mut ids: Vec<&String> = page.links.keys().collect();
                    ids.sort();
                    ToolError::InvalidInput(format!(
                        "invalid link id {id}; valid ids: [{}]",
                        ids.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ))
                })?
            }
            Target::Scroll => {
                let state = ctx.browser.lock().await;
                let (idx, page) = state
                    .get(cursor)
                    .ok_or_else(|| ToolError::InvalidInput("no page to scroll".into()))?;
                return Ok(format_page_view(page, idx, loc, num_lines));
            }
        };

        let (title, text) = self.client.contents(&url).await?;
        let page = Page::new(url, title, &text, HashMap::new());
        let mut state = ctx.browser.lock().await;
        let idx = state.add_page(page);
        let (_, page) = state.get(idx as i64).expect("page just pushed");
        Ok(format_page_view(page, idx, loc, num_lines))
    }
}

pub struct WebFindTool;

#[async_trait]
impl Tool for WebFindTool {
    fn name(&self) -> &str {
        "web_find"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_find".into(),
            description: "Find text in the current page (case-insensitive substring).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Text to look for."},
                    "cursor": {"type": "integer", "description": "Page cursor, -1 = current.", "default": -1}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing pattern".into()))?;
        let cursor = args.get("cursor").and_then(|v| v.as_i64()).unwrap_or(-1);

        let mut state = ctx.browser.lock().await;
        let (_, page) = state
            .get(cursor)
            .ok_or_else(|| ToolError::InvalidInput("no page to search".into()))?;

        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();
        for (i, line) in page.lines.iter().enumerate() {
            if line.to_lowercase().contains(&needle) {
                let start = i.saturating_sub(1);
                let end = (i + 2).min(page.lines.len());
                let context: Vec<String> = (start..end)
                    .map(|j| format!("L{j}: {}", page.lines[j]))
                    .collect();
                matches.push((i, context.join("\n")));
                if matches.len() >= FIND_MAX_MATCHES {
                    break;
                }
            }
        }

        if matches.is_empty() {
            return Ok(format!("No matches found for: `{pattern}`"));
        }

        let mut lines = vec![
            format!("Find results for `{pattern}` in `{}`", page.title),
            "=".repeat(50),
            String::new(),
        ];
        for (n, (line_no, context)) in matches.iter().enumerate() {
            lines.push(format!("[{n}] match at L{line_no}"));
            lines.push(context.clone());
            lines.push(String::new());
        }
        let source_url = page.url.clone();
        let title = format!("Find: {pattern} in {}", page.title);
        let result_page = Page::new(
            format!("{source_url}#find={}", pattern.replace(' ', "+")),
            title,
            &lines.join("\n"),
            HashMap::new(),
        );
        let idx = state.add_page(result_page);
        let (_, page) = state.get(idx as i64).expect("page just pushed");
        Ok(format_page_view(page, idx, 0, -1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;

    fn sample_results() -> Value {
        json!({
            "results": [
                {"title": "Cats", "url": "https://cats.example/a", "summary": "All about cats"},
                {"title": "More cats", "url": "https://cats.example/b", "summary": "Even more"}
            ]
        })
    }

    #[test]
    fn results_page_numbers_links() {
        let page = results_page("cats", &sample_results());
        assert_eq!(page.links.get("0").map(String::as_str), Some("https://cats.example/a"));
        assert_eq!(page.links.get("1").map(String::as_str), Some("https://cats.example/b"));
        assert!(page.lines.iter().any(|l| l.contains("[0] Cats")));
    }

    #[test]
    fn page_view_windows_and_numbers_lines() {
        let text: String = (0..80).map(|i| format!("line {i}\n")).collect();
        let page = Page::new("https://x.example/p".into(), "T".into(), &text, HashMap::new());
        let view = format_page_view(&page, 0, 0, -1);
        assert!(view.starts_with("[0] T (x.example)"));
        assert!(view.contains("**viewing lines [0 - 49] of 80**"));
        assert!(view.contains("L0: line 0"));
        assert!(view.contains("L49: line 49"));
        assert!(!view.contains("L50:"));

        let tail = format_page_view(&page, 0, 60, 10);
        assert!(tail.contains("L60: line 60"));
        assert!(tail.contains("**viewing lines [60 - 69] of 80**"));
    }

    #[test]
    fn wrap_long_lines() {
        let long = "word ".repeat(60);
        let lines = wrap_lines(&long, 100);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= 100));
    }

    #[test]
    fn browser_state_cursor_semantics() {
        let mut state = BrowserState::default();
        assert!(state.get(-1).is_none());
        let a = state.add_page(Page::new("u1".into(), "A".into(), "x", HashMap::new()));
        let b = state.add_page(Page::new("u2".into(), "B".into(), "y", HashMap::new()));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(state.get(-1).unwrap().1.title, "B");
        assert_eq!(state.get(0).unwrap().1.title, "A");
        assert!(state.get(5).is_none());
    }

    #[tokio::test]
    async fn web_find_matches_with_context() {
        let ctx = test_context();
        {
            let mut state = ctx.browser.lock().await;
            state.add_page(Page::new(
                "https://x.example".into(),
                "Doc".into(),
                "alpha\nBravo Target here\ncharlie",
                HashMap::new(),
            ));
        }
        let out = WebFindTool
            .call(json!({"pattern": "target"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("match at L1"));
        assert!(out.contains("L0: alpha"));
        assert!(out.contains("L2: charlie"));
    }

    #[tokio::test]
    async fn web_find_without_page_is_invalid() {
        let ctx = test_context();
        let err = WebFindTool.call(json!({"pattern": "x"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn web_open_scrolls_current_page_without_fetch() {
        let ctx = test_context();
        {
            let mut state = ctx.browser.lock().await;
            let text: String = (0..30).map(|i| format!("row {i}\n")).collect();
            state.add_page(Page::new("https://x.example".into(), "Doc".into(), &text, HashMap::new()));
        }
        let tool = WebOpenTool::new(std::sync::Arc::new(SearchClient::new("http://unused", "k")));
        let out = tool.call(json!({"loc": 10, "num_lines": 5}), &ctx).await.unwrap();
        assert!(out.contains("L10: row 10"));
        assert!(out.contains("L14: row 14"));
        assert!(!out.contains("L15:"));
    }

    #[tokio::test]
    async fn web_open_rejects_unknown_link_id() {
        let ctx = test_context();
        {
            let mut state = ctx.browser.lock().await;
            state.add_page(results_page("cats", &sample_results()));
        }
        let tool = WebOpenTool::new(std::sync::Arc::new(SearchClient::new("http://unused", "k")));
        let err = tool.call(json!({"id_or_url": 7}), &ctx).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid link id 7"));
        assert!(msg.contains("[0, 1]"));
    }
}
