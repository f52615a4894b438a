//! Growing structured transcript: think / tool-call / tool-result / text
//! parts with a tagged serialization that both streams and persists.
//!
//! Every mutating operation returns **the exact delta string** the caller
//! broadcasts over SSE — including part separators and think open/close
//! tags — so that concatenating all returned deltas of a run reproduces
//! [`ContentBuilder::to_string`] byte for byte. That identity is what lets
//! late subscribers rebuild the same view from the persisted row.
//!
//! Serialized grammar:
//!
//! ```text
//! transcript := (part ("\n\n" part)*)?
//! think      := "<think>\n" body "\n</think>"
//! tool_call  := "<tool-call name=\"" NAME "\" arguments='" ARGS "'>" body "</tool-call>"
//! tool_result:= "<tool-result name=\"" NAME "\" status=\"" STATUS "\">\n" body "\n</tool-result>"
//! text       := raw markdown
//! ```
//!
//! `ARGS` has single quotes escaped with a preceding backslash. Bodies are
//! raw; [`parse_transcript`] takes the first matching close tag.

/// Tool results longer than this are truncated before entering the transcript.
pub const TOOL_RESULT_MAX_CHARS: usize = 2000;

/// One transcript part, in build order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Think { body: String },
    ToolCall { name: String, args: String, body: String },
    ToolResult { name: String, status: String, body: String },
    Text { body: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Open {
    Think,
    ToolCall,
    Text,
}

fn escape_args(args: &str) -> String {
    args.replace('\'', "\\'")
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Stateful transcript accumulator.
#[derive(Default)]
pub struct ContentBuilder {
    parts: Vec<Part>,
    open: Option<Open>,
}

impl ContentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closing material for the currently open part, if any.
    fn close_open(&mut self, out: &mut String) {
        match self.open.take() {
            Some(Open::Think) => out.push_str("\n</think>"),
            Some(Open::ToolCall) => out.push_str("</tool-call>"),
            Some(Open::Text) | None => {}
        }
    }

    fn separator(&self) -> &'static str {
        if self.parts.is_empty() {
            ""
        } else {
            "\n\n"
        }
    }

    /// Appends model reasoning. Opens a new think part unless one is open.
    pub fn add_thinking(&mut self, delta: &str) -> String {
        if self.open == Some(Open::Think) {
            if let Some(Part::Think { body }) = self.parts.last_mut() {
                body.push_str(delta);
            }
            return delta.to_string();
        }
        let mut out = String::new();
        self.close_open(&mut out);
        out.push_str(self.separator());
        out.push_str("<think>\n");
        out.push_str(delta);
        self.parts.push(Part::Think { body: delta.to_string() });
        self.open = Some(Open::Think);
        out
    }

    /// Opens a tool-call part. `args` lands in the `arguments` attribute
    /// (single quotes escaped); streamed argument bytes follow via
    /// [`append_tool_args`](Self::append_tool_args) into the element body.
    pub fn start_tool_call(&mut self, name: &str, args: &str) -> String {
        let mut out = String::new();
        self.close_open(&mut out);
        out.push_str(self.separator());
        out.push_str(&format!(
            "<tool-call name=\"{}\" arguments='{}'>",
            name,
            escape_args(args)
        ));
        self.parts.push(Part::ToolCall {
            name: name.to_string(),
            args: args.to_string(),
            body: String::new(),
        });
        self.open = Some(Open::ToolCall);
        out
    }

    /// Appends raw argument bytes inside the open tool-call. A delta with no
    /// open tool-call is dropped (nothing to attach it to).
    pub fn append_tool_args(&mut self, delta: &str) -> String {
        if self.open != Some(Open::ToolCall) {
            return String::new();
        }
        if let Some(Part::ToolCall { body, .. }) = self.parts.last_mut() {
            body.push_str(delta);
        }
        delta.to_string()
    }

    /// Closes the open tool-call part.
    pub fn end_tool_call(&mut self) -> String {
        if self.open != Some(Open::ToolCall) {
            return String::new();
        }
        self.open = None;
        "</tool-call>".to_string()
    }

    /// Appends a complete tool-result part; `result` is truncated to
    /// [`TOOL_RESULT_MAX_CHARS`].
    pub fn add_tool_result(&mut self, name: &str, result: &str, status: &str) -> String {
        let mut out = String::new();
        self.close_open(&mut out);
        out.push_str(self.separator());
        let body = truncate_chars(result, TOOL_RESULT_MAX_CHARS).to_string();
        out.push_str(&format!(
            "<tool-result name=\"{name}\" status=\"{status}\">\n{body}\n</tool-result>"
        ));
        self.parts.push(Part::ToolResult {
            name: name.to_string(),
            status: status.to_string(),
            body,
        });
        out
    }

    /// Appends final reply text.
    pub fn add_text(&mut self, delta: &str) -> String {
        if self.open == Some(Open::Text) {
            if let Some(Part::Text { body }) = self.parts.last_mut() {
                body.push_str(delta);
            }
            return delta.to_string();
        }
        let mut out = String::new();
        self.close_open(&mut out);
        out.push_str(self.separator());
        out.push_str(delta);
        self.parts.push(Part::Text { body: delta.to_string() });
        self.open = Some(Open::Text);
        out
    }

    /// Closes any still-open part; the returned delta (possibly empty) must
    /// be broadcast like the others.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        self.close_open(&mut out);
        out
    }

    /// Whether anything has been accumulated.
    pub fn has_content(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Names of tools invoked, in order.
    pub fn tool_call_names(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// The canonical serialized transcript. After [`finish`](Self::finish)
    /// this equals the concatenation of every delta returned so far.
    pub fn to_string(&self) -> String {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Think { body } => format!("<think>\n{body}\n</think>"),
                Part::ToolCall { name, args, body } => format!(
                    "<tool-call name=\"{}\" arguments='{}'>{}</tool-call>",
                    name,
                    escape_args(args),
                    body
                ),
                Part::ToolResult { name, status, body } => format!(
                    "<tool-result name=\"{name}\" status=\"{status}\">\n{body}\n</tool-result>"
                ),
                Part::Text { body } => body.clone(),
            })
            .collect();
        rendered.join("\n\n")
    }

    /// Concatenation of text parts only (degenerate plain answer).
    pub fn text_only(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { body } => Some(body.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated {0} part")]
    Unterminated(&'static str),
    #[error("malformed tag at byte {0}")]
    BadTag(usize),
}

fn read_until<'a>(s: &'a str, pat: &str, kind: &'static str) -> Result<(&'a str, &'a str), ParseError> {
    match s.find(pat) {
        Some(i) => Ok((&s[..i], &s[i + pat.len()..])),
        None => Err(ParseError::Unterminated(kind)),
    }
}

/// Reads an `arguments='…'` value up to the first unescaped quote and
/// unescapes `\'`.
fn read_args(s: &str) -> Result<(String, &str), ParseError> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            let escaped = i > 0 && bytes[i - 1] == b'\\';
            if !escaped {
                return Ok((s[..i].replace("\\'", "'"), &s[i + 1..]));
            }
        }
        i += 1;
    }
    Err(ParseError::Unterminated("tool_call"))
}

/// Reconstructs the part sequence from a serialized transcript. Inverse of
/// [`ContentBuilder::to_string`] for transcripts whose bodies do not embed
/// a matching close tag.
pub fn parse_transcript(input: &str) -> Result<Vec<Part>, ParseError> {
    let mut parts = Vec::new();
    let mut rest = input;
    let total = input.len();
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix("<think>\n") {
            let (body, after) = read_until(r, "\n</think>", "think")?;
            parts.push(Part::Think { body: body.to_string() });
            rest = after;
        } else if let Some(r) = rest.strip_prefix("<tool-call name=\"") {
            let (name, r) = read_until(r, "\" arguments='", "tool_call")?;
            let (args, r) = read_args(r)?;
            let r = r
                .strip_prefix('>')
                .ok_or(ParseError::BadTag(total - r.len()))?;
            let (body, after) = read_until(r, "</tool-call>", "tool_call")?;
            parts.push(Part::ToolCall {
                name: name.to_string(),
                args,
                body: body.to_string(),
            });
            rest = after;
        } else if let Some(r) = rest.strip_prefix("<tool-result name=\"") {
            let (name, r) = read_until(r, "\" status=\"", "tool_result")?;
            let (status, r) = read_until(r, "\">\n", "tool_result")?;
            let (body, after) = read_until(r, "\n</tool-result>", "tool_result")?;
            parts.push(Part::ToolResult {
                name: name.to_string(),
                status: status.to_string(),
                body: body.to_string(),
            });
            rest = after;
        } else {
            // Text runs to the next part boundary (or the end).
            let boundary = ["\n\n<think>\n", "\n\n<tool-call name=\"", "\n\n<tool-result name=\""]
                .iter()
                .filter_map(|b| rest.find(b))
                .min();
            let (body, after) = match boundary {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            };
            parts.push(Part::Text { body: body.to_string() });
            rest = after;
        }
        // Inter-part separator.
        rest = rest.strip_prefix("\n\n").unwrap_or(rest);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives a representative interleaving and checks the byte identity
    /// between the delta stream and the persisted form.
    fn build_sample() -> (ContentBuilder, String) {
        let mut b = ContentBuilder::new();
        let mut wire = String::new();
        wire.push_str(&b.add_thinking("let me "));
        wire.push_str(&b.add_thinking("look this up"));
        wire.push_str(&b.start_tool_call("web_search", ""));
        wire.push_str(&b.append_tool_args("{\"query\":"));
        wire.push_str(&b.append_tool_args("\"cats\"}"));
        wire.push_str(&b.end_tool_call());
        wire.push_str(&b.add_tool_result("web_search", "1. cats are great", "success"));
        wire.push_str(&b.add_text("Cats are "));
        wire.push_str(&b.add_text("great."));
        wire.push_str(&b.finish());
        (b, wire)
    }

    #[test]
    fn delta_stream_equals_persisted_form() {
        let (b, wire) = build_sample();
        assert_eq!(wire, b.to_string());
    }

    #[test]
    fn serialized_shape() {
        let (b, _) = build_sample();
        let s = b.to_string();
        assert!(s.starts_with("<think>\nlet me look this up\n</think>\n\n"));
        assert!(s.contains(
            "<tool-call name=\"web_search\" arguments=''>{\"query\":\"cats\"}</tool-call>"
        ));
        assert!(s.contains(
            "<tool-result name=\"web_search\" status=\"success\">\n1. cats are great\n</tool-result>"
        ));
        assert!(s.ends_with("Cats are great."));
    }

    #[test]
    fn every_open_tag_is_closed() {
        let (b, _) = build_sample();
        let s = b.to_string();
        for tag in ["think", "tool-call", "tool-result"] {
            let opens = s.matches(&format!("<{tag}")).count();
            let closes = s.matches(&format!("</{tag}>")).count();
            assert_eq!(opens, closes, "unbalanced <{tag}>");
        }
    }

    #[test]
    fn parse_round_trip() {
        let (b, _) = build_sample();
        let parsed = parse_transcript(&b.to_string()).unwrap();
        assert_eq!(parsed, b.parts());
    }

    #[test]
    fn finish_closes_dangling_think() {
        let mut b = ContentBuilder::new();
        let mut wire = String::new();
        wire.push_str(&b.add_thinking("half a thought"));
        wire.push_str(&b.finish());
        assert_eq!(wire, "<think>\nhalf a thought\n</think>");
        assert_eq!(wire, b.to_string());
    }

    #[test]
    fn single_quotes_in_args_are_escaped() {
        let mut b = ContentBuilder::new();
        b.start_tool_call("t", "{'k': 'v'}");
        b.end_tool_call();
        let s = b.to_string();
        assert!(s.contains(r#"arguments='{\'k\': \'v\'}'"#));
        let parsed = parse_transcript(&s).unwrap();
        assert_eq!(
            parsed[0],
            Part::ToolCall { name: "t".into(), args: "{'k': 'v'}".into(), body: String::new() }
        );
    }

    #[test]
    fn tool_result_truncated() {
        let mut b = ContentBuilder::new();
        let long = "x".repeat(TOOL_RESULT_MAX_CHARS + 500);
        b.add_tool_result("t", &long, "success");
        match &b.parts()[0] {
            Part::ToolResult { body, .. } => assert_eq!(body.len(), TOOL_RESULT_MAX_CHARS),
            p => panic!("unexpected part {p:?}"),
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(TOOL_RESULT_MAX_CHARS + 10);
        let cut = truncate_chars(&long, TOOL_RESULT_MAX_CHARS);
        assert_eq!(cut.chars().count(), TOOL_RESULT_MAX_CHARS);
    }

    #[test]
    fn text_only_ignores_other_parts() {
        let (b, _) = build_sample();
        assert_eq!(b.text_only(), "Cats are great.");
    }

    #[test]
    fn text_between_tool_rounds() {
        let mut b = ContentBuilder::new();
        let mut wire = String::new();
        wire.push_str(&b.add_text("checking"));
        wire.push_str(&b.start_tool_call("t", "{}"));
        wire.push_str(&b.end_tool_call());
        wire.push_str(&b.add_tool_result("t", "ok", "success"));
        wire.push_str(&b.add_text("done"));
        wire.push_str(&b.finish());
        assert_eq!(wire, b.to_string());
        let parsed = parse_transcript(&b.to_string()).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[3], Part::Text { body: "done".into() });
    }

    #[test]
    fn args_delta_without_open_call_is_dropped() {
        let mut b = ContentBuilder::new();
        assert_eq!(b.append_tool_args("stray"), "");
        assert_eq!(b.end_tool_call(), "");
        assert!(!b.has_content());
    }

    #[test]
    fn bodies_may_contain_angle_brackets() {
        let mut b = ContentBuilder::new();
        b.add_tool_result("t", "a < b > c", "success");
        b.add_text("1 < 2");
        b.finish();
        let parsed = parse_transcript(&b.to_string()).unwrap();
        assert_eq!(parsed, b.parts());
    }

    #[test]
    fn parse_rejects_unterminated_parts() {
        assert_eq!(
            parse_transcript("<think>\nno close"),
            Err(ParseError::Unterminated("think"))
        );
        assert!(parse_transcript("<tool-call name=\"t\" arguments='{}'>x").is_err());
    }

    #[test]
    fn empty_transcript() {
        let b = ContentBuilder::new();
        assert_eq!(b.to_string(), "");
        assert_eq!(parse_transcript("").unwrap(), Vec::<Part>::new());
    }
}
