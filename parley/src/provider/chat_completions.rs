//! OpenAI-compatible streaming chat-completions client.
//!
//! The typed SDK surface is avoided on purpose: reasoning deltas arrive in
//! provider-specific fields (`reasoning`, `reasoning_content`) that a fixed
//! schema would drop, so the SSE body is decoded by hand — `data:` lines
//! into chunk DTOs, `[DONE]` as the end sentinel. HTTP chunk boundaries can
//! split lines anywhere; the decoder buffers partial lines across feeds.

use futures::StreamExt;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};

use super::{
    FinishReason, ModelClient, ProviderError, ProviderEvent, ProviderStream, TurnRequest,
};
use async_trait::async_trait;

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatCompletionsClient {
    /// `base_url` up to the API root, e.g. `https://openrouter.ai/api/v1`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn stream_turn(&self, request: TurnRequest) -> Result<ProviderStream, ProviderError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(request.tools.clone());
        }
        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = serde_json::Value::String(choice.clone());
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        struct State {
            body: std::pin::Pin<
                Box<dyn futures::Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>,
            >,
            decoder: SseDecoder,
            queue: VecDeque<Result<ProviderEvent, ProviderError>>,
            exhausted: bool,
        }

        let state = State {
            body: Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))),
            decoder: SseDecoder::default(),
            queue: VecDeque::new(),
            exhausted: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(ev) = st.queue.pop_front() {
                    return Some((ev, st));
                }
                if st.exhausted {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(bytes)) => st.decoder.feed(&bytes, &mut st.queue),
                    Some(Err(e)) => {
                        st.exhausted = true;
                        st.queue.push_back(Err(ProviderError::Http(e)));
                    }
                    None => {
                        st.exhausted = true;
                        st.decoder.close(&mut st.queue);
                    }
                }
            }
        })))
    }
}

#[derive(Deserialize)]
struct ChunkDto {
    #[serde(default)]
    choices: Vec<ChoiceDto>,
    #[serde(default)]
    usage: Option<UsageDto>,
}

#[derive(Deserialize)]
struct ChoiceDto {
    #[serde(default)]
    delta: DeltaDto,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct DeltaDto {
    #[serde(default)]
    content: Option<String>,
    /// OpenRouter-style reasoning delta.
    #[serde(default)]
    reasoning: Option<String>,
    /// DeepSeek-style reasoning delta.
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning_summary: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDeltaDto>>,
}

#[derive(Deserialize)]
struct ToolCallDeltaDto {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDeltaDto>,
}

#[derive(Deserialize)]
struct FunctionDeltaDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
struct UsageDto {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Stateful `data:` line decoder. Tracks which tool-call indices have been
/// opened so name chunks map to `ToolCallStart` exactly once, holds the
/// finish reason until the `[DONE]` sentinel, and treats a stream that
/// ends without `[DONE]` as aborted.
#[derive(Default)]
struct SseDecoder {
    buf: String,
    finish_reason: Option<String>,
    usage: Option<UsageDto>,
    started_calls: HashSet<u32>,
    done: bool,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<Result<ProviderEvent, ProviderError>>) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            self.line(line.trim_end(), out);
        }
    }

    fn line(&mut self, line: &str, out: &mut VecDeque<Result<ProviderEvent, ProviderError>>) {
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            if let Some(u) = self.usage.take() {
                out.push_back(Ok(ProviderEvent::Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                }));
            }
            let finish_reason = self
                .finish_reason
                .take()
                .map(|r| FinishReason::from_wire(&r))
                .unwrap_or(FinishReason::Stop);
            out.push_back(Ok(ProviderEvent::TurnEnd { finish_reason }));
            return;
        }
        let chunk: ChunkDto = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                out.push_back(Err(ProviderError::Decode(e.to_string())));
                return;
            }
        };
        if let Some(u) = chunk.usage {
            self.usage = Some(u);
        }
        for choice in chunk.choices {
            if let Some(r) = choice.finish_reason {
                self.finish_reason = Some(r);
            }
            let delta = choice.delta;
            if let Some(r) = delta.reasoning.or(delta.reasoning_content) {
                if !r.is_empty() {
                    out.push_back(Ok(ProviderEvent::ReasoningDelta(r)));
                }
            }
            if let Some(s) = delta.reasoning_summary {
                if !s.is_empty() {
                    out.push_back(Ok(ProviderEvent::ReasoningSummaryDelta(s)));
                }
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                if let Some(name) = name {
                    if self.started_calls.insert(tc.index) {
                        out.push_back(Ok(ProviderEvent::ToolCallStart {
                            index: tc.index,
                            id: tc.id.unwrap_or_default(),
                            name,
                        }));
                    }
                }
                if let Some(args) = arguments {
                    if !args.is_empty() {
                        out.push_back(Ok(ProviderEvent::ToolCallArgsDelta {
                            index: tc.index,
                            delta: args,
                        }));
                    }
                }
            }
            if let Some(c) = delta.content {
                if !c.is_empty() {
                    out.push_back(Ok(ProviderEvent::TextDelta(c)));
                }
            }
        }
    }

    fn close(&mut self, out: &mut VecDeque<Result<ProviderEvent, ProviderError>>) {
        if !self.done {
            out.push_back(Err(ProviderError::Aborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn decode(frames: &[&str]) -> Vec<Result<ProviderEvent, ProviderError>> {
        let mut decoder = SseDecoder::default();
        let mut out = VecDeque::new();
        for f in frames {
            decoder.feed(f.as_bytes(), &mut out);
        }
        decoder.close(&mut out);
        out.into_iter().collect()
    }

    #[test]
    fn text_and_reasoning_deltas_in_order() {
        let events = decode(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning\":\"hmm\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: [DONE]\n",
        ]);
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                ProviderEvent::ReasoningDelta("hmm".into()),
                ProviderEvent::TextDelta("hi".into()),
                ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop },
            ]
        );
    }

    #[test]
    fn tool_call_start_once_then_arg_deltas() {
        let events = decode(&[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"web_search\",\"arguments\":\"{\\\"q\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\":1}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
            "data: [DONE]\n",
        ]);
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                ProviderEvent::ToolCallStart { index: 0, id: "call_1".into(), name: "web_search".into() },
                ProviderEvent::ToolCallArgsDelta { index: 0, delta: "{\"q".into() },
                ProviderEvent::ToolCallArgsDelta { index: 0, delta: "\":1}".into() },
                ProviderEvent::TurnEnd { finish_reason: FinishReason::ToolCalls },
            ]
        );
    }

    #[test]
    fn lines_split_across_feeds_are_reassembled() {
        let events = decode(&[
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"ab\"}}]}\ndata: [DO",
            "NE]\n",
        ]);
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events[0], ProviderEvent::TextDelta("ab".into()));
        assert!(matches!(events[1], ProviderEvent::TurnEnd { .. }));
    }

    #[test]
    fn usage_is_emitted_before_turn_end() {
        let events = decode(&[
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":5,\"total_tokens\":8}}\n",
            "data: [DONE]\n",
        ]);
        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                ProviderEvent::Usage { prompt_tokens: 3, completion_tokens: 5, total_tokens: 8 },
                ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop },
            ]
        );
    }

    #[test]
    fn missing_done_sentinel_is_an_abort() {
        let events = decode(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]);
        assert!(matches!(events[0], Ok(ProviderEvent::TextDelta(_))));
        assert!(matches!(events[1], Err(ProviderError::Aborted)));
    }

    #[tokio::test]
    async fn full_round_trip_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Drain the request head; the client sends a complete body first.
            let mut buf = [0u8; 4096];
            use tokio::io::AsyncReadExt;
            let _ = stream.read(&mut buf).await.unwrap();
            let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"}}]}\n\n\
                        data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
                        data: [DONE]\n\n";
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(resp.as_bytes()).await.unwrap();
        });

        let client = ChatCompletionsClient::new(format!("http://{addr}"), "test-key");
        let request = TurnRequest {
            model: "test-model".into(),
            messages: vec![super::super::ChatMessage::user("hi")],
            tools: vec![],
            tool_choice: None,
        };
        let events: Vec<_> = client
            .stream_turn(request)
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events[0], ProviderEvent::TextDelta("hello".into()));
        assert_eq!(
            events[1],
            ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop }
        );
        server.await.unwrap();
    }
}
