//! Scripted provider for tests: each `stream_turn` call replays the next
//! scripted turn and records the request for assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{
    FinishReason, ModelClient, ProviderError, ProviderEvent, ProviderStream, TurnRequest,
};

#[derive(Default)]
pub struct MockModel {
    turns: Mutex<VecDeque<Vec<ProviderEvent>>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl MockModel {
    /// Replays `turns` in order; calls beyond the script yield a plain
    /// one-line answer.
    pub fn new(turns: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a single turn answering with `text`.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![vec![
            ProviderEvent::TextDelta(text.to_string()),
            ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop },
        ]])
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn stream_turn(&self, request: TurnRequest) -> Result<ProviderStream, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let events = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                vec![
                    ProviderEvent::TextDelta("ok".to_string()),
                    ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop },
                ]
            });
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_turns_in_order_then_falls_back() {
        let mock = MockModel::new(vec![vec![
            ProviderEvent::TextDelta("scripted".into()),
            ProviderEvent::TurnEnd { finish_reason: FinishReason::Stop },
        ]]);
        let req = TurnRequest {
            model: "m".into(),
            messages: vec![],
            tools: vec![],
            tool_choice: None,
        };

        let first: Vec<_> = mock.stream_turn(req.clone()).await.unwrap().collect().await;
        assert!(matches!(first[0], Ok(ProviderEvent::TextDelta(ref t)) if t == "scripted"));

        let second: Vec<_> = mock.stream_turn(req).await.unwrap().collect().await;
        assert!(matches!(second[0], Ok(ProviderEvent::TextDelta(ref t)) if t == "ok"));
        assert_eq!(mock.requests().len(), 2);
    }
}
