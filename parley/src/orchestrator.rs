//! Drives one run: context preparation, the provider event loop, tool
//! rounds with approval gates, and finalization through the dual writer.
//!
//! Every provider delta flows through the content builder and out on the
//! session topic as a `content_delta`; the concatenation of those deltas is
//! byte-identical to the persisted transcript. `agent_done` is published
//! strictly after the database row is committed. The cancellation token is
//! checked after every provider event and between tool calls.
//!
//! Within one assistant turn only the first tool call streams its argument
//! bytes live; further calls of the same turn are buffered and enter the
//! transcript complete, so a `tool_call` part is always immediately
//! followed by its `tool_result`.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use session_event::{PartType, SessionEvent};

use crate::approval::{ApprovalStatus, ApprovalStore};
use crate::bus::EventBus;
use crate::cache::{keys, Cache};
use crate::content::ContentBuilder;
use crate::context::{format_line, ContextMessage, ContextStore};
use crate::prompts::build_system_prompt;
use crate::provider::{
    ChatMessage, FinishReason, FunctionCall, ModelClient, ProviderError, ProviderEvent,
    ToolCallRecord, TurnRequest,
};
use crate::registry::Run;
use crate::store::{AgentRow, MessageStore};
use crate::tools::{browser::BrowserState, Tool, ToolContext, ToolRegistry};
use crate::writer::{AgentMessage, DualWriter, WriterError};

/// Stub results fed back to the model when an approval fails.
const DENIED_RESULT: &str = "user denied";
const EXPIRED_RESULT: &str = "approval expired";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("persisting final message: {0}")]
    Writer(#[from] WriterError),
    #[error("run cancelled")]
    Cancelled,
}

/// Terminal record of a run.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Done { message_id: String, final_content: String },
    Cancelled,
    Error { message_id: String, error: String },
}

#[derive(Debug)]
struct PendingCall {
    index: u32,
    id: String,
    name: String,
    args: String,
    /// Whether this call streamed its opening tag live.
    streamed: bool,
}

pub struct Orchestrator {
    bus: EventBus,
    context: Arc<ContextStore>,
    writer: Arc<DualWriter>,
    approvals: ApprovalStore,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn Cache>,
    max_tool_rounds: usize,
    run_ttl: std::time::Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        context: Arc<ContextStore>,
        writer: Arc<DualWriter>,
        approvals: ApprovalStore,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn MessageStore>,
        cache: Arc<dyn Cache>,
        max_tool_rounds: usize,
        run_ttl: std::time::Duration,
    ) -> Self {
        Self { bus, context, writer, approvals, tools, store, cache, max_tool_rounds, run_ttl }
    }

    /// Best-effort run-status record under `agent:task:{run_id}`; consumed
    /// by operators inspecting a live run, never load-bearing.
    async fn record_status(&self, run_id: &str, message_id: &str, status: &str) {
        let fields = vec![
            ("status".to_string(), status.to_string()),
            ("message_id".to_string(), message_id.to_string()),
        ];
        if let Err(e) = self
            .cache
            .hset(&keys::run(run_id), &fields, Some(self.run_ttl))
            .await
        {
            tracing::warn!(run_id, error = %e, "run status cache write failed");
        }
    }

    /// Runs one agent execution to its terminal event. Never panics the
    /// caller: every failure is translated into `agent_error` (or
    /// `cancelled`) on the session topic.
    pub async fn execute(
        &self,
        run: &Run,
        agent: &AgentRow,
        model: Arc<dyn ModelClient>,
        cancel: CancellationToken,
        history: Option<Vec<ContextMessage>>,
    ) -> RunOutcome {
        let message_id = uuid::Uuid::new_v4().to_string();
        let topic = run.chat_session_id.clone();

        self.bus.publish(
            &topic,
            &SessionEvent::AgentStart {
                message_id: message_id.clone(),
                run_id: run.id.clone(),
                session_id: topic.clone(),
                agent_user_id: agent.user_id.clone(),
                agent_nickname: agent.nickname.clone(),
            },
        );
        tracing::info!(run_id = %run.id, agent = %agent.user_id, %message_id, "run started");
        self.record_status(&run.id, &message_id, "running").await;

        let outcome = match self
            .drive(run, agent, model, &cancel, &message_id, history)
            .await
        {
            Ok(builder) => self.finalize(run, agent, &message_id, builder).await,
            Err(RunError::Cancelled) => {
                tracing::info!(run_id = %run.id, "run cancelled");
                self.bus
                    .publish(&topic, &SessionEvent::Cancelled { run_id: run.id.clone() });
                RunOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(run_id = %run.id, error = %e, "run failed");
                let error = e.to_string();
                self.bus.publish(
                    &topic,
                    &SessionEvent::AgentError { message_id: message_id.clone(), error: error.clone() },
                );
                RunOutcome::Error { message_id: message_id.clone(), error }
            }
        };
        let status = match &outcome {
            RunOutcome::Done { .. } => "done",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Error { .. } => "error",
        };
        self.record_status(&run.id, &message_id, status).await;
        outcome
    }

    async fn finalize(
        &self,
        run: &Run,
        agent: &AgentRow,
        message_id: &str,
        mut builder: ContentBuilder,
    ) -> RunOutcome {
        let topic = &run.chat_session_id;
        let closing = builder.finish();
        if !closing.is_empty() {
            let part_type = if closing.starts_with("\n</think>") {
                PartType::Think
            } else {
                PartType::Text
            };
            self.publish_delta(topic, message_id, &closing, part_type);
        }

        let final_content = builder.to_string();
        let metadata = serde_json::json!({
            "model": agent.model,
            "provider": agent.provider,
            "tool_calls": builder.tool_call_names(),
            "run_id": run.id,
        });
        let msg = AgentMessage::new(
            message_id.to_string(),
            run.chat_session_id.clone(),
            agent.user_id.clone(),
            final_content.clone(),
            metadata,
        );

        // wait_db: late subscribers that fall back to a database read must
        // find the row before they see agent_done.
        if let Err(e) = self
            .writer
            .write_agent_message(&msg, &agent.nickname, true)
            .await
        {
            tracing::error!(run_id = %run.id, error = %e, "final message not persisted");
            let error = e.to_string();
            self.bus.publish(
                topic,
                &SessionEvent::AgentError {
                    message_id: message_id.to_string(),
                    error: error.clone(),
                },
            );
            return RunOutcome::Error { message_id: message_id.to_string(), error };
        }

        self.bus.publish(
            topic,
            &SessionEvent::AgentDone {
                message_id: message_id.to_string(),
                run_id: run.id.clone(),
                session_id: run.chat_session_id.clone(),
                agent_user_id: agent.user_id.clone(),
                final_content: final_content.clone(),
            },
        );
        tracing::info!(run_id = %run.id, %message_id, "run done");
        RunOutcome::Done { message_id: message_id.to_string(), final_content }
    }

    async fn drive(
        &self,
        run: &Run,
        agent: &AgentRow,
        model: Arc<dyn ModelClient>,
        cancel: &CancellationToken,
        message_id: &str,
        history: Option<Vec<ContextMessage>>,
    ) -> Result<ContentBuilder, RunError> {
        let topic = &run.chat_session_id;

        // Prepare: summarized context spliced after the preamble.
        let context_messages = match history {
            Some(h) => h,
            None => self
                .context
                .get_context(&run.chat_session_id, self.context.window())
                .await
                .unwrap_or_default(),
        };
        let context_lines: Vec<String> = context_messages
            .iter()
            .map(|m| format_line(m, true))
            .collect();
        let system_prompt = build_system_prompt(agent, &context_lines);

        let tool_ctx = ToolContext {
            run_id: run.id.clone(),
            user_id: run.user_id.clone(),
            session_id: run.chat_session_id.clone(),
            browser: Arc::new(tokio::sync::Mutex::new(BrowserState::default())),
            context: self.context.clone(),
            store: self.store.clone(),
        };

        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(run.input.clone()),
        ];
        let tool_defs = self.tools.provider_defs();
        let mut builder = ContentBuilder::new();

        for round in 0..=self.max_tool_rounds {
            let final_round = round == self.max_tool_rounds;
            let request = TurnRequest {
                model: agent.model.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                tool_choice: final_round.then(|| "none".to_string()),
            };
            let mut stream = model.stream_turn(request).await?;

            let mut turn_text = String::new();
            let mut pending: Vec<PendingCall> = Vec::new();
            let mut active_call: Option<u32> = None;
            let mut finish = FinishReason::Stop;

            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                match event? {
                    ProviderEvent::ReasoningDelta(d) => {
                        if active_call.is_none() {
                            let delta = builder.add_thinking(&d);
                            self.publish_delta(topic, message_id, &delta, PartType::Think);
                        }
                    }
                    ProviderEvent::ReasoningSummaryDelta(d) => {
                        self.bus.publish(
                            topic,
                            &SessionEvent::ReasoningSummary { content: d, delta: true },
                        );
                    }
                    ProviderEvent::TextDelta(d) => {
                        if active_call.is_none() {
                            turn_text.push_str(&d);
                            let delta = builder.add_text(&d);
                            self.publish_delta(topic, message_id, &delta, PartType::Text);
                        }
                    }
                    ProviderEvent::ToolCallStart { index, id, name } => {
                        let streamed = active_call.is_none();
                        if streamed {
                            active_call = Some(index);
                            let delta = builder.start_tool_call(&name, "");
                            self.publish_delta(topic, message_id, &delta, PartType::ToolCall);
                        }
                        pending.push(PendingCall { index, id, name, args: String::new(), streamed });
                    }
                    ProviderEvent::ToolCallArgsDelta { index, delta } => {
                        if let Some(call) = pending.iter_mut().find(|c| c.index == index) {
                            call.args.push_str(&delta);
                            if active_call == Some(index) {
                                let delta = builder.append_tool_args(&delta);
                                self.publish_delta(topic, message_id, &delta, PartType::ToolArgs);
                            }
                        }
                    }
                    ProviderEvent::Usage { total_tokens, .. } => {
                        tracing::debug!(run_id = %run.id, total_tokens, "provider usage");
                    }
                    ProviderEvent::TurnEnd { finish_reason } => {
                        finish = finish_reason;
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            if finish != FinishReason::ToolCalls || pending.is_empty() || final_round {
                if !pending.is_empty() {
                    tracing::warn!(run_id = %run.id, "tool calls after the final round were not executed");
                    // Keep the transcript well-formed: close the call that
                    // streamed its opening tag and record that nothing ran.
                    if let Some(call) = pending.iter().find(|c| c.streamed) {
                        let delta = builder.end_tool_call();
                        self.publish_delta(topic, message_id, &delta, PartType::ToolResult);
                        let delta = builder.add_tool_result(&call.name, "not executed", "error");
                        self.publish_delta(topic, message_id, &delta, PartType::ToolResult);
                    }
                }
                return Ok(builder);
            }

            // Execution phase: calls run in issue order; the model sees
            // every result on the next turn.
            let records: Vec<ToolCallRecord> = pending
                .iter()
                .map(|c| ToolCallRecord {
                    id: c.id.clone(),
                    kind: "function".to_string(),
                    function: FunctionCall { name: c.name.clone(), arguments: c.args.clone() },
                })
                .collect();
            messages.push(ChatMessage::assistant(
                (!turn_text.is_empty()).then(|| turn_text.clone()),
                records,
            ));

            for call in &pending {
                if cancel.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                if call.streamed {
                    let delta = builder.end_tool_call();
                    self.publish_delta(topic, message_id, &delta, PartType::ToolResult);
                } else {
                    // Buffered call: enters the transcript complete, args
                    // in the attribute.
                    let delta = builder.start_tool_call(&call.name, &call.args);
                    self.publish_delta(topic, message_id, &delta, PartType::ToolCall);
                    let delta = builder.end_tool_call();
                    self.publish_delta(topic, message_id, &delta, PartType::ToolResult);
                }

                let (result, status) = self.run_tool(run, call, &tool_ctx).await;
                let delta = builder.add_tool_result(&call.name, &result, status);
                self.publish_delta(topic, message_id, &delta, PartType::ToolResult);
                messages.push(ChatMessage::tool(call.id.clone(), result));
            }
        }
        Ok(builder)
    }

    /// Executes one tool call, gated on approval where the tool demands it.
    /// Never fails the run: every failure mode becomes an error-status
    /// result the model can observe.
    async fn run_tool(&self, run: &Run, call: &PendingCall, ctx: &ToolContext) -> (String, &'static str) {
        let Some(tool) = self.tools.get(&call.name) else {
            return (format!("unknown tool: {}", call.name), "error");
        };

        let args: Value = if call.args.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.args) {
                Ok(v) => v,
                Err(e) => return (format!("invalid tool arguments: {e}"), "error"),
            }
        };

        if tool.requires_approval() {
            let request = self.approvals.create(
                &run.id,
                &run.chat_session_id,
                &run.user_id,
                &call.name,
                args.clone(),
                tool.approval_reason(&args),
            );
            match self.approvals.wait(&request.id).await {
                ApprovalStatus::Approved => {}
                ApprovalStatus::Rejected => return (DENIED_RESULT.to_string(), "error"),
                ApprovalStatus::Expired | ApprovalStatus::Pending => {
                    return (EXPIRED_RESULT.to_string(), "error")
                }
            }
        }

        match tool.call(args, ctx).await {
            Ok(result) => (result, "success"),
            Err(e) => (e.to_string(), "error"),
        }
    }

    fn publish_delta(&self, topic: &str, message_id: &str, delta: &str, part_type: PartType) {
        if delta.is_empty() {
            return;
        }
        self.bus.publish(
            topic,
            &SessionEvent::ContentDelta {
                message_id: message_id.to_string(),
                delta: delta.to_string(),
                part_type,
            },
        );
    }
}
