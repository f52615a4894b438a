//! Function-callable capabilities exposed to the model.
//!
//! Each tool has a name, a JSON-schema spec, an approval flag, and an async
//! executor returning a display string. Ambient run/user/session ids travel
//! in an explicit [`ToolContext`] set once at orchestrator entry — tools
//! never reach for globals. Browser state lives on the context because it
//! is per-run; tool structs themselves are shared across runs.

pub mod browser;
pub mod chat;
pub mod sandbox;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ContextStore;
use crate::store::MessageStore;
use browser::BrowserState;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("execution: {0}")]
    Execution(String),
}

/// Tool description advertised to the model.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    /// Chat-completions function-tool wire shape.
    pub fn to_provider_def(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Request-scoped context for one run.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Per-run page stack; never shared across runs.
    pub browser: Arc<tokio::sync::Mutex<BrowserState>>,
    pub context: Arc<ContextStore>,
    pub store: Arc<dyn MessageStore>,
}

impl ToolContext {
    /// Resolves a model-supplied session id; placeholders ("current",
    /// empty, …) fall back to the ambient session.
    pub fn resolve_session_id(&self, raw: Option<&str>) -> String {
        const PLACEHOLDERS: [&str; 3] = ["current", "this session", "current session"];
        match raw.map(str::trim) {
            None | Some("") => self.session_id.clone(),
            Some(s) if PLACEHOLDERS.contains(&s.to_lowercase().as_str()) => {
                self.session_id.clone()
            }
            Some(s) => s.to_string(),
        }
    }
}

/// A single tool callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Gated tools suspend on a pending approval before executing.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Human-readable reason shown with the approval request.
    fn approval_reason(&self, _args: &Value) -> String {
        format!("Tool '{}' requires your approval", self.name())
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Tools by name, preserving registration order for the catalog.
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec())
            .collect()
    }

    pub fn provider_defs(&self) -> Vec<Value> {
        self.specs().iter().map(ToolSpec::to_provider_def).collect()
    }
}
