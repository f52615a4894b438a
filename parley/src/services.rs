//! Service container with an explicit init/shutdown lifecycle. The HTTP
//! server owns one of these; handlers get it injected. Nothing in the
//! runtime is a process-wide global.
//!
//! Deployments without Redis / MySQL / a docker socket fall back to the
//! in-memory backends so the server stays usable in development.
//! [`ServicesBuilder`] additionally lets tests inject a scripted model and
//! sandbox runner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use env_config::Settings;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentDirectory;
use crate::approval::ApprovalStore;
use crate::bus::EventBus;
use crate::cache::{Cache, CacheError, MemoryCache, RedisCache};
use crate::context::{ContextMessage, ContextStore};
use crate::orchestrator::Orchestrator;
use crate::provider::{ChatCompletionsClient, ModelClient, ProviderError};
use crate::registry::{Run, RunRegistry};
use crate::store::{AgentRow, MemoryMessageStore, MessageStore, MySqlMessageStore, StoreError};
use crate::tools::browser::{SearchClient, WebFindTool, WebOpenTool, WebSearchTool};
use crate::tools::chat::{
    GetChatHistoryTool, GetSessionMembersTool, GetUserInfoTool, GetUserSessionsTool,
    SearchMessagesTool,
};
use crate::tools::sandbox::{
    CodeExecuteTool, CodeRunner, DockerSandbox, DockerSandboxConfig, UnavailableSandbox,
};
use crate::tools::ToolRegistry;
use crate::writer::DualWriter;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Optional component overrides applied at build time.
#[derive(Default)]
pub struct ServicesBuilder {
    settings: Settings,
    model: Option<Arc<dyn ModelClient>>,
    runner: Option<Arc<dyn CodeRunner>>,
    store: Option<Arc<dyn MessageStore>>,
}

impl ServicesBuilder {
    pub fn new(settings: Settings) -> Self {
        Self { settings, ..Default::default() }
    }

    /// Uses `model` for every provider selector.
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<Arc<Services>, InitError> {
        let settings = self.settings;

        let cache: Arc<dyn Cache> = match &settings.redis_url {
            Some(url) => Arc::new(RedisCache::connect(url).await?),
            None => {
                tracing::warn!("REDIS_URL not set; using in-memory cache");
                Arc::new(MemoryCache::new())
            }
        };
        let store: Arc<dyn MessageStore> = match (self.store, &settings.mysql_url) {
            (Some(store), _) => store,
            (None, Some(url)) => Arc::new(MySqlMessageStore::connect(url).await?),
            (None, None) => {
                tracing::warn!("MYSQL_URL not set; using in-memory message store");
                Arc::new(MemoryMessageStore::new())
            }
        };

        let context = Arc::new(ContextStore::new(
            cache.clone(),
            store.clone(),
            settings.context_window,
            settings.context_ttl,
        ));
        let writer = Arc::new(DualWriter::start(store.clone(), context.clone()));
        let bus = EventBus::new();
        let registry = RunRegistry::new();
        let approvals = ApprovalStore::new(bus.clone(), settings.approval_timeout);

        let agents = AgentDirectory::new(store.clone());
        if let Err(e) = agents.ensure_agents().await {
            tracing::warn!(error = %e, "agent identity seeding failed; continuing");
        }

        let runner: Arc<dyn CodeRunner> = match self.runner {
            Some(runner) => runner,
            None => match DockerSandbox::connect(DockerSandboxConfig {
                image: settings.sandbox_image.clone(),
                container_name: settings.sandbox_image.clone(),
                timeout: settings.sandbox_timeout,
                memory_bytes: settings.sandbox_memory_bytes,
            }) {
                Ok(sandbox) => Arc::new(sandbox),
                Err(e) => {
                    tracing::warn!(error = %e, "code sandbox unavailable");
                    Arc::new(UnavailableSandbox)
                }
            },
        };

        let search = Arc::new(SearchClient::new(
            settings.exa_base_url.clone(),
            settings.exa_api_key.clone().unwrap_or_default(),
        ));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WebSearchTool::new(search.clone())));
        tools.register(Arc::new(WebOpenTool::new(search)));
        tools.register(Arc::new(WebFindTool));
        tools.register(Arc::new(CodeExecuteTool::new(runner)));
        tools.register(Arc::new(GetChatHistoryTool::new(context.clone())));
        tools.register(Arc::new(GetSessionMembersTool::new(store.clone())));
        tools.register(Arc::new(GetUserInfoTool::new(store.clone())));
        tools.register(Arc::new(SearchMessagesTool::new(store.clone())));
        tools.register(Arc::new(GetUserSessionsTool::new(store.clone())));
        let tools = Arc::new(tools);

        let mut providers: HashMap<&'static str, Arc<dyn ModelClient>> = HashMap::new();
        match self.model {
            Some(model) => {
                providers.insert("openai", model.clone());
                providers.insert("openrouter", model);
            }
            None => {
                if let Some(key) = &settings.openai_api_key {
                    providers.insert(
                        "openai",
                        Arc::new(ChatCompletionsClient::new(settings.openai_base_url.clone(), key)),
                    );
                }
                if let Some(key) = &settings.openrouter_api_key {
                    providers.insert(
                        "openrouter",
                        Arc::new(ChatCompletionsClient::new(
                            settings.openrouter_base_url.clone(),
                            key,
                        )),
                    );
                }
            }
        }

        let orchestrator = Orchestrator::new(
            bus.clone(),
            context.clone(),
            writer.clone(),
            approvals.clone(),
            tools,
            store.clone(),
            cache.clone(),
            settings.max_tool_rounds,
            settings.run_ttl,
        );

        let services = Arc::new(Services {
            bus: bus.clone(),
            registry,
            context,
            store,
            writer,
            approvals,
            agents,
            orchestrator,
            providers,
            gc_task: Mutex::new(None),
            settings,
        });

        // Idle session topics are reclaimed in the background.
        let grace = services.settings.topic_idle_grace;
        let gc = tokio::spawn(async move {
            let mut tick = tokio::time::interval(grace / 2);
            loop {
                tick.tick().await;
                bus.gc_idle(grace);
            }
        });
        *services.gc_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(gc);

        Ok(services)
    }
}

pub struct Services {
    pub settings: Settings,
    pub bus: EventBus,
    pub registry: RunRegistry,
    pub context: Arc<ContextStore>,
    pub store: Arc<dyn MessageStore>,
    pub writer: Arc<DualWriter>,
    pub approvals: ApprovalStore,
    pub agents: AgentDirectory,
    pub orchestrator: Orchestrator,
    providers: HashMap<&'static str, Arc<dyn ModelClient>>,
    gc_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Services {
    /// Wires every component from settings. Connection strings that are
    /// absent select the in-memory fallbacks.
    pub async fn init(settings: Settings) -> Result<Arc<Self>, InitError> {
        ServicesBuilder::new(settings).build().await
    }

    /// The model client backing an agent identity. Unknown providers fall
    /// back to OpenRouter.
    pub fn model_for(&self, agent: &AgentRow) -> Result<Arc<dyn ModelClient>, ProviderError> {
        let provider: &'static str = match agent.provider.as_str() {
            "openai" => "openai",
            _ => "openrouter",
        };
        self.providers
            .get(provider)
            .cloned()
            .ok_or(ProviderError::MissingKey(provider))
    }

    /// Spawns the orchestrator task for a freshly-created run and registers
    /// it for cancellation.
    pub fn spawn_run(
        self: &Arc<Self>,
        run: Run,
        agent: AgentRow,
        model: Arc<dyn ModelClient>,
        history: Option<Vec<ContextMessage>>,
    ) {
        let cancel = self
            .registry
            .cancel_token(&run.id)
            .unwrap_or_else(CancellationToken::new);
        let services = Arc::clone(self);
        let run_id = run.id.clone();
        let task = tokio::spawn(async move {
            let _outcome = services
                .orchestrator
                .execute(&run, &agent, model, cancel, history)
                .await;
        });
        self.registry.register_task(&run_id, task);
    }

    /// Stops background work and drains the DB writer.
    pub async fn shutdown(&self) {
        if let Some(gc) = self.gc_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            gc.abort();
        }
        self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockModel;

    #[tokio::test]
    async fn builder_wires_in_memory_backends_with_injected_model() {
        let services = ServicesBuilder::new(Settings::default())
            .with_model(Arc::new(MockModel::replying("hi")))
            .build()
            .await
            .unwrap();
        let agent = services.agents.default_agent();
        assert!(services.model_for(&agent).is_ok());
        services.shutdown().await;
    }

    #[tokio::test]
    async fn model_for_without_keys_is_an_error() {
        let services = Services::init(Settings::default()).await.unwrap();
        let agent = services.agents.default_agent();
        assert!(matches!(
            services.model_for(&agent),
            Err(ProviderError::MissingKey(_))
        ));
        services.shutdown().await;
    }
}
