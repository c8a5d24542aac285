// ZapLine — headless server binary
//
// Wires the engine for standalone use: JSON config file + env overrides,
// in-memory agent directory and knowledge source, a null usage ledger, the
// Evolution gateway client, and the OpenAI-compatible model client. The
// SaaS control plane embeds the library instead and supplies its own
// implementations of the directory/knowledge/ledger seams.

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zapline::atoms::traits::{AgentDirectory, KnowledgeSource, NullLedger};
use zapline::atoms::types::{AgentProfile, KnowledgeChunk};
use zapline::engine::pipeline::{Pipeline, PipelinePolicy};
use zapline::engine::providers::OpenAiProvider;
use zapline::engine::store::{self, RedisStore};
use zapline::engine::whatsapp::{run_webhook_listener, EvolutionClient, GatewayConfig};
use zapline::{EngineError, EngineResult};

// ── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct ModelSettings {
    /// OpenAI-compatible base URL; unset means api.openai.com.
    base_url: Option<String>,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ZaplineConfig {
    redis_url: String,
    gateway: GatewayConfig,
    model: ModelSettings,
    fail_open_on_store_error: bool,
    fallback_on_generation_failure: bool,
    agents: Vec<AgentEntry>,
}

impl Default for ZaplineConfig {
    fn default() -> Self {
        ZaplineConfig {
            redis_url: "redis://127.0.0.1/".into(),
            gateway: GatewayConfig::default(),
            model: ModelSettings::default(),
            fail_open_on_store_error: true,
            fallback_on_generation_failure: false,
            agents: vec![],
        }
    }
}

/// One connected agent plus its authored knowledge pool.
#[derive(Debug, Clone, Deserialize)]
struct AgentEntry {
    #[serde(flatten)]
    profile: AgentProfile,
    #[serde(default)]
    knowledge: Vec<KnowledgeChunk>,
}

fn load_config() -> EngineResult<ZaplineConfig> {
    let path = std::env::var("ZAPLINE_CONFIG").unwrap_or_else(|_| "zapline.json".into());
    let mut config: ZaplineConfig = match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(e) => {
            return Err(EngineError::Config(format!("cannot read config file {}: {}", path, e)))
        }
    };

    // Secrets prefer the environment over the config file.
    if let Ok(url) = std::env::var("ZAPLINE_REDIS_URL") {
        config.redis_url = url;
    }
    if let Ok(key) = std::env::var("ZAPLINE_MODEL_API_KEY") {
        config.model.api_key = key;
    }
    if let Ok(key) = std::env::var("ZAPLINE_GATEWAY_API_KEY") {
        config.gateway.api_key = key;
    }
    Ok(config)
}

// ── In-memory collaborator implementations ─────────────────────────────────

struct StaticDirectory {
    by_instance: HashMap<String, AgentProfile>,
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn resolve_instance(&self, instance: &str) -> Option<AgentProfile> {
        self.by_instance.get(instance).cloned()
    }
}

struct StaticKnowledge {
    by_agent: HashMap<String, Vec<KnowledgeChunk>>,
}

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn chunks_for_agent(&self, agent_id: &str) -> EngineResult<Vec<KnowledgeChunk>> {
        Ok(self.by_agent.get(agent_id).cloned().unwrap_or_default())
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> EngineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    if config.agents.is_empty() {
        return Err(EngineError::Config("no agents configured".into()));
    }

    store::configure(&config.redis_url);

    let mut by_instance = HashMap::new();
    let mut by_agent = HashMap::new();
    for entry in &config.agents {
        by_instance.insert(entry.profile.instance.clone(), entry.profile.clone());
        by_agent.insert(entry.profile.agent_id.clone(), entry.knowledge.clone());
    }
    info!("[main] Loaded {} agent(s)", by_instance.len());

    let policy = PipelinePolicy {
        fail_open_on_store_error: config.fail_open_on_store_error,
        fallback_on_generation_failure: config.fallback_on_generation_failure,
        ..PipelinePolicy::default()
    };

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(RedisStore),
        Arc::new(EvolutionClient::new(&config.gateway)),
        Arc::new(OpenAiProvider::new(config.model.base_url.as_deref(), &config.model.api_key)),
        Arc::new(StaticKnowledge { by_agent }),
        Arc::new(NullLedger),
        policy,
    ));
    let directory: Arc<dyn AgentDirectory> = Arc::new(StaticDirectory { by_instance });

    let stop = Arc::new(AtomicBool::new(false));
    let listener = {
        let addr = config.gateway.webhook_addr.clone();
        let stop = stop.clone();
        tokio::spawn(async move { run_webhook_listener(&addr, pipeline, directory, stop).await })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("[main] Shutdown signal received");
    stop.store(true, Ordering::Relaxed);

    // The listener notices the stop flag within its accept poll interval;
    // in-flight pipeline tasks run to completion on the runtime.
    match listener.await {
        Ok(result) => result?,
        Err(e) => log::warn!("[main] Listener task aborted: {}", e),
    }

    store::shutdown().await;
    info!("[main] Bye");
    Ok(())
}
