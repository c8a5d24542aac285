// WhatsApp Gateway — Configuration

use serde::{Deserialize, Serialize};

/// Connection settings for the Evolution-API-compatible gateway. One
/// gateway serves many agent sessions; the per-agent session name lives in
/// the agent profile, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway base URL.
    pub api_url: String,
    /// Gateway API key, sent as the `apikey` header.
    pub api_key: String,
    /// Bind address for the local webhook listener.
    pub webhook_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            api_url: "http://127.0.0.1:8085".into(),
            api_key: String::new(),
            webhook_addr: "127.0.0.1:8086".into(),
        }
    }
}
