// ZapLine Engine — WhatsApp Gateway (Evolution-API-compatible)
//
// Module layout:
//   config   — GatewayConfig: base URL, API key, webhook bind address
//   api      — EvolutionClient: sendText / sendPresence, error classification
//   webhook  — run_webhook_listener (raw TCP HTTP server)
//   messages — inbound envelope extraction and normalization

pub mod api;
pub mod config;
pub mod messages;
pub mod webhook;

pub use api::EvolutionClient;
pub use config::GatewayConfig;
pub use webhook::run_webhook_listener;
