// ── ZapLine Atoms: Trait Seams ─────────────────────────────────────────────
// The engine's external collaborators, expressed as async traits so the
// control plane can implement them against its own database and the tests
// can stub them. The pipeline holds each one as an `Arc<dyn …>`.

use async_trait::async_trait;

use crate::atoms::error::{EngineResult, TransportError};
use crate::atoms::types::{
    AgentProfile, Completion, DeliveryAck, KnowledgeChunk, Presence, PromptMessage,
};

// ── Chat gateway ───────────────────────────────────────────────────────────

/// Outbound surface of the chat gateway. `session` is the opaque per-agent
/// session name; `destination` the normalized recipient identifier.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver one text chunk. `delay_hint_ms` is forwarded to gateways that
    /// render their own typing pause before showing the message.
    async fn send_text(
        &self,
        session: &str,
        destination: &str,
        text: &str,
        delay_hint_ms: u64,
    ) -> Result<DeliveryAck, TransportError>;

    /// Best-effort presence indicator ("composing" / "paused").
    async fn set_presence(
        &self,
        session: &str,
        destination: &str,
        presence: Presence,
    ) -> Result<(), TransportError>;
}

// ── Model provider ─────────────────────────────────────────────────────────

/// The external language model. A black box to this core: prompt plus
/// history in, text plus token count out.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[PromptMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> EngineResult<Completion>;
}

// ── Knowledge base ─────────────────────────────────────────────────────────

/// Supplies the (small, authored) knowledge pool for one agent. The engine
/// never writes through this seam.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn chunks_for_agent(&self, agent_id: &str) -> EngineResult<Vec<KnowledgeChunk>>;
}

// ── Agent directory ────────────────────────────────────────────────────────

/// Resolves a gateway session name to the agent profile the CRUD layer has
/// on file. `None` means the webhook belongs to no connected agent and the
/// event is dropped.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn resolve_instance(&self, instance: &str) -> Option<AgentProfile>;
}

// ── Usage accounting ───────────────────────────────────────────────────────

/// Quota collaborator. The engine performs exactly one gate check per event
/// and one commit after a successful generation; everything else about
/// credits is out of scope.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn check_and_reserve(&self, owner_id: &str, estimated_tokens: u32) -> EngineResult<bool>;
    async fn commit(&self, owner_id: &str, actual_tokens: u32) -> EngineResult<()>;
}

/// Ledger for standalone deployments with no accounting service attached:
/// every reservation is allowed, commits are dropped.
pub struct NullLedger;

#[async_trait]
impl UsageLedger for NullLedger {
    async fn check_and_reserve(&self, _owner_id: &str, _estimated_tokens: u32) -> EngineResult<bool> {
        Ok(true)
    }

    async fn commit(&self, _owner_id: &str, _actual_tokens: u32) -> EngineResult<()> {
        Ok(())
    }
}
