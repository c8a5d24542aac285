// ── ZapLine Atoms: Pure Data Types ─────────────────────────────────────────
// All plain struct/enum definitions with no logic beyond trivial accessors.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Conversation identity ──────────────────────────────────────────────────

/// Composite identity scoping all rate-limit and memory state. Never
/// persisted as an entity itself — it only namespaces keys in the shared
/// store, so everything about one agent+contact is reachable through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub agent_id: String,
    pub contact_id: String,
}

impl ConversationKey {
    pub fn new(agent_id: impl Into<String>, contact_id: impl Into<String>) -> Self {
        ConversationKey { agent_id: agent_id.into(), contact_id: contact_id.into() }
    }

    /// Store-key suffix: `{agent_id}:{contact_id}`.
    pub fn tag(&self) -> String {
        format!("{}:{}", self.agent_id, self.contact_id)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent_id, self.contact_id)
    }
}

// ── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in a conversation log. Immutable once written; ordered by
/// insertion. Owned exclusively by the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: u32,
}

/// One turn in a model request.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        PromptMessage { role, content: content.into() }
    }
}

/// Model reply: generated text plus the provider-reported token usage for
/// the whole request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub total_tokens: u32,
}

// ── Knowledge base ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Objection,
    Faq,
    Case,
    Feature,
    Process,
    Script,
    Policy,
    Manual,
}

/// An authored snippet of reference text used to ground replies.
/// Created and edited by the authoring surface; read-only here. Disabled
/// chunks stay in the pool (`is_active = false`), they are never hard-deleted
/// by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub title: String,
    pub content: String,
    pub kind: ChunkKind,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Which class of evidence put a chunk into the results. Telemetry only —
/// ranking is decided by the score alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Title,
    Tag,
    TypeKeyword,
    Content,
}

/// Ephemeral retrieval result, alive for one request only.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub chunk: KnowledgeChunk,
    pub score: i32,
    pub matched_on: MatchKind,
}

// ── Agent runtime configuration ────────────────────────────────────────────

/// Read-only per-request configuration for one connected agent. Owned by the
/// control plane's CRUD layer and injected through the AgentDirectory seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub agent_id: String,
    /// Billing owner, passed to the usage ledger.
    pub owner_id: String,
    /// Opaque per-agent session name at the chat gateway.
    pub instance: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Sliding-window admission cap per contact.
    pub messages_per_minute: u32,
    /// Canned reply for the quota-exceeded path (and, when enabled, for
    /// generation failures).
    pub fallback_text: String,
    pub persona_name: String,
    /// Base system prompt describing the persona.
    pub system_prompt: String,
}

impl Default for AgentProfile {
    fn default() -> Self {
        AgentProfile {
            agent_id: "default".into(),
            owner_id: "default".into(),
            instance: "zapline".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 600,
            temperature: 0.7,
            messages_per_minute: 10,
            fallback_text: "No momento não consigo responder. Tente novamente mais tarde.".into(),
            persona_name: "Assistente".into(),
            system_prompt: String::new(),
        }
    }
}

// ── Inbound events ─────────────────────────────────────────────────────────

/// One normalized message envelope extracted from a webhook payload.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Stable gateway-assigned message id.
    pub message_id: String,
    /// Delivery destination, kept verbatim (e.g. `5511999990000@s.whatsapp.net`).
    pub remote_jid: String,
    /// Normalized sender identifier (jid with the server suffix stripped).
    pub contact_id: String,
    /// Sender display name, when the gateway provides one.
    pub push_name: String,
    pub text: String,
    /// Message authored by the connected account itself.
    pub from_me: bool,
}

// ── Outbound delivery ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Composing,
    Paused,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Composing => "composing",
            Presence::Paused => "paused",
        }
    }
}

/// Gateway acknowledgement for one delivered chunk.
#[derive(Debug, Clone)]
pub struct DeliveryAck {
    pub message_id: String,
}
