// ── ZapLine Atoms: Constants ───────────────────────────────────────────────
// All named constants for the crate live here.

// ── Shared store key namespacing ───────────────────────────────────────────
// Every piece of per-conversation state is reachable only through a
// (agent_id, contact_id) pair. Changing these prefixes orphans live state —
// treat them as stable identifiers.
pub const RATE_KEY_PREFIX: &str = "zl:rate";
pub const CONV_KEY_PREFIX: &str = "zl:conv";

// ── Conversation memory ────────────────────────────────────────────────────
// The log keeps only the most recent entries; older ones are evicted on
// every write. The TTL is rolling: an active conversation never expires,
// an idle one is destroyed whole after a week.
pub const CONVERSATION_LOG_CAP: usize = 20;
pub const CONVERSATION_TTL_SECS: i64 = 7 * 24 * 3600;

// ── Rate limiting ──────────────────────────────────────────────────────────
pub const RATE_WINDOW_SECS: u64 = 60;

/// Fixed notice sent (as a single chunk, unsegmented) when a contact trips
/// the per-conversation rate limit.
pub const RATE_LIMIT_NOTICE: &str =
    "Você está enviando mensagens muito rápido. Aguarde um instante e tente novamente. 🙏";

// ── Outbound segmentation ──────────────────────────────────────────────────
// Lengths are measured in characters, not bytes.
pub const SEGMENT_SINGLE_MAX: usize = 200;
pub const SEGMENT_MIDPOINT_MAX: usize = 400;
pub const SEGMENT_GROUP_MAX: usize = 300;

// ── Outbound dispatch pacing ───────────────────────────────────────────────
// Typing simulation: base + per-char cost (capped) + jitter, then the send.
pub const TYPING_BASE_MS: u64 = 300;
pub const TYPING_PER_CHAR_MS: u64 = 15;
pub const TYPING_EXTRA_MAX_MS: u64 = 1_500;
pub const TYPING_JITTER_MAX_MS: u64 = 500;
pub const INTER_CHUNK_PAUSE_MS: u64 = 500;

// ── Outbound dispatch resilience ───────────────────────────────────────────
pub const SEND_MAX_ATTEMPTS: u32 = 3;
pub const SEND_ATTEMPT_TIMEOUT_SECS: u64 = 30;
pub const PRESENCE_TIMEOUT_SECS: u64 = 10;
pub const PRESENCE_MAX_ATTEMPTS: u32 = 2;
/// Backoff slope per attempt for 5xx-class gateway responses.
pub const BACKOFF_SERVER_ERROR_SECS: u64 = 2;
/// Backoff slope per attempt for transport-level failures and timeouts.
pub const BACKOFF_TRANSPORT_SECS: u64 = 3;

// ── Prompt assembly ────────────────────────────────────────────────────────
pub const RETRIEVAL_TOP_K: usize = 3;
pub const HISTORY_LIMIT: usize = 20;

// ── Token estimation ───────────────────────────────────────────────────────
// Rough chars-per-token divisor used for the quota pre-check and for the
// inbound side of the log (the model reports real usage for the reply).
pub const CHARS_PER_TOKEN: usize = 4;
