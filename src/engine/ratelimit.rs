// ZapLine Engine — Sliding-Window Rate Limiter
//
// Admission control per (agent, contact) pair, backed by a per-key sorted
// set of epoch-millis markers in the shared store. Prune-then-count runs as
// one atomic round trip; the marker insert is a second round trip, so two
// workers racing on the same key can over-admit by at most one message —
// accepted slack for this domain.
//
// Store failure fails OPEN by default: the message is admitted and the fault
// logged. Availability of the conversation takes priority over strict quota
// enforcement; deployments that want strictness flip the policy flag.

use chrono::Utc;
use log::{debug, warn};

use crate::atoms::constants::RATE_KEY_PREFIX;
use crate::atoms::types::ConversationKey;
use crate::engine::store::SharedStore;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Messages left in the current window after this decision.
    pub remaining: u32,
    /// When the window frees up (epoch millis). For an admitted message this
    /// is simply `now + window`.
    pub reset_at_ms: i64,
}

fn window_key(key: &ConversationKey) -> String {
    format!("{}:{}", RATE_KEY_PREFIX, key.tag())
}

/// Check and record one admission for `key`.
pub async fn admit(
    store: &dyn SharedStore,
    key: &ConversationKey,
    max_per_window: u32,
    window_secs: u64,
    fail_open: bool,
) -> Admission {
    admit_at(store, key, max_per_window, window_secs, fail_open, Utc::now().timestamp_millis()).await
}

/// Clock-injected admission check. `admit` is the production entry point;
/// tests drive this one directly with synthetic timestamps.
pub async fn admit_at(
    store: &dyn SharedStore,
    key: &ConversationKey,
    max_per_window: u32,
    window_secs: u64,
    fail_open: bool,
    now_ms: i64,
) -> Admission {
    let window_ms = window_secs as i64 * 1000;
    let store_key = window_key(key);

    let in_window = match store.pruned_count(&store_key, now_ms - window_ms).await {
        Ok(count) => count as u32,
        Err(e) => {
            if fail_open {
                warn!("[ratelimit] Store unreachable for {} — failing open: {}", key, e);
                return Admission {
                    allowed: true,
                    remaining: max_per_window.saturating_sub(1),
                    reset_at_ms: now_ms + window_ms,
                };
            }
            warn!("[ratelimit] Store unreachable for {} — failing closed: {}", key, e);
            return Admission { allowed: false, remaining: 0, reset_at_ms: now_ms + window_ms };
        }
    };

    if in_window >= max_per_window {
        // The reset time is implied by the oldest surviving marker.
        let reset_at_ms = match store.zrange_with_scores(&store_key, 0, 0).await {
            Ok(entries) => entries
                .first()
                .map(|(_, oldest)| oldest + window_ms)
                .unwrap_or(now_ms + window_ms),
            Err(_) => now_ms + window_ms,
        };
        debug!(
            "[ratelimit] Rejected {} ({} in window, cap {})",
            key, in_window, max_per_window
        );
        return Admission { allowed: false, remaining: 0, reset_at_ms };
    }

    // Record this admission. Member carries a uuid suffix so two messages
    // landing in the same millisecond both count.
    let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4().simple());
    let recorded = store.zadd(&store_key, &member, now_ms).await;
    if let Err(e) = &recorded {
        if !fail_open {
            warn!("[ratelimit] Failed to record admission for {} — failing closed: {}", key, e);
            return Admission { allowed: false, remaining: 0, reset_at_ms: now_ms + window_ms };
        }
        warn!("[ratelimit] Failed to record admission for {} — failing open: {}", key, e);
    }
    if let Err(e) = store.expire(&window_key(key), window_secs as i64).await {
        warn!("[ratelimit] Failed to refresh window TTL for {}: {}", key, e);
    }

    Admission {
        allowed: true,
        remaining: max_per_window - in_window - 1,
        reset_at_ms: now_ms + window_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::testing::{BrokenStore, InMemoryStore};

    fn key() -> ConversationKey {
        ConversationKey::new("agent-1", "5511999990000")
    }

    #[tokio::test]
    async fn admits_up_to_cap_then_rejects() {
        let store = InMemoryStore::new();
        let now = 1_700_000_000_000;

        for i in 0..5u32 {
            let a = admit_at(&store, &key(), 5, 60, true, now + i as i64).await;
            assert!(a.allowed, "message {} should be admitted", i + 1);
            assert_eq!(a.remaining, 4 - i);
        }

        let sixth = admit_at(&store, &key(), 5, 60, true, now + 10).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        // Reset implied by the oldest marker plus the window.
        assert_eq!(sixth.reset_at_ms, now + 60_000);
    }

    #[tokio::test]
    async fn window_slides_and_key_behaves_fresh() {
        let store = InMemoryStore::new();
        let now = 1_700_000_000_000;

        for _ in 0..3 {
            assert!(admit_at(&store, &key(), 3, 60, true, now).await.allowed);
        }
        assert!(!admit_at(&store, &key(), 3, 60, true, now + 1).await.allowed);

        // One full window later, every marker is stale.
        let later = now + 61_000;
        let fresh = admit_at(&store, &key(), 3, 60, true, later).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_windows() {
        let store = InMemoryStore::new();
        let now = 1_700_000_000_000;
        let other = ConversationKey::new("agent-1", "5511888880000");

        assert!(admit_at(&store, &key(), 1, 60, true, now).await.allowed);
        assert!(!admit_at(&store, &key(), 1, 60, true, now + 1).await.allowed);
        assert!(admit_at(&store, &other, 1, 60, true, now + 2).await.allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open_by_policy() {
        let open = admit_at(&BrokenStore, &key(), 5, 60, true, 0).await;
        assert!(open.allowed);

        let closed = admit_at(&BrokenStore, &key(), 5, 60, false, 0).await;
        assert!(!closed.allowed);
    }
}
