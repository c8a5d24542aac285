// ZapLine Engine — Conversation Memory
//
// Bounded, time-expiring message log per conversation, stored as a JSON
// list in the shared store (head = newest). Every append trims to the cap
// and refreshes the rolling TTL, so an idle conversation expires after a
// week while an active one never does.
//
// Reads degrade instead of failing: a missing history lowers reply quality
// but must never block the pipeline.

use chrono::Utc;
use log::warn;

use crate::atoms::constants::{CONVERSATION_LOG_CAP, CONVERSATION_TTL_SECS, CONV_KEY_PREFIX};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{ConversationKey, Role, StoredMessage};
use crate::engine::store::SharedStore;

fn log_key(key: &ConversationKey) -> String {
    format!("{}:{}", CONV_KEY_PREFIX, key.tag())
}

/// Append one message to the conversation log, evicting the oldest entry
/// beyond the cap and extending the log's lifetime.
pub async fn append(
    store: &dyn SharedStore,
    key: &ConversationKey,
    role: Role,
    content: &str,
    token_count: u32,
) -> EngineResult<()> {
    let message = StoredMessage {
        role,
        content: content.to_string(),
        timestamp: Utc::now(),
        token_count,
    };
    let json = serde_json::to_string(&message)?;
    let store_key = log_key(key);

    store.lpush(&store_key, &json).await?;
    store.ltrim(&store_key, 0, CONVERSATION_LOG_CAP as isize - 1).await?;
    store.expire(&store_key, CONVERSATION_TTL_SECS).await?;
    Ok(())
}

/// The most recent `limit` messages in chronological order, ready for
/// direct inclusion in a model prompt. Store errors and undecodable entries
/// degrade to an empty / shorter history with a warning.
pub async fn recent(
    store: &dyn SharedStore,
    key: &ConversationKey,
    limit: usize,
) -> Vec<StoredMessage> {
    let raw = match store.lrange(&log_key(key), 0, limit as isize - 1).await {
        Ok(items) => items,
        Err(e) => {
            warn!("[memory] History read failed for {} — continuing without it: {}", key, e);
            return vec![];
        }
    };

    let mut messages: Vec<StoredMessage> = raw
        .iter()
        .filter_map(|json| match serde_json::from_str(json) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("[memory] Skipping undecodable log entry for {}: {}", key, e);
                None
            }
        })
        .collect();

    // Head of list is newest; the prompt wants oldest-first.
    messages.reverse();
    messages
}

/// Destroy one conversation's log.
pub async fn clear(store: &dyn SharedStore, key: &ConversationKey) -> EngineResult<()> {
    store.del(&log_key(key)).await
}

/// Destroy every conversation log belonging to an agent (used when an agent
/// is disconnected from the platform). Returns how many logs were removed.
pub async fn clear_agent(store: &dyn SharedStore, agent_id: &str) -> EngineResult<usize> {
    let prefix = format!("{}:{}:", CONV_KEY_PREFIX, agent_id);
    let keys = store.keys_with_prefix(&prefix).await?;
    let mut removed = 0;
    for key in &keys {
        store.del(key).await?;
        removed += 1;
    }
    Ok(removed)
}
