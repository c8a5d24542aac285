// ZapLine Engine — Outbound Dispatcher
//
// Delivers segmented chunks through the chat gateway with human pacing:
// a "composing" presence before each chunk, a typing delay proportional to
// chunk length, bounded retries with per-class backoff, and a "paused"
// presence on the way out — attempted even when delivery failed.
//
// Chunks go out strictly in order, never concurrently. A destination the
// gateway reports as nonexistent is a terminal success, not a fault.

use log::{debug, error, info, warn};
use std::time::{Duration, SystemTime};
use tokio::time::{sleep, timeout};

use crate::atoms::constants::{
    BACKOFF_SERVER_ERROR_SECS, BACKOFF_TRANSPORT_SECS, INTER_CHUNK_PAUSE_MS, PRESENCE_MAX_ATTEMPTS,
    PRESENCE_TIMEOUT_SECS, SEND_ATTEMPT_TIMEOUT_SECS, SEND_MAX_ATTEMPTS, TYPING_BASE_MS,
    TYPING_EXTRA_MAX_MS, TYPING_JITTER_MAX_MS, TYPING_PER_CHAR_MS,
};
use crate::atoms::error::TransportError;
use crate::atoms::traits::ChatTransport;
use crate::atoms::types::Presence;

// ── Pacing configuration ───────────────────────────────────────────────────

/// Timing knobs for the humanized delivery rhythm. Tests zero them out with
/// `Pacing::immediate()`; production uses the defaults.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub typing_base_ms: u64,
    pub typing_per_char_ms: u64,
    pub typing_extra_max_ms: u64,
    pub typing_jitter_max_ms: u64,
    pub inter_chunk_pause_ms: u64,
    pub attempt_timeout: Duration,
    pub presence_timeout: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            typing_base_ms: TYPING_BASE_MS,
            typing_per_char_ms: TYPING_PER_CHAR_MS,
            typing_extra_max_ms: TYPING_EXTRA_MAX_MS,
            typing_jitter_max_ms: TYPING_JITTER_MAX_MS,
            inter_chunk_pause_ms: INTER_CHUNK_PAUSE_MS,
            attempt_timeout: Duration::from_secs(SEND_ATTEMPT_TIMEOUT_SECS),
            presence_timeout: Duration::from_secs(PRESENCE_TIMEOUT_SECS),
        }
    }
}

impl Pacing {
    /// All artificial delays disabled; timeouts kept.
    pub fn immediate() -> Self {
        Pacing {
            typing_base_ms: 0,
            typing_per_char_ms: 0,
            typing_extra_max_ms: 0,
            typing_jitter_max_ms: 0,
            inter_chunk_pause_ms: 0,
            ..Pacing::default()
        }
    }
}

/// What the dispatcher accomplished for one reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// The gateway reported the destination is not on the chat network;
    /// the reply was dropped without error.
    pub recipient_missing: bool,
}

// ── Delivery ───────────────────────────────────────────────────────────────

/// Send `chunks` to `destination` in order. Returns the last error once a
/// chunk exhausts its retries (remaining chunks are abandoned); a missing
/// recipient short-circuits to success.
pub async fn deliver(
    transport: &dyn ChatTransport,
    session: &str,
    destination: &str,
    chunks: &[String],
    pacing: &Pacing,
) -> Result<DeliveryReport, TransportError> {
    let mut report = DeliveryReport::default();
    let mut failure: Option<TransportError> = None;

    'chunks: for (index, chunk) in chunks.iter().enumerate() {
        signal_presence(transport, session, destination, Presence::Composing, pacing).await;

        let typing = typing_delay(chunk.chars().count(), pacing);
        if !typing.is_zero() {
            sleep(typing).await;
        }

        let mut attempt: u32 = 1;
        loop {
            let outcome = timeout(
                pacing.attempt_timeout,
                transport.send_text(session, destination, chunk, typing.as_millis() as u64),
            )
            .await;

            let err = match outcome {
                Ok(Ok(ack)) => {
                    debug!(
                        "[dispatcher] Chunk {}/{} delivered to {} (gateway id {})",
                        index + 1,
                        chunks.len(),
                        destination,
                        ack.message_id
                    );
                    report.delivered += 1;
                    break;
                }
                Ok(Err(TransportError::RecipientMissing)) => {
                    info!(
                        "[dispatcher] Destination {} is not on the network — dropping reply",
                        destination
                    );
                    report.recipient_missing = true;
                    break 'chunks;
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(pacing.attempt_timeout),
            };

            if !err.is_server_error() && !err.is_transport_failure() {
                // 4xx-class: retrying cannot help.
                warn!(
                    "[dispatcher] Permanent send failure to {} on chunk {}: {}",
                    destination,
                    index + 1,
                    err
                );
                failure = Some(err);
                break 'chunks;
            }

            if attempt >= SEND_MAX_ATTEMPTS {
                error!(
                    "[dispatcher] Retries exhausted for {} on chunk {}/{}: {}",
                    destination,
                    index + 1,
                    chunks.len(),
                    err
                );
                failure = Some(err);
                break 'chunks;
            }

            let delay = backoff_delay(attempt, &err);
            warn!(
                "[dispatcher] Send attempt {} to {} failed — retrying in {:?}: {}",
                attempt, destination, delay, err
            );
            sleep(delay).await;
            attempt += 1;
        }

        if index + 1 < chunks.len() && pacing.inter_chunk_pause_ms > 0 {
            sleep(Duration::from_millis(pacing.inter_chunk_pause_ms)).await;
        }
    }

    // Always leave the conversation in a "stopped typing" state.
    signal_presence(transport, session, destination, Presence::Paused, pacing).await;

    match failure {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

/// Backoff before retry `attempt + 1`: gateway 5xx backs off on a 2 s slope,
/// transport-level failures on a 3 s slope.
pub fn backoff_delay(attempt: u32, err: &TransportError) -> Duration {
    let slope = if err.is_server_error() { BACKOFF_SERVER_ERROR_SECS } else { BACKOFF_TRANSPORT_SECS };
    Duration::from_secs(attempt as u64 * slope)
}

/// Simulated typing time for a chunk: base + capped per-char cost + jitter.
fn typing_delay(chars: usize, pacing: &Pacing) -> Duration {
    let typed = (chars as u64 * pacing.typing_per_char_ms).min(pacing.typing_extra_max_ms);
    Duration::from_millis(pacing.typing_base_ms + typed + jitter_ms(pacing.typing_jitter_max_ms))
}

/// Jitter from subsecond clock nanos — enough spread for pacing, no extra
/// crate needed.
fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % (max_ms + 1)
}

/// Best-effort presence signal: short timeout, at most two attempts, never
/// fails the delivery.
async fn signal_presence(
    transport: &dyn ChatTransport,
    session: &str,
    destination: &str,
    presence: Presence,
    pacing: &Pacing,
) {
    for attempt in 1..=PRESENCE_MAX_ATTEMPTS {
        match timeout(pacing.presence_timeout, transport.set_presence(session, destination, presence))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) if attempt == PRESENCE_MAX_ATTEMPTS => {
                warn!(
                    "[dispatcher] Presence '{}' failed for {}: {}",
                    presence.as_str(),
                    destination,
                    e
                );
            }
            Err(_) if attempt == PRESENCE_MAX_ATTEMPTS => {
                warn!(
                    "[dispatcher] Presence '{}' timed out for {}",
                    presence.as_str(),
                    destination
                );
            }
            _ => {}
        }
    }
}
