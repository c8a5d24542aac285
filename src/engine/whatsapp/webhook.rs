// WhatsApp Gateway — Webhook HTTP Listener
//
// Minimal HTTP listener for gateway webhooks. The gateway expects a fast
// acknowledgement, so the listener answers 200 OK before doing any work and
// processes each extracted envelope on its own task — one pipeline instance
// per inbound event, nothing serializing two events for the same contact.
// Malformed payloads are permanent request errors: dropped, never retried.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::atoms::error::EngineResult;
use crate::atoms::traits::AgentDirectory;
use crate::engine::pipeline::Pipeline;

use super::messages::extract_envelopes;

/// Accept gateway webhooks on `addr` until `stop` flips. Returns only on
/// bind failure or stop.
pub async fn run_webhook_listener(
    addr: &str,
    pipeline: Arc<Pipeline>,
    directory: Arc<dyn AgentDirectory>,
    stop: Arc<AtomicBool>,
) -> EngineResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind webhook listener on {}: {}", addr, e))?;

    info!("[webhook] Listener started on {}", addr);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let accept_result =
            tokio::time::timeout(std::time::Duration::from_secs(2), listener.accept()).await;

        let (mut stream, _peer) = match accept_result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("[webhook] Accept error: {}", e);
                continue;
            }
            Err(_) => continue, // Timeout — re-check the stop signal.
        };

        // Read the request, acknowledge immediately, then process.
        let mut buf = vec![0u8; 65536];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let request = String::from_utf8_lossy(&buf[..n]).to_string();

        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
        let _ = stream.write_all(response.as_bytes()).await;
        drop(stream);

        let body = match request.find("\r\n\r\n") {
            Some(idx) => &request[idx + 4..],
            None => continue,
        };

        let payload: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                debug!("[webhook] Dropping request with unparsable body");
                continue;
            }
        };

        dispatch_event(&payload, &pipeline, &directory).await;
    }

    info!("[webhook] Listener stopped");
    Ok(())
}

/// Route one webhook payload by event type.
async fn dispatch_event(
    payload: &Value,
    pipeline: &Arc<Pipeline>,
    directory: &Arc<dyn AgentDirectory>,
) {
    let event = payload["event"].as_str().unwrap_or("");

    match event {
        "messages.upsert" => {
            let instance = payload["instance"].as_str().unwrap_or("");
            let profile = match directory.resolve_instance(instance).await {
                Some(p) => p,
                None => {
                    debug!("[webhook] No agent registered for instance '{}' — dropping", instance);
                    return;
                }
            };

            for envelope in extract_envelopes(payload) {
                let pipeline = pipeline.clone();
                let profile = profile.clone();
                tokio::spawn(async move {
                    let outcome = pipeline.handle(&profile, &envelope).await;
                    debug!(
                        "[webhook] Event {} for {} finished: {:?}",
                        envelope.message_id, profile.agent_id, outcome
                    );
                });
            }
        }
        "connection.update" => {
            let state = payload["data"]["state"].as_str().unwrap_or("");
            info!(
                "[webhook] Connection update for '{}': {}",
                payload["instance"].as_str().unwrap_or("?"),
                state
            );
        }
        _ => {
            // Other gateway events carry nothing for the pipeline.
        }
    }
}
