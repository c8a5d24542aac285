// WhatsApp Gateway — Evolution API Client
//
// Outbound surface: sendText and sendPresence, both keyed by the per-agent
// session name. Non-2xx responses are classified into the transport
// taxonomy the dispatcher retries on; the gateway's `"exists": false` reply
// (destination not on WhatsApp) maps to `RecipientMissing`, which the
// dispatcher treats as terminal success.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::constants::SEND_ATTEMPT_TIMEOUT_SECS;
use crate::atoms::error::TransportError;
use crate::atoms::traits::ChatTransport;
use crate::atoms::types::{DeliveryAck, Presence};

use super::config::GatewayConfig;

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct EvolutionClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl EvolutionClient {
    pub fn new(config: &GatewayConfig) -> Self {
        EvolutionClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(SEND_ATTEMPT_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn map_request_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(Duration::from_secs(SEND_ATTEMPT_TIMEOUT_SECS))
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ChatTransport for EvolutionClient {
    async fn send_text(
        &self,
        session: &str,
        destination: &str,
        text: &str,
        delay_hint_ms: u64,
    ) -> Result<DeliveryAck, TransportError> {
        let url = format!("{}/message/sendText/{}", self.api_url, session);
        let body = json!({
            "number": destination,
            "text": text,
            "delay": delay_hint_ms,
        });

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = resp.status().as_u16();
        let text_body = resp.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(classify_send_error(status, &text_body));
        }

        let parsed: Value = serde_json::from_str(&text_body).unwrap_or_default();
        let message_id = parsed["key"]["id"].as_str().unwrap_or("").to_string();
        Ok(DeliveryAck { message_id })
    }

    async fn set_presence(
        &self,
        session: &str,
        destination: &str,
        presence: Presence,
    ) -> Result<(), TransportError> {
        let url = format!("{}/chat/sendPresence/{}", self.api_url, session);
        let body = json!({
            "number": destination,
            "presence": presence.as_str(),
            "delay": 1200,
        });

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body: truncate(&body, 300) });
        }
        Ok(())
    }
}

// ── Error classification ───────────────────────────────────────────────────

/// Map a non-2xx sendText response into the transport taxonomy. A 4xx whose
/// payload carries `"exists": false` means the destination is not a WhatsApp
/// account — an expected condition, not a fault.
pub fn classify_send_error(status: u16, body: &str) -> TransportError {
    if (400..500).contains(&status) && reports_missing_recipient(body) {
        return TransportError::RecipientMissing;
    }
    TransportError::Status { status, body: truncate(body, 300) }
}

/// The gateway reports unreachable numbers as `{"exists": false, ...}`
/// entries nested somewhere in the error payload.
fn reports_missing_recipient(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => value_has_exists_false(&v),
        Err(_) => false,
    }
}

fn value_has_exists_false(v: &Value) -> bool {
    match v {
        Value::Object(map) => {
            if map.get("exists").and_then(Value::as_bool) == Some(false) {
                return true;
            }
            map.values().any(value_has_exists_false)
        }
        Value::Array(items) => items.iter().any(value_has_exists_false),
        _ => false,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_recipient_payload_is_classified() {
        let body = r#"{
            "status": 400,
            "error": "Bad Request",
            "response": {
                "message": [{"exists": false, "jid": "5511000000000@s.whatsapp.net", "number": "5511000000000"}]
            }
        }"#;
        assert!(matches!(classify_send_error(400, body), TransportError::RecipientMissing));
    }

    #[test]
    fn ordinary_client_errors_keep_their_status() {
        let err = classify_send_error(401, r#"{"error": "Unauthorized"}"#);
        assert!(matches!(err, TransportError::Status { status: 401, .. }));
    }

    #[test]
    fn server_errors_are_never_recipient_missing() {
        // Even a 5xx body mentioning exists:false is a gateway fault.
        let err = classify_send_error(500, r#"{"exists": false}"#);
        assert!(err.is_server_error());
    }

    #[test]
    fn malformed_bodies_fall_back_to_status() {
        let err = classify_send_error(400, "not json at all");
        assert!(matches!(err, TransportError::Status { status: 400, .. }));
    }
}
