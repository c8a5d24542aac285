// WhatsApp Gateway — Inbound Envelope Extraction
//
// A webhook payload carries one or more message envelopes. Only envelopes
// with an extractable text body survive: plain text, quoted text, or the
// caption of captioned media. Everything else (audio, stickers, reactions,
// status broadcasts) has an empty body and is dropped before the pipeline
// ever sees it, as are messages the connected account sent itself.

use log::debug;
use serde_json::Value;

use crate::atoms::types::InboundMessage;

/// Pull the processable envelopes out of a `messages.upsert` payload.
pub fn extract_envelopes(payload: &Value) -> Vec<InboundMessage> {
    let data = &payload["data"];
    let raw: Vec<Value> = match data.as_array() {
        Some(arr) => arr.clone(),
        None => vec![data.clone()],
    };

    raw.iter().filter_map(extract_one).collect()
}

fn extract_one(msg: &Value) -> Option<InboundMessage> {
    let key = &msg["key"];
    let from_me = key["fromMe"].as_bool().unwrap_or(false);
    if from_me {
        return None;
    }

    let text = extract_text(&msg["message"]);
    if text.trim().is_empty() {
        debug!("[messages] Dropping envelope with no extractable text body");
        return None;
    }

    let remote_jid = key["remoteJid"].as_str().unwrap_or("");
    if remote_jid.is_empty() {
        return None;
    }
    let participant = key["participant"].as_str().unwrap_or(remote_jid);
    let contact_id = normalize_jid(participant);

    Some(InboundMessage {
        message_id: key["id"].as_str().unwrap_or("").to_string(),
        remote_jid: remote_jid.to_string(),
        contact_id: contact_id.clone(),
        push_name: msg["pushName"].as_str().unwrap_or(&contact_id).to_string(),
        text: text.trim().to_string(),
        from_me,
    })
}

/// Text body of a polymorphic message: plain conversation, quoted/extended
/// text, or a media caption. Anything else yields an empty string.
fn extract_text(message: &Value) -> String {
    message["conversation"]
        .as_str()
        .or_else(|| message["extendedTextMessage"]["text"].as_str())
        .or_else(|| message["imageMessage"]["caption"].as_str())
        .or_else(|| message["videoMessage"]["caption"].as_str())
        .or_else(|| message["documentMessage"]["caption"].as_str())
        .unwrap_or("")
        .to_string()
}

/// Strip the server suffix from a jid (`5511999990000@s.whatsapp.net` →
/// `5511999990000`).
pub fn normalize_jid(jid: &str) -> String {
    jid.split('@').next().unwrap_or(jid).to_string()
}
