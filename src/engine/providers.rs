// ZapLine Engine — Model Provider
//
// The language model is an external collaborator: prompt plus history in,
// text plus token count out. This module ships the OpenAI-compatible REST
// implementation (works against OpenAI, OpenRouter, Azure, local gateways);
// anything else plugs in through the `ModelProvider` trait.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::ModelProvider;
use crate::atoms::types::{Completion, PromptMessage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 60;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>, api_key: &str) -> Self {
        OpenAiProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[PromptMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> EngineResult<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::provider(
                "openai",
                format!("API error {}: {}", status, &text[..text.len().min(500)]),
            ));
        }

        let parsed: Value = serde_json::from_str(&text)?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if content.is_empty() {
            return Err(EngineError::provider("openai", "empty completion"));
        }
        let total_tokens = parsed["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;

        debug!("[providers] Completion from {} ({} tokens)", model, total_tokens);
        Ok(Completion { text: content, total_tokens })
    }
}
