//! Assistant webhook client.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use serde_json::json;

/// Prefix for the per-conversation session identifier sent to the assistant.
const SESSION_PREFIX: &str = "intelligence-";

/// The conversational assistant behind the webhook. `user_id` is the
/// conversation identifier (public group id for groups, sender otherwise),
/// so session state is kept per conversation rather than per sender.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn ask(&self, message: &str, user_id: &str) -> Result<String>;
}

pub struct WebhookAssistant {
    webhook_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl WebhookAssistant {
    pub fn new(webhook_url: String, auth_token: &str, client: reqwest::Client) -> Self {
        let auth_header = format!("Basic {}", general_purpose::STANDARD.encode(auth_token));
        Self {
            webhook_url,
            auth_header,
            client,
        }
    }

    fn session_id(user_id: &str) -> String {
        format!("{SESSION_PREFIX}{user_id}")
    }
}

#[async_trait]
impl Assistant for WebhookAssistant {
    async fn ask(&self, message: &str, user_id: &str) -> Result<String> {
        let body = json!({
            "chatInput": message,
            "action": "sendMessage",
            "sessionId": Self::session_id(user_id),
        });

        let resp = self
            .client
            .post(&self.webhook_url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            bail!("assistant webhook failed ({status}): {err}");
        }

        Ok(resp.text().await?)
    }
}
