//! Outbound REST calls to the Signal gateway.

use crate::groups::{GroupDirectory, GroupEntry};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;

/// Outbound messaging surface of the gateway, split out as a trait so the
/// router can be exercised against a recording fake.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message to one recipient (public group id or individual
    /// identifier). Returns the gateway-assigned send timestamp in
    /// epoch-milliseconds.
    async fn send_message(&self, message: &str, recipient: &str) -> Result<i64>;

    /// Show the typing indicator in the recipient's conversation.
    async fn start_typing(&self, recipient: &str) -> Result<()>;

    /// Clear the typing indicator in the recipient's conversation.
    async fn stop_typing(&self, recipient: &str) -> Result<()>;
}

/// REST client for the gateway serving one registered account.
pub struct SignalClient {
    base_url: String,
    account: String,
    client: reqwest::Client,
}

impl SignalClient {
    pub fn new(base_url: String, account: String, client: reqwest::Client) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            account,
            client,
        }
    }

    fn typing_indicator_url(&self) -> String {
        format!("{}/v1/typing-indicator/{}", self.base_url, self.account)
    }

    /// The gateway reports the send timestamp either as a JSON integer or as
    /// a decimal string, depending on version.
    fn extract_timestamp(body: &serde_json::Value) -> Result<i64> {
        let value = body
            .get("timestamp")
            .with_context(|| format!("send response missing timestamp: {body}"))?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        if let Some(s) = value.as_str() {
            return s
                .trim()
                .parse()
                .with_context(|| format!("non-numeric timestamp in send response: {s:?}"));
        }
        bail!("unexpected timestamp shape in send response: {value}");
    }

    async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        bail!("{what} failed ({status}): {body}");
    }
}

#[async_trait]
impl Messenger for SignalClient {
    async fn send_message(&self, message: &str, recipient: &str) -> Result<i64> {
        let url = format!("{}/v2/send", self.base_url);
        let body = json!({
            "message": message,
            "number": self.account,
            "recipients": [recipient],
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let resp = Self::check_status(resp, "Signal send").await?;
        let body: serde_json::Value = resp.json().await.context("send response is not JSON")?;
        Self::extract_timestamp(&body)
    }

    async fn start_typing(&self, recipient: &str) -> Result<()> {
        let resp = self
            .client
            .put(self.typing_indicator_url())
            .json(&json!({ "recipient": recipient }))
            .send()
            .await?;
        Self::check_status(resp, "Signal typing indicator").await?;
        Ok(())
    }

    async fn stop_typing(&self, recipient: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.typing_indicator_url())
            .json(&json!({ "recipient": recipient }))
            .send()
            .await?;
        Self::check_status(resp, "Signal typing indicator").await?;
        Ok(())
    }
}

#[async_trait]
impl GroupDirectory for SignalClient {
    async fn list_groups(&self) -> Result<Vec<GroupEntry>> {
        let url = format!("{}/v1/groups/{}", self.base_url, self.account);
        let resp = self.client.get(&url).send().await?;
        let resp = Self::check_status(resp, "Signal group listing").await?;
        resp.json().await.context("group listing is not JSON")
    }
}
