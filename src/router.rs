//! Per-envelope routing: decode, authorize, resolve, archive, reply.
//!
//! Archival and assistant faults are deliberately absorbed here: the receive
//! stream is the hot path, and nothing downstream of it may interrupt
//! message intake. Each step either logs-and-continues or logs-and-drops the
//! current envelope, never more.

use crate::archive::{ArchiveHandle, MessageRecord};
use crate::assistant::Assistant;
use crate::auth::Allowlist;
use crate::groups::GroupResolver;
use crate::signal::client::Messenger;
use crate::signal::envelope::{decode_envelope, Envelope, Mention};
use crate::util::payload_preview;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const LOG_PAYLOAD_CHARS: usize = 512;

pub struct MessageRouter {
    account: String,
    allowlist: Allowlist,
    resolver: GroupResolver,
    archive: ArchiveHandle,
    messenger: Arc<dyn Messenger>,
    assistant: Arc<dyn Assistant>,
}

impl MessageRouter {
    pub fn new(
        account: String,
        allowlist: Allowlist,
        resolver: GroupResolver,
        archive: ArchiveHandle,
        messenger: Arc<dyn Messenger>,
        assistant: Arc<dyn Assistant>,
    ) -> Self {
        Self {
            account,
            allowlist,
            resolver,
            archive,
            messenger,
            assistant,
        }
    }

    /// Process one raw receive-stream payload end to end. Infallible by
    /// policy: every failure mode downgrades to a log line.
    pub async fn handle_payload(&self, payload: &str) {
        match decode_envelope(payload) {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(e) => tracing::warn!(
                "dropping undecodable envelope: {e:#}; payload: {}",
                payload_preview(payload, LOG_PAYLOAD_CHARS)
            ),
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        let Some(data) = envelope.data_message else {
            tracing::debug!("ignoring envelope without data message from {}", envelope.source);
            return;
        };
        let sender = envelope.source;

        if !self.allowlist.is_allowed(&sender) {
            tracing::warn!("dropping message from unauthorized sender {sender}");
            return;
        }

        let group_id = match data.group_info.as_ref().and_then(|g| g.group_id.as_deref()) {
            Some(internal) => match self.resolver.resolve(internal).await {
                Ok(public) => Some(public),
                Err(e) => {
                    tracing::warn!("group resolution failed for {internal}: {e:#}");
                    None
                }
            },
            None => None,
        };

        let text = data.effective_text();
        let inbound = MessageRecord {
            timestamp: millis_to_utc(data.timestamp),
            signal_received_timestamp: millis_to_utc(envelope.server_received_timestamp),
            signal_delivered_timestamp: envelope
                .server_delivered_timestamp
                .filter(|&ms| ms != 0)
                .map(millis_to_utc),
            target: self.account.clone(),
            source: sender.clone(),
            group_chat: group_id.clone(),
            mentions: mentions_blob(&data.mentions),
            content: text.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.archive.enqueue(inbound).await {
            tracing::warn!("inbound archive enqueue failed: {e:#}");
        }

        // In groups the assistant only answers when addressed directly.
        if data.is_group_message() && !account_mentioned(&self.account, &data.mentions) {
            tracing::debug!("group message without mention from {sender} archived only");
            return;
        }

        let Some(text) = text.filter(|t| !t.is_empty()) else {
            tracing::debug!("message without text from {sender} archived only");
            return;
        };

        let conversation = group_id.as_deref().unwrap_or(&sender);
        if let Err(e) = self.messenger.start_typing(conversation).await {
            tracing::warn!("typing indicator failed for {conversation}: {e:#}");
        }

        let reply = match self.assistant.ask(&text, conversation).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("assistant call failed for {conversation}: {e:#}");
                if let Err(e) = self.messenger.stop_typing(conversation).await {
                    tracing::warn!("clearing typing indicator failed for {conversation}: {e:#}");
                }
                return;
            }
        };
        if reply.is_empty() {
            tracing::debug!("assistant returned an empty reply for {conversation}");
            return;
        }

        let sent_at = match self.messenger.send_message(&reply, conversation).await {
            Ok(timestamp) => timestamp,
            Err(e) => {
                tracing::error!("sending reply to {conversation} failed: {e:#}");
                return;
            }
        };

        // Outbound rows pair the two correspondents: the group lives in
        // group_chat, the target stays the inbound sender.
        let outbound = MessageRecord {
            timestamp: Utc::now(),
            signal_received_timestamp: millis_to_utc(sent_at),
            signal_delivered_timestamp: None,
            target: sender.clone(),
            source: self.account.clone(),
            group_chat: group_id,
            mentions: None,
            content: Some(reply),
            created_at: Utc::now(),
        };
        if let Err(e) = self.archive.enqueue(outbound).await {
            tracing::warn!("outbound archive enqueue failed: {e:#}");
        }
    }
}

/// A group message addresses the bridge when any mention's name equals the
/// registered account.
fn account_mentioned(account: &str, mentions: &[Mention]) -> bool {
    mentions
        .iter()
        .any(|mention| mention.name.as_deref() == Some(account))
}

/// Archived as an opaque JSON blob; consumers of the table parse it on their
/// own terms.
fn mentions_blob(mentions: &[Mention]) -> Option<String> {
    if mentions.is_empty() {
        return None;
    }
    serde_json::to_string(mentions).ok()
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
