//! Long-lived WebSocket consumer for the gateway's receive stream.
//!
//! Each text frame is one complete JSON envelope and is handed to the router
//! synchronously; a slow router therefore throttles intake instead of piling
//! up unprocessed frames. Connection loss of any kind leads to a fixed-delay
//! reconnect, forever, until shutdown is requested.

use crate::router::MessageRouter;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Fixed delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_REASON: &str = "Host shutting down";

pub struct ReceiveLoop {
    ws_url: String,
    router: Arc<MessageRouter>,
    cancel: CancellationToken,
}

impl ReceiveLoop {
    pub fn new(ws_url: String, router: Arc<MessageRouter>, cancel: CancellationToken) -> Self {
        Self {
            ws_url,
            router,
            cancel,
        }
    }

    /// Connect-receive-reconnect until cancelled. Never returns an error:
    /// every failure mode is a logged reconnect.
    pub async fn run(self) -> Result<()> {
        loop {
            let stream = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                connected = connect_async(self.ws_url.as_str()) => match connected {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!("receive connect to {} failed: {e}", self.ws_url);
                        if self.sleep_before_reconnect().await {
                            return Ok(());
                        }
                        continue;
                    }
                },
            };
            tracing::info!("receive stream connected: {}", self.ws_url);

            let (mut write, mut read) = stream.split();
            let shutdown = loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: SHUTDOWN_REASON.into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break true;
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(payload))) => {
                            self.router.handle_payload(&payload).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(payload) => self.router.handle_payload(&payload).await,
                            Err(e) => tracing::warn!("dropping non-UTF-8 binary frame: {e}"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!("server closed receive stream: {frame:?}");
                            let reply = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "".into(),
                            };
                            let _ = write.send(Message::Close(Some(reply))).await;
                            break false;
                        }
                        Some(Ok(_)) => {} // ping/pong handled by the library
                        Some(Err(e)) => {
                            tracing::warn!("receive stream error: {e}");
                            break false;
                        }
                        None => {
                            tracing::warn!("receive stream ended");
                            break false;
                        }
                    }
                }
            };
            if shutdown {
                return Ok(());
            }

            if self.sleep_before_reconnect().await {
                return Ok(());
            }
        }
    }

    /// Fixed-delay wait between attempts; true when shutdown was requested
    /// while waiting.
    async fn sleep_before_reconnect(&self) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(RECONNECT_DELAY) => false,
        }
    }
}
