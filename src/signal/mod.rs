//! Signal gateway integration: wire model, REST client, and the receive
//! WebSocket loop.

pub mod client;
pub mod envelope;
pub mod receive;

pub use client::{Messenger, SignalClient};
pub use envelope::{decode_envelope, DataMessage, Envelope, GroupInfo, Mention};
pub use receive::ReceiveLoop;
