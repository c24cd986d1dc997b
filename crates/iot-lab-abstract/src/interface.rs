use crate::error::AdapterError;
use crate::sample::{ClientId, Timestamp};

/// Acknowledgement returned by a single [`ProtocolAdapter::send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAck {
    /// Whether the peer confirmed the message.
    pub delivered: bool,
    /// When the server saw the message, if the protocol reports it.
    pub server_timestamp: Option<Timestamp>,
}

impl SendAck {
    pub fn delivered(server_timestamp: Option<Timestamp>) -> Self {
        Self {
            delivered: true,
            server_timestamp,
        }
    }

    pub fn lost() -> Self {
        Self {
            delivered: false,
            server_timestamp: None,
        }
    }
}

/// The interface a wire-protocol implementation exposes to the engine.
///
/// One adapter instance is shared by every simulated client, so
/// implementations must be safe to call from several threads at once.
pub trait ProtocolAdapter: Send + Sync {
    /// Short protocol name used in logs and artifacts (e.g. `mqtt`).
    fn name(&self) -> &str;

    /// Called once before any client starts sending.
    /// Brings up brokers, servers or connections the protocol needs.
    fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Send one payload on behalf of `client` and block until the protocol
    /// reports the outcome. Retries, if any, are the adapter's business.
    fn send(&self, client: ClientId, payload: &[u8]) -> Result<SendAck, AdapterError>;

    /// Called once after every client has finished.
    fn stop(&self) {}
}
