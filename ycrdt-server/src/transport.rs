//! The transport seam: the concrete WebSocket/HTTP/SSE layer is out of
//! scope, but every connection in this crate talks to its peer only through
//! this trait.

use async_trait::async_trait;

/// One physical connection to a peer. Implementations wrap a concrete
/// transport (WebSocket, in-process channel, …); sends are fire-and-forget
/// from the document's perspective but still report failure to the caller.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Closes the transport. `code` follows WebSocket close-code ranges:
    /// 1000-1015 standard, 4000-4999 application-defined.
    async fn close(&self, code: u16, reason: &str);

    fn is_open(&self) -> bool;

    fn remote_address(&self) -> Option<String>;

    fn connection_id(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
#[error("transport is closed")]
pub struct TransportError;

/// WebSocket close code for a clean server-initiated shutdown (keepalive
/// miss, registry shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code for a protocol violation (malformed frame, invalid
/// update bytes).
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Application-defined: authentication rejected or timed out.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// In-memory `Transport` test double. Shipped as a regular module (not
/// behind `cfg(test)`) so both this crate's own tests and downstream
/// integration tests can drive the sync/awareness protocol without a real
/// WebSocket.
pub mod test_support {
    use super::*;
    use tokio::sync::mpsc;

    /// An in-memory `Transport` double: captures every `send`d frame in an
    /// mpsc channel a test can drain, and tracks close/open state.
    #[derive(Debug)]
    pub struct InMemoryTransport {
        id: String,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        open: std::sync::atomic::AtomicBool,
    }

    impl InMemoryTransport {
        pub fn new(id: impl Into<String>) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                std::sync::Arc::new(InMemoryTransport {
                    id: id.into(),
                    tx,
                    open: std::sync::atomic::AtomicBool::new(true),
                }),
                rx,
            )
        }
    }

    #[async_trait]
    impl Transport for InMemoryTransport {
        async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError);
            }
            self.tx.send(bytes).map_err(|_| TransportError)
        }

        async fn close(&self, _code: u16, _reason: &str) {
            self.open.store(false, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn remote_address(&self) -> Option<String> {
            None
        }

        fn connection_id(&self) -> &str {
            &self.id
        }
    }
}
