//! Collaborative session server: loads documents on demand, drives the
//! sync and awareness protocols over the lib0-compatible wire format,
//! broadcasts updates to peers, and persists state with debounced writes.
//! Transport-agnostic — see [`transport::Transport`].

mod awareness;
mod config;
mod connection;
mod error;
mod hooks;
mod persistence;
mod registry;
mod server;
mod transport;
mod wire;

pub use config::ServerConfig;
pub use connection::{AuthState, ClientConnection, DocumentConnection};
pub use error::{Error, Result};
pub use hooks::{default_error_handler, ErrorHandler, Extension, HookChain, HookContext};
pub use persistence::{InMemoryStore, PersistenceStore};
pub use registry::{BroadcastMessage, ManagedDocument, Registry};
pub use server::Server;
pub use transport::{test_support, Transport, TransportError, CLOSE_AUTH_FAILED, CLOSE_GOING_AWAY, CLOSE_PROTOCOL_ERROR};
pub use wire::{
    encode_close_payload, encode_sync_status_payload, read_var_string, read_var_uint, write_var_string,
    write_var_uint, Frame, MessageType, SyncKind, SyncMessage,
};
