//! Top-level wiring: a `Server` owns the document registry, the hook chain
//! and the server-wide configuration, and mints a `ClientConnection` per
//! accepted transport.

use crate::config::ServerConfig;
use crate::connection::ClientConnection;
use crate::hooks::{Extension, HookChain};
use crate::persistence::PersistenceStore;
use crate::registry::Registry;
use crate::transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One independent collaborative session server. Not a singleton: a
/// process may host several (tests, multi-tenant hosting) each with its own
/// registry and configuration.
pub struct Server {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub hooks: Arc<HookChain>,
    next_connection_id: AtomicU64,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        persistence: Arc<dyn PersistenceStore>,
        extensions: Vec<Arc<dyn Extension>>,
        error_handler: crate::hooks::ErrorHandler,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let hooks = Arc::new(HookChain::new(extensions, error_handler));
        let registry = Registry::new(config.clone(), persistence, hooks.clone());
        Arc::new(Server { config, registry, hooks, next_connection_id: AtomicU64::new(1) })
    }

    /// Convenience constructor for tests and simple embeddings: no
    /// extensions, the default error handler.
    pub fn with_persistence(persistence: Arc<dyn PersistenceStore>) -> Arc<Self> {
        Server::new(ServerConfig::default(), persistence, Vec::new(), crate::hooks::default_error_handler())
    }

    /// Accepts a new transport, spawning its auth-timeout and keepalive
    /// watchdogs.
    pub fn accept(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Arc<ClientConnection> {
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let conn = ClientConnection::new(id, transport, self.config.clone());
        conn.spawn_auth_timeout();
        conn.spawn_keepalive_watchdog();
        conn
    }

    /// Spawns the background awareness-expiration sweep across every
    /// currently loaded document. Intended to be called once at server
    /// startup.
    pub fn spawn_awareness_sweep(self: &Arc<Self>) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(server.config.awareness_timeout);
            loop {
                interval.tick().await;
                for doc in server.registry.loaded_documents() {
                    crate::connection::DocumentConnection::sweep_awareness(&doc, server.config.awareness_timeout);
                }
            }
        });
    }
}
