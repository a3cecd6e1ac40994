//! The document registry: `name -> Document` plus a `name -> in-flight load`
//! map, reconciled under one lock so "loaded vs loading vs absent" is always
//! a single lookup rather than two maps to keep in sync.

use crate::awareness::Awareness;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::hooks::{HookChain, HookContext};
use crate::persistence::PersistenceStore;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Fan-out message a `ManagedDocument` broadcasts to every subscribed
/// `DocumentConnection`. `origin` identifies the connection whose message
/// caused it, if any, so a connection's forwarding task can skip echoing a
/// message back to the connection that sent it.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    Update { bytes: Vec<u8>, origin: Option<u64> },
    Awareness { bytes: Vec<u8>, origin: Option<u64> },
    Stateless { bytes: Vec<u8>, origin: Option<u64> },
}

struct PersistState {
    dirty: bool,
    window_start: Option<Instant>,
    generation: u64,
    closed: bool,
}

impl Default for PersistState {
    fn default() -> Self {
        PersistState { dirty: false, window_start: None, generation: 0, closed: false }
    }
}

/// One loaded document plus everything hanging off it: awareness state, the
/// connection-count that gates unload, the broadcast channel connections
/// subscribe to, and the debounced persistence pipeline.
pub struct ManagedDocument {
    pub name: String,
    pub doc: ycrdt_runtime::Doc,
    pub awareness: SyncMutex<Awareness>,
    config: Arc<ServerConfig>,
    persistence: Arc<dyn PersistenceStore>,
    hooks: Arc<HookChain>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    connection_count: AtomicU64,
    persist_state: SyncMutex<PersistState>,
    // Keeps the update subscription alive for the document's lifetime;
    // never read, only held.
    _update_subscription: SyncMutex<Option<ycrdt_runtime::Subscription>>,
}

impl ManagedDocument {
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, message: BroadcastMessage) {
        // No active receivers is not an error: a document with no
        // connections can still be mutated (e.g. by a hook) and persisted.
        let _ = self.broadcast_tx.send(message);
    }

    pub fn add_connection(&self) {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` if this was the connection that dropped the count to
    /// zero (the caller should then trigger `Registry::close`).
    pub fn remove_connection(&self) -> bool {
        self.connection_count.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Applies a remote update inside its own transaction, tagging the
    /// transaction's origin with `origin_connection` so the broadcast fan-out
    /// can skip echoing it back to the connection that sent it.
    pub fn apply_remote_update(&self, update: &[u8], origin_connection: u64) -> Result<()> {
        let origin = origin_connection.to_string();
        ycrdt_runtime::apply_update(&self.doc, update, Some(&origin))?;
        Ok(())
    }

    /// Schedules a debounced persistence store. Safe to call from the
    /// document's synchronous update observer: only bumps in-memory state
    /// and spawns a timer task, never blocks.
    fn schedule_store(self: &Arc<Self>) {
        let (wait, generation) = {
            let mut state = self.persist_state.lock();
            if state.closed {
                return;
            }
            state.generation += 1;
            let window_start = *state.window_start.get_or_insert_with(Instant::now);
            state.dirty = true;
            let elapsed = window_start.elapsed();
            let ceiling_remaining = self.config.max_debounce.saturating_sub(elapsed);
            let wait = self.config.debounce.min(ceiling_remaining);
            (wait, state.generation)
        };

        let doc = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            doc.maybe_flush(generation).await;
        });
    }

    async fn maybe_flush(self: &Arc<Self>, generation: u64) {
        let should_flush = {
            let mut state = self.persist_state.lock();
            if state.closed || state.generation != generation || !state.dirty {
                false
            } else {
                state.dirty = false;
                state.window_start = None;
                true
            }
        };
        if should_flush {
            self.flush_now().await;
        }
    }

    /// Encodes and stores the current document state. On failure the error
    /// is routed to the hook chain's error handler and the dirty flag is
    /// restored so the next debounce window retries.
    pub async fn flush_now(self: &Arc<Self>) {
        let bytes = match ycrdt_runtime::encode_state_as_update(&self.doc, None) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.hooks.report(&Error::Runtime(e));
                return;
            }
        };
        match self.persistence.store(&self.name, bytes.clone()).await {
            Ok(()) => {
                debug!("Persisted document {} ({} bytes)", self.name, bytes.len());
                let ctx = HookContext::new(self.name.clone());
                self.hooks.run_on_store_document(&ctx, &bytes).await;
            }
            Err(e) => {
                warn!("Failed to persist document {}: {}", self.name, e);
                self.hooks.report(&Error::PersistenceFailure(e.to_string()));
                let mut state = self.persist_state.lock();
                state.dirty = true;
            }
        }
    }

    /// Cancels any pending debounce timer (by marking the window closed, so
    /// an in-flight timer's `maybe_flush` no-ops) and synchronously flushes.
    /// A concurrent cancel+flush race lands on exactly one actual store:
    /// whichever side observes `dirty == true` first clears it and writes.
    pub async fn unload(self: &Arc<Self>) {
        let should_flush = {
            let mut state = self.persist_state.lock();
            state.closed = true;
            let dirty = state.dirty;
            state.dirty = false;
            dirty
        };
        if should_flush {
            self.flush_now().await;
        }
        debug!("Unloaded document {}", self.name);
    }
}

enum Entry {
    Loaded(Arc<ManagedDocument>),
    Loading(watch::Receiver<Option<std::result::Result<Arc<ManagedDocument>, Arc<Error>>>>),
}

/// Process-wide (per `Registry` instance — not a true singleton, so tests
/// and multi-tenant hosts can run several independent servers) map of
/// loaded and loading documents. At most one live `ManagedDocument` per name
/// at any instant.
pub struct Registry {
    config: Arc<ServerConfig>,
    persistence: Arc<dyn PersistenceStore>,
    hooks: Arc<HookChain>,
    entries: SyncMutex<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new(config: Arc<ServerConfig>, persistence: Arc<dyn PersistenceStore>, hooks: Arc<HookChain>) -> Arc<Self> {
        Arc::new(Registry { config, persistence, hooks, entries: SyncMutex::new(HashMap::new()) })
    }

    /// Loads `name` if absent, joins an in-flight load if one exists, or
    /// returns the already-loaded document.
    pub async fn open(self: &Arc<Self>, name: &str) -> Result<Arc<ManagedDocument>> {
        loop {
            let existing = {
                let mut entries = self.entries.lock();
                match entries.get(name) {
                    Some(Entry::Loaded(doc)) => Some(Ok(doc.clone())),
                    Some(Entry::Loading(rx)) => Some(Err(rx.clone())),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(name.to_string(), Entry::Loading(rx));
                        drop(entries);
                        return self.load(name, tx).await;
                    }
                }
            };

            match existing {
                Some(Ok(doc)) => return Ok(doc),
                Some(Err(mut rx)) => {
                    // Await the in-flight load. A concurrent `open` never
                    // observes a partially-closed document: `close` removes
                    // the entry only after its flush completes, so a racing
                    // `open` either rejoins this load or starts a fresh one.
                    loop {
                        if let Some(result) = rx.borrow().clone() {
                            return result.map_err(|e| Error::from_shared(&e));
                        }
                        if rx.changed().await.is_err() {
                            break; // sender dropped without ever sending; retry from the top.
                        }
                    }
                }
                None => unreachable!(),
            }
        }
    }

    async fn load(
        self: &Arc<Self>,
        name: &str,
        tx: watch::Sender<Option<std::result::Result<Arc<ManagedDocument>, Arc<Error>>>>,
    ) -> Result<Arc<ManagedDocument>> {
        let result = self.do_load(name).await;
        match result {
            Ok(doc) => {
                info!("Loaded document {}", name);
                self.entries.lock().insert(name.to_string(), Entry::Loaded(doc.clone()));
                let _ = tx.send(Some(Ok(doc.clone())));
                Ok(doc)
            }
            Err(e) => {
                warn!("Failed to load document {}: {}", name, e);
                self.entries.lock().remove(name);
                let shared = Arc::new(e);
                let _ = tx.send(Some(Err(shared.clone())));
                Err(Error::from_shared(&shared))
            }
        }
    }

    async fn do_load(self: &Arc<Self>, name: &str) -> Result<Arc<ManagedDocument>> {
        let mut ctx = HookContext::new(name);
        self.hooks.run_on_load_document(&mut ctx).await;

        let stored = self.persistence.fetch(name).await?;
        let doc = ycrdt_runtime::Doc::new(None);
        if let Some(bytes) = stored {
            ycrdt_runtime::apply_update(&doc, &bytes, None)?;
        }

        let managed = Arc::new(ManagedDocument {
            name: name.to_string(),
            doc: doc.clone(),
            awareness: SyncMutex::new(Awareness::new()),
            config: self.config.clone(),
            persistence: self.persistence.clone(),
            hooks: self.hooks.clone(),
            broadcast_tx: broadcast::channel(self.config.broadcast_capacity).0,
            connection_count: AtomicU64::new(0),
            persist_state: SyncMutex::new(PersistState::default()),
            _update_subscription: SyncMutex::new(None),
        });

        let weak = Arc::downgrade(&managed);
        let hooks = self.hooks.clone();
        let doc_name = name.to_string();
        let sub = doc.observe_update_v1(move |event| {
            let Some(managed) = weak.upgrade() else { return };
            let origin_connection =
                event.origin.as_ref().and_then(|o| std::str::from_utf8(o).ok()?.parse::<u64>().ok());
            managed.broadcast(BroadcastMessage::Update { bytes: event.update.clone(), origin: origin_connection });
            managed.schedule_store();

            let hooks = hooks.clone();
            let ctx = HookContext::new(doc_name.clone());
            let update = event.update.clone();
            tokio::spawn(async move {
                hooks.run_on_change(&ctx, &update).await;
            });
        });
        *managed._update_subscription.lock() = Some(sub);

        Ok(managed)
    }

    /// Every currently loaded document, for background tasks (the
    /// awareness sweep) that need to iterate all of them.
    pub fn loaded_documents(&self) -> Vec<Arc<ManagedDocument>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                Entry::Loaded(doc) => Some(doc.clone()),
                Entry::Loading(_) => None,
            })
            .collect()
    }

    /// Called when a document's connection count drops to zero. Enqueues a
    /// final flush, then removes the entry — unless a concurrent `open`
    /// already re-added connections, in which case the document stays
    /// loaded.
    pub async fn close(self: &Arc<Self>, name: &str, doc: &Arc<ManagedDocument>) {
        doc.unload().await;
        let mut entries = self.entries.lock();
        if doc.connection_count() == 0 {
            if let Some(Entry::Loaded(current)) = entries.get(name) {
                if Arc::ptr_eq(current, doc) {
                    entries.remove(name);
                    info!("Closed document {}", name);
                }
            }
        }
    }
}

impl Error {
    fn from_shared(e: &Arc<Error>) -> Error {
        Error::UseAfterClose(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{default_error_handler, HookChain};
    use crate::persistence::InMemoryStore;

    fn registry() -> Arc<Registry> {
        Registry::new(
            Arc::new(ServerConfig::default()),
            Arc::new(InMemoryStore::new()),
            Arc::new(HookChain::new(Vec::new(), default_error_handler())),
        )
    }

    #[tokio::test]
    async fn open_returns_the_same_document_on_repeated_calls() {
        let registry = registry();
        let a = registry.open("doc-1").await.unwrap();
        let b = registry.open("doc-1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_opens_join_the_same_load() {
        let registry = registry();
        let (a, b) = tokio::join!(registry.open("doc-1"), registry.open("doc-1"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn close_removes_the_entry_and_a_fresh_open_reloads() {
        let registry = registry();
        let doc = registry.open("doc-1").await.unwrap();
        doc.add_connection();
        assert!(doc.remove_connection());
        registry.close("doc-1", &doc).await;

        let reopened = registry.open("doc-1").await.unwrap();
        assert!(!Arc::ptr_eq(&doc, &reopened));
    }

    #[tokio::test]
    async fn load_applies_previously_persisted_state() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Registry::new(
            Arc::new(ServerConfig::default()),
            store.clone(),
            Arc::new(HookChain::new(Vec::new(), default_error_handler())),
        );

        let seed = ycrdt_runtime::Doc::new(None);
        seed.get_text("content").insert(0, "hello", None, None).unwrap();
        let bytes = ycrdt_runtime::encode_state_as_update(&seed, None).unwrap();
        store.store("doc-1", bytes).await.unwrap();

        let doc = registry.open("doc-1").await.unwrap();
        assert_eq!(doc.doc.get_text("content").get_string(None).unwrap(), "hello");
    }
}
