//! `ClientConnection` (one per transport) and `DocumentConnection` (one per
//! `(client, document)` pair): auth state machine, bounded pending queue,
//! sync/awareness protocol routing and read-only enforcement.

use crate::error::{Error, Result};
use crate::hooks::{HookChain, HookContext};
use crate::registry::{BroadcastMessage, ManagedDocument};
use crate::server::Server;
use crate::transport::{Transport, CLOSE_AUTH_FAILED, CLOSE_GOING_AWAY, CLOSE_PROTOCOL_ERROR};
use crate::wire::{encode_sync_status_payload, read_var_uint, Frame, MessageType, SyncMessage};
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A `ClientConnection`'s authentication lifecycle: `Unauthenticated` until
/// an `AUTH` frame is processed, then terminally `Authenticated` or
/// `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Rejected,
}

/// One physical transport's connection state: auth machine, the
/// per-document-name map of `DocumentConnection`s, the queue held while
/// unauthenticated, and the keepalive/auth-timeout watchdogs.
pub struct ClientConnection {
    id: u64,
    transport: Arc<dyn Transport>,
    config: Arc<crate::config::ServerConfig>,
    auth: SyncMutex<AuthState>,
    pending: SyncMutex<VecDeque<Frame>>,
    documents: SyncMutex<HashMap<String, Arc<DocumentConnection>>>,
    read_only: AtomicBool,
    last_seen: SyncMutex<Instant>,
}

impl ClientConnection {
    pub fn new(id: u64, transport: Arc<dyn Transport>, config: Arc<crate::config::ServerConfig>) -> Arc<Self> {
        Arc::new(ClientConnection {
            id,
            transport,
            config,
            auth: SyncMutex::new(AuthState::Unauthenticated),
            pending: SyncMutex::new(VecDeque::new()),
            documents: SyncMutex::new(HashMap::new()),
            read_only: AtomicBool::new(false),
            last_seen: SyncMutex::new(Instant::now()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn auth_state(&self) -> AuthState {
        *self.auth.lock()
    }

    pub fn set_read_only(&self, value: bool) {
        self.read_only.store(value, Ordering::SeqCst);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Decodes and routes one incoming wire message.
    pub async fn handle_incoming(self: &Arc<Self>, bytes: Vec<u8>, server: &Arc<Server>) {
        self.touch();

        if bytes.len() > self.config.max_message_bytes {
            warn!("Connection {} sent an oversized message ({} bytes)", self.id, bytes.len());
            server.hooks.report(&Error::InvalidFraming("message exceeds max_message_bytes".into()));
            self.transport.close(CLOSE_PROTOCOL_ERROR, "message too large").await;
            return;
        }

        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to decode frame from connection {}: {}", self.id, e);
                server.hooks.report(&e);
                self.transport.close(CLOSE_PROTOCOL_ERROR, "malformed frame").await;
                return;
            }
        };

        if self.auth_state() == AuthState::Unauthenticated && frame.message_type != MessageType::Auth {
            self.enqueue_pending(frame, server);
            return;
        }

        self.dispatch(frame, server).await;
    }

    /// Bounded; the oldest pending frame is dropped on overflow, reported via
    /// the error handler hook as `Error::QueueOverflow`.
    fn enqueue_pending(&self, frame: Frame, server: &Arc<Server>) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.config.pending_queue_capacity {
            pending.pop_front();
            server.hooks.report(&Error::QueueOverflow(self.id));
        }
        pending.push_back(frame);
    }

    async fn dispatch(self: &Arc<Self>, frame: Frame, server: &Arc<Server>) {
        if frame.message_type == MessageType::Auth {
            self.authenticate(&frame.payload, server).await;
            return;
        }

        let doc_conn = match self.document_connection(&frame.doc_name, server).await {
            Ok(conn) => conn,
            Err(e) => {
                server.hooks.report(&e);
                return;
            }
        };

        match frame.message_type {
            MessageType::Sync => {
                if let Err(e) = doc_conn.handle_sync(&frame.payload).await {
                    server.hooks.report(&e);
                    self.transport.close(CLOSE_PROTOCOL_ERROR, "invalid sync payload").await;
                }
            }
            MessageType::Awareness => {
                if let Err(e) = doc_conn.handle_awareness(&frame.payload).await {
                    server.hooks.report(&e);
                }
            }
            MessageType::QueryAwareness => doc_conn.handle_query_awareness().await,
            MessageType::Stateless => doc_conn.handle_stateless(frame.payload).await,
            MessageType::BroadcastStateless => {
                doc_conn.handle_broadcast_stateless(frame.payload, &server.hooks).await
            }
            MessageType::Auth | MessageType::SyncReply | MessageType::Close | MessageType::SyncStatus => {
                // Server-to-client-only types; a client sending one is ignored rather
                // than treated as a protocol violation (forward-compatible with
                // clients that echo frames back).
            }
        }
    }

    /// Runs the authentication hook chain; on success, drains the pending
    /// queue in arrival order.
    pub async fn authenticate(self: &Arc<Self>, token: &[u8], server: &Arc<Server>) {
        let mut ctx = HookContext::new("");
        let accepted = server.hooks.run_on_authenticate(&mut ctx, token).await;

        *self.auth.lock() = if accepted { AuthState::Authenticated } else { AuthState::Rejected };

        if !accepted {
            warn!("Connection {} rejected authentication", self.id);
            self.transport.close(CLOSE_AUTH_FAILED, "authentication rejected").await;
            return;
        }

        debug!("Connection {} authenticated", self.id);
        let queued: Vec<Frame> = self.pending.lock().drain(..).collect();
        for frame in queued {
            self.dispatch(frame, server).await;
        }
    }

    async fn document_connection(
        self: &Arc<Self>,
        name: &str,
        server: &Arc<Server>,
    ) -> Result<Arc<DocumentConnection>> {
        if let Some(existing) = self.documents.lock().get(name).cloned() {
            return Ok(existing);
        }
        let managed = server.registry.open(name).await?;
        let conn = DocumentConnection::open(self.id, managed, self.transport.clone(), self.is_read_only()).await?;
        self.documents.lock().insert(name.to_string(), conn.clone());
        Ok(conn)
    }

    /// Closes every `DocumentConnection`, then decrements their document
    /// ref-counts (closing the document itself if that was the last one).
    pub async fn on_transport_close(self: &Arc<Self>, server: &Arc<Server>) {
        info!("Connection {} closed", self.id);
        let docs: Vec<(String, Arc<DocumentConnection>)> = self.documents.lock().drain().collect();
        for (name, conn) in docs {
            conn.close();
            let managed = conn.doc().clone();
            if managed.remove_connection() {
                server.registry.close(&name, &managed).await;
            }
        }
    }

    pub fn spawn_auth_timeout(self: &Arc<Self>) {
        let conn = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(conn.config.auth_timeout).await;
            if conn.auth_state() == AuthState::Unauthenticated {
                conn.transport.close(CLOSE_AUTH_FAILED, "authentication timed out").await;
            }
        });
    }

    pub fn spawn_keepalive_watchdog(self: &Arc<Self>) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(conn.config.keepalive_interval);
            loop {
                interval.tick().await;
                if !conn.transport.is_open() {
                    return;
                }
                let elapsed = conn.last_seen.lock().elapsed();
                if elapsed > conn.config.keepalive_interval * 2 {
                    warn!("Connection {} timed out waiting for keepalive", conn.id);
                    conn.transport.close(CLOSE_GOING_AWAY, "keepalive timeout").await;
                    return;
                }
            }
        });
    }
}

/// One `(client, document)` pair: routes SYNC / AWARENESS / QUERY_AWARENESS
/// / STATELESS / BROADCAST_STATELESS and enforces `read_only`.
pub struct DocumentConnection {
    connection_id: u64,
    doc: Arc<ManagedDocument>,
    transport: Arc<dyn Transport>,
    read_only: bool,
    synced: AtomicBool,
    forward_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl DocumentConnection {
    pub async fn open(
        connection_id: u64,
        doc: Arc<ManagedDocument>,
        transport: Arc<dyn Transport>,
        read_only: bool,
    ) -> Result<Arc<Self>> {
        doc.add_connection();
        let conn = Arc::new(DocumentConnection {
            connection_id,
            doc: doc.clone(),
            transport,
            read_only,
            synced: AtomicBool::new(false),
            forward_task: SyncMutex::new(None),
        });

        // Initial sync: our state vector (so the client can fill us in),
        // then our full state. Awareness is sent as a separate frame.
        let sv = ycrdt_runtime::encode_state_vector(&doc.doc)?;
        conn.send_sync(SyncMessage::Step1(sv)).await;
        let full_state = ycrdt_runtime::encode_state_as_update(&doc.doc, None)?;
        conn.send_sync(SyncMessage::Step2(full_state)).await;
        let awareness_bytes = doc.awareness.lock().get_states();
        conn.send_frame(MessageType::Awareness, awareness_bytes).await;

        let rx = doc.subscribe();
        let forward_target = conn.clone();
        let handle = tokio::spawn(async move { forward_target.forward_loop(rx).await });
        *conn.forward_task.lock() = Some(handle);

        info!("Connection {} opened document {}", connection_id, doc.name);
        Ok(conn)
    }

    pub fn doc(&self) -> &Arc<ManagedDocument> {
        &self.doc
    }

    pub fn close(&self) {
        if let Some(handle) = self.forward_task.lock().take() {
            handle.abort();
        }
    }

    async fn forward_loop(self: Arc<Self>, mut rx: broadcast::Receiver<BroadcastMessage>) {
        loop {
            match rx.recv().await {
                Ok(message) => self.forward(message).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn forward(&self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::Update { bytes, origin } => {
                if origin == Some(self.connection_id) {
                    return;
                }
                self.send_sync(SyncMessage::Update(bytes)).await;
            }
            BroadcastMessage::Awareness { bytes, origin } => {
                if origin == Some(self.connection_id) {
                    return;
                }
                self.send_frame(MessageType::Awareness, bytes).await;
            }
            BroadcastMessage::Stateless { bytes, origin } => {
                if origin == Some(self.connection_id) {
                    return;
                }
                self.send_frame(MessageType::BroadcastStateless, bytes).await;
            }
        }
    }

    async fn send_sync(&self, message: SyncMessage) {
        self.send_frame(MessageType::SyncReply, message.encode()).await;
    }

    async fn send_frame(&self, message_type: MessageType, payload: Vec<u8>) {
        let frame = Frame::new(self.doc.name.clone(), message_type, payload);
        // A send failure is recorded on the connection, not surfaced to the
        // document: one dead peer shouldn't interrupt broadcast to the rest.
        let _ = self.transport.send(frame.encode()).await;
    }

    /// Step1 replies with what the peer is missing then asks for what we're
    /// missing; Step2/Update apply (subject to `read_only`) and broadcast.
    pub async fn handle_sync(&self, payload: &[u8]) -> Result<()> {
        let message = SyncMessage::decode(payload)?;
        let carries_changes = message.carries_changes();
        match message {
            SyncMessage::Step1(sv) => {
                let vector = ycrdt_runtime::decode_state_vector(Some(&sv))?;
                let diff = ycrdt_runtime::encode_state_as_update(&self.doc.doc, Some(&vector))?;
                self.send_sync(SyncMessage::Step2(diff)).await;

                let own_sv = ycrdt_runtime::encode_state_vector(&self.doc.doc)?;
                self.send_sync(SyncMessage::Step1(own_sv)).await;
            }
            SyncMessage::Step2(update) | SyncMessage::Update(update) => {
                if self.read_only && carries_changes && !update.is_empty() {
                    self.send_frame(MessageType::SyncStatus, encode_sync_status_payload(false)).await;
                    return Ok(());
                }

                if !update.is_empty() {
                    self.doc.apply_remote_update(&update, self.connection_id)?;
                }

                if !self.synced.swap(true, Ordering::SeqCst) {
                    self.send_frame(MessageType::SyncStatus, encode_sync_status_payload(true)).await;
                }
            }
        }
        Ok(())
    }

    pub async fn handle_awareness(&self, payload: &[u8]) -> Result<()> {
        let accepted = {
            let mut awareness = self.doc.awareness.lock();
            awareness.apply_update(payload)?
        };
        if !is_empty_awareness_update(&accepted) {
            self.doc.broadcast(BroadcastMessage::Awareness { bytes: accepted, origin: Some(self.connection_id) });
        }
        Ok(())
    }

    pub async fn handle_query_awareness(&self) {
        let bytes = self.doc.awareness.lock().get_states();
        self.send_frame(MessageType::Awareness, bytes).await;
    }

    /// `STATELESS` is echoed back to the sender only.
    pub async fn handle_stateless(&self, payload: Vec<u8>) {
        self.send_frame(MessageType::Stateless, payload).await;
    }

    /// `BROADCAST_STATELESS` runs the `before_broadcast_stateless` hook,
    /// then fans the (possibly rewritten) payload out to every other
    /// connection on this document.
    pub async fn handle_broadcast_stateless(&self, payload: Vec<u8>, hooks: &HookChain) {
        let ctx = HookContext::new(self.doc.name.clone());
        let payload = hooks.run_before_broadcast_stateless(&ctx, payload).await;
        self.doc.broadcast(BroadcastMessage::Stateless { bytes: payload, origin: Some(self.connection_id) });
    }

    /// Sweeps this document's awareness for expired entries and broadcasts
    /// the removal, if any. Intended to be driven by a server-wide periodic
    /// task, one document at a time.
    pub fn sweep_awareness(doc: &Arc<ManagedDocument>, timeout: std::time::Duration) {
        let removal = doc.awareness.lock().sweep_expired(timeout);
        if let Some(bytes) = removal {
            debug!("Swept expired awareness entries for document {}", doc.name);
            doc.broadcast(BroadcastMessage::Awareness { bytes, origin: None });
        }
    }
}

fn is_empty_awareness_update(bytes: &[u8]) -> bool {
    let mut pos = 0;
    matches!(read_var_uint(bytes, &mut pos), Ok(0))
}
