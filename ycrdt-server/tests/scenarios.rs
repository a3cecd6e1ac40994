//! End-to-end scenarios driven entirely through the wire protocol, against
//! the in-memory transport and persistence doubles. No real network or disk
//! is involved; each test plays the role of one or more remote peers talking
//! to a `Server` the same way a WebSocket client would.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ycrdt_server::test_support::InMemoryTransport;
use ycrdt_server::{
    default_error_handler, read_var_string, read_var_uint, write_var_string, write_var_uint, ClientConnection,
    Frame, InMemoryStore, MessageType, PersistenceStore, Server, ServerConfig, SyncMessage,
};

async fn connect(server: &Arc<Server>, id: &str) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (transport, rx) = InMemoryTransport::new(id);
    let conn = server.accept(transport);
    conn.authenticate(b"token", server).await;
    (conn, rx)
}

fn step1_frame(doc_name: &str, sv: Vec<u8>) -> Vec<u8> {
    Frame::new(doc_name, MessageType::Sync, SyncMessage::Step1(sv).encode()).encode()
}

fn update_frame(doc_name: &str, bytes: Vec<u8>) -> Vec<u8> {
    Frame::new(doc_name, MessageType::Sync, SyncMessage::Update(bytes).encode()).encode()
}

async fn next_sync_message(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> SyncMessage {
    loop {
        let bytes = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("transport channel closed");
        let frame = Frame::decode(&bytes).unwrap();
        if frame.message_type == MessageType::SyncReply {
            return SyncMessage::decode(&frame.payload).unwrap();
        }
    }
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    loop {
        if let SyncMessage::Update(bytes) = next_sync_message(rx).await {
            return bytes;
        }
    }
}

async fn next_step2(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    loop {
        if let SyncMessage::Step2(bytes) = next_sync_message(rx).await {
            return bytes;
        }
    }
}

fn encode_awareness(entries: &[(u64, u32, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    write_var_uint(&mut out, entries.len() as u64);
    for (id, clock, state) in entries {
        write_var_uint(&mut out, *id);
        write_var_uint(&mut out, *clock as u64);
        write_var_string(&mut out, state);
    }
    out
}

fn decode_awareness(bytes: &[u8]) -> Vec<(u64, u32, String)> {
    let mut pos = 0;
    let count = read_var_uint(bytes, &mut pos).unwrap();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_var_uint(bytes, &mut pos).unwrap();
        let clock = read_var_uint(bytes, &mut pos).unwrap() as u32;
        let state = read_var_string(bytes, &mut pos).unwrap();
        out.push((id, clock, state));
    }
    out
}

#[tokio::test]
async fn concurrent_text_inserts_converge_across_replicas() {
    let server = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn_a, mut rx_a) = connect(&server, "alice").await;
    let (conn_b, mut rx_b) = connect(&server, "bob").await;

    conn_a.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;
    conn_b.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let client_a = ycrdt_runtime::Doc::new(None);
    client_a.get_text("content").insert(0, "Hello", None, None).unwrap();
    let update_a = ycrdt_runtime::encode_state_as_update(&client_a, None).unwrap();
    conn_a.handle_incoming(update_frame("doc-1", update_a), &server).await;

    let client_b = ycrdt_runtime::Doc::new(None);
    let forwarded = next_update(&mut rx_b).await;
    ycrdt_runtime::apply_update(&client_b, &forwarded, None).unwrap();
    assert_eq!(client_b.get_text("content").get_string(None).unwrap(), "Hello");

    // bob's own edit, arriving after alice's, converges back to alice too.
    client_b.get_text("content").insert(5, " world", None, None).unwrap();
    let update_b = ycrdt_runtime::encode_state_as_update(&client_b, None).unwrap();
    conn_b.handle_incoming(update_frame("doc-1", update_b), &server).await;

    let forwarded = next_update(&mut rx_a).await;
    ycrdt_runtime::apply_update(&client_a, &forwarded, None).unwrap();
    assert_eq!(client_a.get_text("content").get_string(None).unwrap(), "Hello world");
}

#[tokio::test]
async fn map_last_writer_wins_converges_regardless_of_apply_order() {
    let client_a = ycrdt_runtime::Doc::new(None);
    client_a.get_map("meta").set("title", ycrdt_runtime::YValue::String("A".into()), None).unwrap();
    let update_a = ycrdt_runtime::encode_state_as_update(&client_a, None).unwrap();

    let client_b = ycrdt_runtime::Doc::new(None);
    client_b.get_map("meta").set("title", ycrdt_runtime::YValue::String("B".into()), None).unwrap();
    let update_b = ycrdt_runtime::encode_state_as_update(&client_b, None).unwrap();

    // Same pair of updates, applied through two independent servers in
    // opposite orders, must land on the same value.
    let server_1 = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn_1, _rx_1) = connect(&server_1, "peer").await;
    conn_1.handle_incoming(step1_frame("doc-1", Vec::new()), &server_1).await;
    conn_1.handle_incoming(update_frame("doc-1", update_a.clone()), &server_1).await;
    conn_1.handle_incoming(update_frame("doc-1", update_b.clone()), &server_1).await;

    let server_2 = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn_2, _rx_2) = connect(&server_2, "peer").await;
    conn_2.handle_incoming(step1_frame("doc-1", Vec::new()), &server_2).await;
    conn_2.handle_incoming(update_frame("doc-1", update_b), &server_2).await;
    conn_2.handle_incoming(update_frame("doc-1", update_a), &server_2).await;

    let doc_1 = server_1.registry.open("doc-1").await.unwrap();
    let doc_2 = server_2.registry.open("doc-1").await.unwrap();
    let value_1 = doc_1.doc.get_map("meta").get("title", None).unwrap();
    let value_2 = doc_2.doc.get_map("meta").get("title", None).unwrap();
    assert_eq!(value_1, value_2);
}

#[tokio::test]
async fn debounce_quiescence_persists_after_activity_stops() {
    let store = Arc::new(InMemoryStore::new());
    let config = ServerConfig { debounce: Duration::from_millis(60), max_debounce: Duration::from_secs(5), ..ServerConfig::default() };
    let server = Server::new(config, store.clone(), Vec::new(), default_error_handler());
    let (conn, _rx) = connect(&server, "writer").await;
    conn.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let client = ycrdt_runtime::Doc::new(None);
    client.get_text("content").insert(0, "x", None, None).unwrap();
    let update = ycrdt_runtime::encode_state_as_update(&client, None).unwrap();
    conn.handle_incoming(update_frame("doc-1", update), &server).await;

    assert!(store.fetch("doc-1").await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.fetch("doc-1").await.unwrap().is_some());
}

#[tokio::test]
async fn debounce_ceiling_forces_a_flush_under_continuous_activity() {
    let store = Arc::new(InMemoryStore::new());
    let config =
        ServerConfig { debounce: Duration::from_millis(80), max_debounce: Duration::from_millis(250), ..ServerConfig::default() };
    let server = Server::new(config, store.clone(), Vec::new(), default_error_handler());
    let (conn, _rx) = connect(&server, "writer").await;
    conn.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let client = ycrdt_runtime::Doc::new(None);
    for i in 0..10u32 {
        client.get_text("content").insert(i, "x", None, None).unwrap();
        let update = ycrdt_runtime::encode_state_as_update(&client, None).unwrap();
        conn.handle_incoming(update_frame("doc-1", update), &server).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    // 300ms of activity at an 80ms debounce never quiesces, but the 250ms
    // ceiling must have forced a flush somewhere in the middle.
    assert!(store.fetch("doc-1").await.unwrap().is_some());
}

#[tokio::test]
async fn a_newly_joined_session_receives_the_current_full_state() {
    let server = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn_a, _rx_a) = connect(&server, "alice").await;
    conn_a.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let client_a = ycrdt_runtime::Doc::new(None);
    client_a.get_text("content").insert(0, "Hello", None, None).unwrap();
    let update_a = ycrdt_runtime::encode_state_as_update(&client_a, None).unwrap();
    conn_a.handle_incoming(update_frame("doc-1", update_a), &server).await;

    let (conn_b, mut rx_b) = connect(&server, "bob").await;
    conn_b.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let full_state = next_step2(&mut rx_b).await;
    let client_b = ycrdt_runtime::Doc::new(None);
    ycrdt_runtime::apply_update(&client_b, &full_state, None).unwrap();
    assert_eq!(client_b.get_text("content").get_string(None).unwrap(), "Hello");
}

#[tokio::test]
async fn read_only_connections_cannot_mutate_the_document() {
    let server = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn, mut rx) = connect(&server, "viewer").await;
    conn.set_read_only(true);
    conn.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;

    let client = ycrdt_runtime::Doc::new(None);
    client.get_text("content").insert(0, "nope", None, None).unwrap();
    let update = ycrdt_runtime::encode_state_as_update(&client, None).unwrap();
    conn.handle_incoming(update_frame("doc-1", update), &server).await;

    let status = loop {
        let bytes = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        if frame.message_type == MessageType::SyncStatus {
            break frame.payload;
        }
    };
    assert_eq!(status, ycrdt_server::encode_sync_status_payload(false));

    let doc = server.registry.open("doc-1").await.unwrap();
    assert_eq!(doc.doc.get_text("content").get_string(None).unwrap(), "");
}

#[tokio::test]
async fn stale_awareness_clocks_are_rejected() {
    let server = Server::with_persistence(Arc::new(InMemoryStore::new()));
    let (conn, mut rx) = connect(&server, "alice").await;

    let fresh = Frame::new("doc-1", MessageType::Awareness, encode_awareness(&[(42, 5, r#"{"cursor":1}"#)])).encode();
    conn.handle_incoming(fresh, &server).await;

    let stale = Frame::new("doc-1", MessageType::Awareness, encode_awareness(&[(42, 2, r#"{"cursor":9}"#)])).encode();
    conn.handle_incoming(stale, &server).await;

    let query = Frame::new("doc-1", MessageType::QueryAwareness, Vec::new()).encode();
    conn.handle_incoming(query, &server).await;

    let mut awareness_frames = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        let frame = Frame::decode(&bytes).unwrap();
        if frame.message_type == MessageType::Awareness {
            awareness_frames.push(frame.payload);
        }
    }
    let last = awareness_frames.last().expect("at least one awareness frame was sent");
    assert_eq!(decode_awareness(last), vec![(42, 5, r#"{"cursor":1}"#.to_string())]);
}

#[tokio::test]
async fn pending_queue_overflow_reports_and_drops_the_oldest_frame() {
    let store = Arc::new(InMemoryStore::new());
    let config = ServerConfig { pending_queue_capacity: 2, ..ServerConfig::default() };

    let reported: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let reported_clone = reported.clone();
    let error_handler: ycrdt_server::ErrorHandler = Arc::new(move |err| {
        reported_clone.lock().unwrap().push(err.to_string());
    });

    let server = Server::new(config, store, Vec::new(), error_handler);
    let (transport, _rx) = InMemoryTransport::new("unauthenticated");
    let conn = server.accept(transport);

    // Unauthenticated frames queue instead of dispatching; the third push
    // overflows the capacity-2 queue.
    for _ in 0..3 {
        conn.handle_incoming(step1_frame("doc-1", Vec::new()), &server).await;
    }

    assert!(reported.lock().unwrap().iter().any(|msg| msg.contains("overflow")));
}
