//! Pluggable persistence: `fetch`/`store` plus `list_docs`/`delete_doc`
//! lifecycle operations, shaped after a `CrdtAdapter`-style fetch/store/
//! list/delete contract, narrowed to this crate's single-tenant,
//! opaque-bytes contract.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Backing store for document state. Implementations persist opaque bytes
/// per document name; the only required property is that `store(name,
/// bytes)` followed by `fetch(name)` returns the same bytes. Byte content is
/// always the document's `encode_state_as_update()`.
#[async_trait]
pub trait PersistenceStore: std::fmt::Debug + Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>>;

    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Optional incremental append; `Ok(false)` signals "not supported, fall
    /// back to a full `store`".
    async fn append(&self, _name: &str, _update: &[u8]) -> Result<bool> {
        Ok(false)
    }

    /// Enumerates every document name with persisted state.
    async fn list_docs(&self) -> Result<Vec<String>>;

    /// Removes a document's persisted state entirely.
    async fn delete_doc(&self, name: &str) -> Result<()>;
}

/// In-memory `PersistenceStore`, used by tests the same way
/// `crdt-adapter-redb` and a hypothetical in-memory sibling would both
/// implement `CrdtAdapter` — one persists to disk, this one doesn't.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.docs.lock().await.get(name).cloned())
    }

    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.docs.lock().await.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn list_docs(&self) -> Result<Vec<String>> {
        Ok(self.docs.lock().await.keys().cloned().collect())
    }

    async fn delete_doc(&self, name: &str) -> Result<()> {
        self.docs.lock().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_fetch_returns_the_same_bytes() {
        let store = InMemoryStore::new();
        store.store("doc-a", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.fetch("doc-a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.fetch("doc-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_and_delete_round_trip() {
        let store = InMemoryStore::new();
        store.store("doc-a", vec![1]).await.unwrap();
        store.store("doc-b", vec![2]).await.unwrap();
        let mut names = store.list_docs().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["doc-a".to_string(), "doc-b".to_string()]);

        store.delete_doc("doc-a").await.unwrap();
        assert_eq!(store.fetch("doc-a").await.unwrap(), None);
    }
}
