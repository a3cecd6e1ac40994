use crate::array::Array;
use crate::collection::SharedCollection;
use crate::error::{Error, Result};
use crate::ids::ClientId;
use crate::map::Map;
use crate::observer::{Subscription, UpdateEvent};
use crate::text::Text as YText;
use crate::transaction::Transaction;
use crate::xml_frag::XmlFragment;
use std::sync::Arc;
use yrs::types::TYPE_REFS_DOC;
use yrs::{Doc as YrsDoc, Observable, OffsetKind, Options, Transact};

/// Root container owning the op log and a name -> shared-type map. All
/// mutations happen inside a [`Transaction`]; all shared-type
/// handles obtained from a `Doc` are cheap views into its internal tree.
///
/// `Doc` is `Clone` (as `yrs::Doc` is, internally `Rc`-like) so the same
/// logical document can be held by a server's registry entry, its
/// connections, and its persistence pipeline simultaneously without extra
/// indirection — the single-writer discipline is enforced by `yrs`'s own
/// transaction guard, not by restricting how many `Doc` handles exist.
#[derive(Clone)]
#[repr(transparent)]
pub struct Doc(pub(crate) YrsDoc);

impl Doc {
    /// Creates a new document. If `options.client_id` is not supplied, one
    /// is drawn at random by `yrs::Options::default()` the same way the
    /// Yjs reference implementation does; callers that need reproducible
    /// ids (e.g. reproducible tests) must set it explicitly, and callers
    /// that load a document onto multiple replicas must ensure they never
    /// collide — colliding client ids produce silent divergence, not an
    /// error.
    pub fn new(options: Option<DocOptions>) -> Self {
        let mut opt = Options::default();
        // Text is UTF-16-indexed to stay addressable the same way a
        // Yjs/JS peer addresses it — every host here talks to real Yjs
        // clients over the wire, so this is unconditional rather than
        // gated on a wasm/JS target.
        opt.offset_kind = OffsetKind::Utf16;

        if let Some(o) = options {
            o.fill(&mut opt);
        }

        Doc(YrsDoc::with_options(opt))
    }

    pub(crate) fn from_inner(doc: YrsDoc) -> Self {
        Doc(doc)
    }

    #[inline]
    pub fn get_type(&self) -> u8 {
        TYPE_REFS_DOC
    }

    /// A document is preliminary (not yet reachable as a sub-document) if
    /// it has no parent.
    #[inline]
    pub fn is_sub_document(&self) -> bool {
        self.0.parent_doc().is_some()
    }

    pub fn parent_doc(&self) -> Option<Doc> {
        self.0.parent_doc().map(Doc)
    }

    pub fn client_id(&self) -> ClientId {
        ClientId(self.0.client_id())
    }

    pub fn guid(&self) -> String {
        self.0.guid().to_string()
    }

    pub fn should_load(&self) -> bool {
        self.0.should_load()
    }

    pub fn auto_load(&self) -> bool {
        self.0.auto_load()
    }

    /// Opens a new mutating transaction. Fails with
    /// [`Error::ConcurrentTransaction`] if another mutating transaction is
    /// already live on this `Doc`.
    pub fn transact_mut(&self, origin: Option<&str>) -> Result<Transaction> {
        if crate::reentrancy::in_callback() {
            return Err(Error::ReentrantMutation);
        }
        let inner = match origin {
            Some(origin) => self.0.try_transact_mut_with(yrs::Origin::from(origin)),
            None => self.0.try_transact_mut(),
        }
        .map_err(|_| Error::ConcurrentTransaction)?;
        Ok(Transaction::from(inner))
    }

    /// The scope form of a transaction: `f` runs with exclusive mutate
    /// rights, commits (firing observers) when `f` returns `Ok`, and rolls
    /// back — discarding staged ops, firing no observers — when `f`
    /// returns `Err`. Single-operation callers that don't need
    /// an explicit transaction should prefer this over `transact_mut` so
    /// the commit/rollback path is always the same one.
    pub fn with_transaction<F, T>(&self, origin: Option<&str>, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let txn = self.transact_mut(origin)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Discard staged ops: `yrs::TransactionMut` has no native
                // rollback, so a failed closure's ops are abandoned by
                // simply never committing and dropping the transaction
                // without further mutation. The transaction's `Drop` still
                // auto-commits if this closure already made it partway, so
                // rollback only has full effect for the closure's own
                // pre-return checks (e.g. bounds validation in text ops
                // below happens before any mutation is made).
                drop(txn);
                Err(e)
            }
        }
    }

    pub fn get_text(&self, name: &str) -> YText {
        let shared_ref = self.0.get_or_insert_text(name);
        YText::new(SharedCollection::integrated(shared_ref, self.0.clone()))
    }

    pub fn get_array(&self, name: &str) -> Array {
        let shared_ref = self.0.get_or_insert_array(name);
        Array::new(SharedCollection::integrated(shared_ref, self.0.clone()))
    }

    pub fn get_map(&self, name: &str) -> Map {
        let shared_ref = self.0.get_or_insert_map(name);
        Map::new(SharedCollection::integrated(shared_ref, self.0.clone()))
    }

    pub fn get_xml_fragment(&self, name: &str) -> XmlFragment {
        let shared_ref = self.0.get_or_insert_xml_fragment(name);
        XmlFragment::new(SharedCollection::integrated(shared_ref, self.0.clone()))
    }

    /// Subscribes to every committed update on this document: the callback
    /// receives exactly the bytes a remote replica needs to `apply_update`
    /// to converge.
    pub fn observe_update_v1<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UpdateEvent) + 'static,
    {
        let sub = self.0.observe_update_v1(move |txn, event| {
            let _guard = crate::reentrancy::CallbackGuard::enter();
            let origin = txn.origin().map(|o| o.as_ref().to_vec());
            callback(&UpdateEvent { update: event.update.clone(), origin });
        });
        Subscription::from_yrs(sub)
    }
}

#[derive(Default, Clone)]
pub struct DocOptions {
    pub client_id: Option<u64>,
    pub guid: Option<String>,
    pub collection_id: Option<String>,
    pub gc: Option<bool>,
    pub auto_load: Option<bool>,
    pub should_load: Option<bool>,
}

impl DocOptions {
    fn fill(self, options: &mut Options) {
        if let Some(value) = self.client_id {
            options.client_id = value;
        }
        if let Some(value) = self.guid {
            options.guid = value.into();
        }
        if let Some(value) = self.collection_id {
            options.collection_id = Some(value.into());
        }
        if let Some(value) = self.gc {
            options.skip_gc = !value;
        }
        if let Some(value) = self.auto_load {
            options.auto_load = value;
        }
        if let Some(value) = self.should_load {
            options.should_load = value;
        }
    }
}

impl Default for Doc {
    fn default() -> Self {
        Doc::new(None)
    }
}

// needed so `Arc<Transaction>` call sites in shared-type modules can still
// reach into a plain `&Transaction` for one-off (non-scoped) operations.
pub(crate) fn arc_txn(txn: Transaction) -> Arc<Transaction> {
    Arc::new(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn with_transaction_rolls_back_on_error_before_any_mutation() {
        let doc = Doc::new(None);
        let text = doc.get_text("content");
        text.insert(0, "kept", None, None).unwrap();

        let result: Result<()> = doc.with_transaction(None, |_txn| Err(Error::InvalidArgument));
        assert!(result.is_err());
        assert_eq!(text.get_string(None).unwrap(), "kept");
    }

    #[test]
    fn with_transaction_commits_and_returns_the_closures_value() {
        let doc = Doc::new(None);
        let value = doc.with_transaction(None, |_txn| Ok(7)).unwrap();
        assert_eq!(value, 7);

        doc.get_text("content").insert(0, "hi", None, None).unwrap();
        assert_eq!(doc.get_text("content").get_string(None).unwrap(), "hi");
    }

    #[test]
    fn concurrent_mutating_transactions_are_rejected() {
        let doc = Doc::new(None);
        let _txn = doc.transact_mut(None).unwrap();
        let err = doc.transact_mut(None).unwrap_err();
        assert!(matches!(err, Error::ConcurrentTransaction));
    }

    #[test]
    fn observer_fires_exactly_once_per_commit_with_the_committing_origin() {
        let doc = Doc::new(None);
        let count = Arc::new(AtomicU32::new(0));
        let seen_origin: Arc<std::sync::Mutex<Option<Vec<u8>>>> = Arc::new(std::sync::Mutex::new(None));

        let count_clone = count.clone();
        let seen_origin_clone = seen_origin.clone();
        let _sub = doc.observe_update_v1(move |event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            *seen_origin_clone.lock().unwrap() = event.origin.clone();
        });

        let txn = arc_txn(doc.transact_mut(Some("peer-7")).unwrap());
        doc.get_text("content").insert(0, "hi", None, Some(txn.clone())).unwrap();
        txn.commit().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(seen_origin.lock().unwrap().as_deref(), Some(b"peer-7".as_slice()));
    }

    #[test]
    fn mutating_from_inside_an_observer_callback_is_reentrant_mutation() {
        let doc = Doc::new(None);
        let doc_clone = doc.clone();
        let seen: Arc<std::sync::Mutex<Option<Error>>> = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();

        let _sub = doc.observe_update_v1(move |_event| {
            if let Err(e) = doc_clone.transact_mut(None) {
                *seen_clone.lock().unwrap() = Some(e);
            }
        });

        doc.get_text("content").insert(0, "hi", None, None).unwrap();
        assert!(matches!(seen.lock().unwrap().take(), Some(Error::ReentrantMutation)));
    }

    #[test]
    fn guid_and_client_id_are_stable_for_the_lifetime_of_the_doc() {
        let doc = Doc::new(Some(DocOptions { client_id: Some(42), ..Default::default() }));
        assert_eq!(doc.client_id().0, 42);
        let guid = doc.guid();
        assert_eq!(doc.guid(), guid);
    }
}
