use crate::error::Error;
use crate::error::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::block::ClientID;
use yrs::error::UpdateError;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, StateVector, TransactionMut, Update};

/// The live `yrs` transaction a [`Transaction`] wraps.
///
/// SAFETY NOTE: we erase the lifetime of `TransactionMut` to `'static`
/// below and rely on the embedding crate's guarantee that a given
/// `Transaction` is only used from the thread that created it (though that
/// thread may change between calls, as with the ywasm/pyo3 bindings this
/// crate descends from). `ycrdt-server` upholds this by keeping a
/// document's transactions scoped to a single `with_transaction` call,
/// never leaking a `Transaction` handle across an await point.
pub struct TransactionInner {
    pub inner: ManuallyDrop<TransactionMut<'static>>,
    pub committed: bool,
}

impl ReadTxn for TransactionInner {
    fn store(&self) -> &yrs::Store {
        self.deref().store()
    }
}

impl Deref for TransactionInner {
    type Target = TransactionMut<'static>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for TransactionInner {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if !self.committed {
            // Implicit single-op transactions (no explicit `with_transaction`
            // scope) commit here, preserving observer-ordering guarantees.
            // `commit()` itself drops `self.inner`; nothing left to do after.
            let _ = self.commit();
        }
    }
}

impl TransactionInner {
    pub fn new(txn: TransactionMut<'static>) -> Self {
        TransactionInner {
            inner: ManuallyDrop::new(txn),
            committed: false,
        }
    }

    /// Triggers the post-update housekeeping (compaction, observer dispatch)
    /// without dropping the transaction. Calling this twice is an error —
    /// unlike `Drop`, a second explicit `commit()` should surface the
    /// mistake rather than silently no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(Error::TxnCommitted);
        }
        self.deref_mut().commit();
        self.committed = true;
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        Ok(())
    }
}

/// A scoped, exclusive mutation context for a [`crate::Doc`]. Obtained via `Doc::transact_mut` / `Doc::with_transaction`; drops (and
/// thus commits, if not already committed) when it goes out of scope.
pub struct Transaction {
    inner: Arc<RefCell<TransactionInner>>,
}

// SAFETY: see the note on `TransactionInner`. The embedding application
// (ycrdt-server) guarantees a `Transaction` is never used concurrently from
// two threads and never held across an `.await`.
unsafe impl Sync for Transaction {}
unsafe impl Send for Transaction {}

impl Transaction {
    pub fn get_inner(&self) -> Arc<RefCell<TransactionInner>> {
        self.inner.clone()
    }

    fn try_apply(&self, update: Update) -> Result<()> {
        self.get_inner().borrow_mut().apply_update(update).map_err(|e| match e {
            UpdateError::InvalidParent(_, _) => Error::InvalidParent,
        })
    }

    /// State vector as it stood when this transaction began — the baseline
    /// per-commit delta accounting measures against.
    pub fn before_state(&self) -> HashMap<ClientID, u32> {
        self.get_inner()
            .borrow()
            .before_state()
            .iter()
            .map(|(x, y)| (*x, *y))
            .collect()
    }

    pub fn after_state(&self) -> HashMap<ClientID, u32> {
        self.get_inner()
            .borrow()
            .after_state()
            .iter()
            .map(|(x, y)| (*x, *y))
            .collect()
    }

    pub fn origin(&self) -> Option<Vec<u8>> {
        let inner = self.get_inner();
        let inner = inner.borrow();
        Some(inner.origin()?.as_ref().to_vec())
    }

    /// Triggers the post-update housekeeping without releasing the
    /// transaction handle. Transactions auto-commit on drop; calling this
    /// explicitly is only needed when a caller wants observers to fire
    /// before the scope ends.
    pub fn commit(&self) -> Result<()> {
        self.get_inner().borrow_mut().commit()
    }

    /// Encodes the state vector of this transaction's document using lib0
    /// v1 encoding — an external-compatibility surface, must be
    /// byte-for-byte identical to Yjs.
    pub fn state_vector_v1(&self) -> Vec<u8> {
        self.get_inner().borrow().state_vector().encode_v1()
    }

    pub fn state_vector_v2(&self) -> Vec<u8> {
        self.get_inner().borrow().state_vector().encode_v2()
    }

    /// Encodes every op this document has that `vector` doesn't. An empty
    /// vector requests the full history.
    pub fn diff_v1(&self, vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(vector).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
        Ok(self.get_inner().borrow().encode_diff_v1(&sv))
    }

    pub fn diff_v2(&self, vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v2(vector).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
        Ok(self.get_inner().borrow().encode_diff_v2(&sv))
    }

    /// Applies a remote update encoded with lib0 v1. Updates whose causal
    /// predecessors are missing are buffered internally by `yrs` and
    /// retried on the next `apply_*` call rather than surfaced as an error.
    pub fn apply_v1(&self, diff: &[u8]) -> Result<()> {
        let update = Update::decode_v1(diff).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
        self.try_apply(update)
    }

    pub fn apply_v2(&self, diff: &[u8]) -> Result<()> {
        let update = Update::decode_v2(diff).map_err(|e| Error::InvalidUpdate(e.to_string()))?;
        self.try_apply(update)
    }

    pub fn encode_update_v1(&self) -> Vec<u8> {
        self.get_inner().borrow().encode_update_v1()
    }

    pub fn encode_update_v2(&self) -> Vec<u8> {
        self.get_inner().borrow().encode_update_v2()
    }

    /// Forces garbage collection of tombstoned items regardless of the
    /// parent `Doc`'s `gc` option. Garbage collection itself is out of
    /// scope for the runtime's correctness contract, but the escape hatch
    /// is kept for callers that manage memory explicitly.
    pub fn gc(&self) -> Result<()> {
        self.get_inner().borrow_mut().gc(None);
        Ok(())
    }
}

impl<'doc> From<TransactionMut<'doc>> for Transaction {
    fn from(value: TransactionMut<'doc>) -> Self {
        // SAFETY: see the note on `TransactionInner`.
        let txn: TransactionMut<'static> = unsafe { std::mem::transmute(value) };
        Transaction {
            inner: Arc::new(RefCell::new(TransactionInner::new(txn))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::doc::Doc;
    use crate::error::Error;

    #[test]
    fn explicit_commit_twice_is_rejected() {
        let doc = Doc::new(None);
        let txn = doc.transact_mut(None).unwrap();
        txn.commit().unwrap();
        assert!(matches!(txn.commit(), Err(Error::TxnCommitted)));
    }

    #[test]
    fn diff_v1_against_an_empty_vector_returns_the_full_history() {
        let doc = Doc::new(None);
        doc.get_text("content").insert(0, "hi", None, None).unwrap();

        let txn = doc.transact_mut(None).unwrap();
        let diff = txn.diff_v1(&[]).unwrap();
        txn.commit().unwrap();

        let replica = Doc::new(None);
        crate::update::apply_update(&replica, &diff, None).unwrap();
        assert_eq!(replica.get_text("content").get_string(None).unwrap(), "hi");
    }

    #[test]
    fn after_state_reflects_ops_made_within_the_transaction() {
        let doc = Doc::new(None);
        let txn = doc.transact_mut(None).unwrap();
        assert_eq!(txn.before_state(), txn.after_state());
        txn.commit().unwrap();

        let txn = crate::doc::arc_txn(doc.transact_mut(None).unwrap());
        let before = txn.before_state();
        doc.get_text("content").insert(0, "x", None, Some(txn.clone())).unwrap();
        assert_ne!(before, txn.after_state());
        txn.commit().unwrap();
    }

    #[test]
    fn origin_round_trips_through_a_committed_transaction() {
        let doc = Doc::new(None);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        let _sub = doc.observe_update_v1(move |event| {
            assert_eq!(event.origin.as_deref(), Some(b"import".as_slice()));
            fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let txn = crate::doc::arc_txn(doc.transact_mut(Some("import")).unwrap());
        assert_eq!(txn.origin(), Some(b"import".to_vec()));
        doc.get_text("content").insert(0, "hi", None, Some(txn.clone())).unwrap();
        txn.commit().unwrap();

        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
