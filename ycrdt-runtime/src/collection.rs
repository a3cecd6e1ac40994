use crate::error::{Error, Result};
use crate::transaction::Transaction;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use yrs::{BranchID, Doc, Hook, ReadTxn, SharedRef, Transact, TransactionMut};

/// A shared-type handle that is either `Prelim` (built off-document, not yet
/// integrated anywhere) or `Integrated` (backed by a live branch inside a
/// `Doc`'s op log). Every collaborative container (text, array, map, XML
/// node) is one of these; mutation methods match on the variant and either
/// operate on the plain Rust value directly or route through a transaction.
#[derive(Clone)]
pub enum SharedCollection<P, S> {
    Integrated(Integrated<S>),
    Prelim(P),
}

impl<P, S: SharedRef + 'static> SharedCollection<P, S> {
    #[inline]
    pub fn prelim(prelim: P) -> Self {
        SharedCollection::Prelim(prelim)
    }

    #[inline]
    pub fn integrated(shared_ref: S, doc: Doc) -> Self {
        SharedCollection::Integrated(Integrated::new(shared_ref, doc))
    }

    pub fn id(&self) -> Result<BranchID> {
        match self {
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
            SharedCollection::Integrated(c) => Ok(c.hook.id().clone()),
        }
    }

    pub fn try_integrated(&self) -> Result<(&BranchID, &Doc)> {
        match self {
            SharedCollection::Integrated(i) => Ok((i.hook.id(), &i.doc)),
            SharedCollection::Prelim(_) => Err(Error::InvalidPrelimOp),
        }
    }

    #[inline]
    pub fn is_prelim(&self) -> bool {
        match self {
            SharedCollection::Prelim(_) => true,
            SharedCollection::Integrated(_) => false,
        }
    }

    /// A handle is alive once its branch is still reachable from the
    /// document; a branch deleted by a concurrent transaction resolves to
    /// `None` via the hook lookup.
    pub fn is_alive(&self, txn: &Transaction) -> bool {
        match self {
            SharedCollection::Prelim(_) => true,
            SharedCollection::Integrated(col) => {
                col.hook.get(txn.get_inner().borrow().deref()).is_some()
            }
        }
    }

    #[inline]
    pub fn branch_id(&self) -> Option<&BranchID> {
        match self {
            SharedCollection::Prelim(_) => None,
            SharedCollection::Integrated(v) => Some(v.hook.id()),
        }
    }
}

/// A shared type that has been attached to a `Doc`: a stable `Hook<S>`
/// (survives structural moves inside the op log) plus a cheap clone of the
/// owning `Doc`, used to open ad-hoc transactions when the caller doesn't
/// supply one explicitly.
#[derive(Clone)]
pub struct Integrated<S> {
    pub hook: Hook<S>,
    pub doc: Doc,
}

impl<S: SharedRef + 'static> Integrated<S> {
    pub fn new(shared_ref: S, doc: Doc) -> Self {
        let hook = shared_ref.hook();
        Integrated { hook, doc }
    }

    /// Runs `f` against the resolved shared ref under a read-only view. If
    /// the caller passed an explicit transaction (the common case inside
    /// `Doc::with_transaction`), reuse it rather than opening a new one —
    /// a document allows only one active mutating transaction.
    pub fn readonly<F, R>(&self, txn: Option<Arc<Transaction>>, f: F) -> Result<R>
    where
        F: FnOnce(&S, &TransactionMut<'_>) -> Result<R>,
    {
        match txn {
            Some(txn) => {
                let inner = txn.get_inner();
                let txn = inner.borrow();
                let txn = txn.deref();
                let txn = txn.deref();
                let shared_ref = self.resolve(txn)?;
                f(&shared_ref, txn)
            }
            None => {
                let txn = self.transact_mut()?;
                let shared_ref = self.resolve(&txn)?;
                f(&shared_ref, &txn)
            }
        }
    }

    pub fn mutably<F, T>(&self, txn: Option<Arc<Transaction>>, f: F) -> Result<T>
    where
        F: FnOnce(&S, &mut TransactionMut<'_>) -> Result<T>,
    {
        match txn {
            Some(txn) => {
                let inner = txn.get_inner();
                let mut txn = inner.borrow_mut();
                let txn = txn.deref_mut();
                let shared_ref = self.resolve(txn)?;
                f(&shared_ref, txn)
            }
            None => {
                let mut txn = self.transact_mut()?;
                let shared_ref = self.resolve(&mut txn)?;
                f(&shared_ref, &mut txn)
            }
        }
    }

    pub fn resolve<T: ReadTxn>(&self, txn: &T) -> Result<S> {
        match self.hook.get(txn) {
            Some(shared_ref) => Ok(shared_ref),
            None => Err(Error::RefDisposed),
        }
    }

    pub fn transact(&self) -> Result<yrs::Transaction> {
        self.doc.try_transact().map_err(|_| Error::ConcurrentTransaction)
    }

    pub fn transact_mut(&self) -> Result<TransactionMut> {
        if crate::reentrancy::in_callback() {
            return Err(Error::ReentrantMutation);
        }
        self.doc.try_transact_mut().map_err(|_| Error::AnotherTx)
    }
}
