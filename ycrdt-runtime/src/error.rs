use thiserror::Error;

/// Error taxonomy for the document runtime. Variants that are
/// caller-misuse (`ConcurrentTransaction`, `ReentrantMutation`, `UseAfterClose`)
/// are fatal only to the call that raised them; the `Doc` and its other
/// shared-type handles remain usable afterwards.
#[derive(Error, Debug)]
pub enum Error {
    #[error("shared type has been destroyed or is not yet integrated into a document")]
    RefDisposed,

    #[error("transaction is already committed")]
    TxnCommitted,

    #[error("another read-only transaction is in progress")]
    AnotherTx,

    #[error("another mutating transaction is already active on this document")]
    ConcurrentTransaction,

    #[error("observer callback attempted to mutate the document it is observing")]
    ReentrantMutation,

    #[error("preliminary (not yet integrated) shared type doesn't support this operation")]
    InvalidPrelimOp,

    #[error("a preliminary shared type cannot be nested twice")]
    NotPrelim,

    #[error("given value cannot be used as formatting attributes")]
    InvalidFmt,

    #[error("invalid delta format")]
    InvalidDelta,

    #[error("argument out of range or otherwise invalid for this operation")]
    InvalidArgument,

    #[error("unexpected value shape: {0}")]
    InvalidData(String),

    #[error("malformed update or state-vector bytes: {0}")]
    InvalidUpdate(String),

    #[error("update references operations this document has not seen yet")]
    PendingCausality,

    #[error("update's parent type does not match this document's structure")]
    InvalidParent,

    #[error("operation on a destroyed document")]
    UseAfterClose,

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;
