use thiserror::Error;

/// Error taxonomy for the session server. Misuse variants
/// (`ConcurrentTransaction`, `ReentrantMutation`)
/// are fatal only to the call that raised them; protocol errors
/// (`InvalidUpdate`, `InvalidFraming`) close the offending connection;
/// `PersistenceFailure`/`ObserverException`/`QueueOverflow` route to the
/// error-handler hook and never stop the server.
#[derive(Error, Debug)]
pub enum Error {
    #[error("operation on a destroyed document `{0}`")]
    UseAfterClose(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("another mutating transaction is already active on this document")]
    ConcurrentTransaction,

    #[error("observer callback attempted to mutate the document it observes")]
    ReentrantMutation,

    #[error("malformed update bytes: {0}")]
    InvalidUpdate(String),

    #[error("update references operations not yet seen; buffered for retry")]
    PendingCausality,

    #[error("malformed wire frame: {0}")]
    InvalidFraming(String),

    #[error("pending queue overflowed for connection {0}; oldest frame dropped")]
    QueueOverflow(u64),

    #[error("send attempted on a closed transport")]
    TransportClosed,

    #[error("persistence operation failed: {0}")]
    PersistenceFailure(String),

    #[error("observer callback failed: {0}")]
    ObserverException(String),

    #[error("hook chain rejected the operation: {0}")]
    HookReject(String),

    #[error("no document is loaded under name `{0}`")]
    DocumentNotFound(String),

    #[error(transparent)]
    Runtime(#[from] ycrdt_runtime::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
