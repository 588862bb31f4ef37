//! Change-tracked cache error hierarchy
//!
//! Errors are grouped by the layer that raised them: infrastructure faults
//! (network, storage, serialization), configuration problems, and cache API
//! misuse. Transport faults on the notification channel are handled by the
//! channel manager and normally never reach callers.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cache API misuse
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Service unavailable")]
    ServerUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Caller passed an empty key, resource name or similar
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A one-shot key callback is already pending for this key
    #[error("Callback already registered for key {0}")]
    CallbackAlreadyRegistered(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Socket connect failed
    #[error("Connect failed: {0}")]
    ConnectError(String),

    /// Malformed endpoint address
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// The duplex channel is gone (peer closed or faulted)
    #[error("Notification channel closed")]
    ChannelClosed,

    /// Single attempt exceeded its deadline
    #[error("Retry timeout after {0:?}")]
    RetryTimeoutError(Duration),

    /// Bounded retry strategy ran out of attempts
    #[error("{op} failed after {attempts} attempts")]
    RetryExhausted { op: &'static str, attempts: u32 },

    /// Retry loop stopped by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    SignalSendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Key-value backend rejected the operation
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

// ============== Conversion Implementations ============== //

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::System(SystemError::Serialization(SerializationError::Bincode(e)))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(e)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        NetworkError::TonicStatusError(Box::new(status)).into()
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        NetworkError::TaskFailed(e).into()
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Cache(CacheError::InvalidArgument(msg)) => tonic::Status::invalid_argument(msg),
            Error::System(SystemError::ServerUnavailable) => {
                tonic::Status::unavailable("Service unavailable")
            }
            Error::System(SystemError::Network(NetworkError::TonicStatusError(status))) => {
                *status
            }
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

impl Error {
    /// True when retrying the same operation cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Cache(_)
                | Error::Config(_)
                | Error::Fatal(_)
                | Error::System(SystemError::Network(NetworkError::InvalidURI(_)))
        )
    }
}
