// for error definitions
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Stored bytes that do not decode as an integer
    #[error("Value at key {key} is not a valid integer: {value:?}")]
    Parse { key: String, value: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Store unreachable or the connection dropped
    #[error("Store connection error: {0}")]
    Connection(String),

    // Redis authentication errors
    #[error("Store authentication error: {0}")]
    Auth(String),

    /// Command rejected by the store
    #[error("Store command error: {0}")]
    Command(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// Key not found in storage
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A watched key kept changing until the retry budget ran out
    #[error("Transaction on key {key} aborted after {attempts} attempts")]
    TransactionAborted { key: String, attempts: usize },
}

impl KvError {
    pub fn not_found(key: &str) -> Self {
        KvError::Storage(StorageError::KeyNotFound(key.to_string()))
    }

    pub fn command(msg: impl Into<String>) -> Self {
        KvError::Storage(StorageError::Command(msg.into()))
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        KvError::Storage(StorageError::Connection(msg.into()))
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, KvError::Storage(StorageError::Connection(_)))
    }

    pub fn is_command_error(&self) -> bool {
        matches!(self, KvError::Storage(StorageError::Command(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::Storage(StorageError::KeyNotFound(_)))
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, KvError::Parse { .. })
    }
}

impl From<StorageError> for KvError {
    fn from(err: StorageError) -> Self {
        KvError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            return KvError::connection(err.to_string());
        }

        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                // authentication errors
                KvError::Storage(StorageError::Auth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                KvError::connection(err.to_string())
            }
            _ => {
                // Command/operation related errors
                KvError::command(err.to_string())
            }
        }
    }
}

// implement conversions from serde_json::Error to KvError
impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, KvError>;
