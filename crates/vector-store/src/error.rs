use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already indexed: {0} (use update instead)")]
    AlreadyIndexed(String),

    #[error("Document id appears more than once in a batch: {0}")]
    DuplicateId(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("The {0} operation is not supported by the vector index")]
    Unsupported(&'static str),

    #[error("Durable write failed: {0}")]
    Durability(String),

    #[error("Internal id {id} is beyond index capacity {capacity}")]
    CapacityInvariant { id: u64, capacity: usize },

    #[error("Index capacity exhausted: {required} elements required, max_elements is {max_elements}")]
    CapacityExceeded { required: usize, max_elements: usize },

    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] bincode::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Store is closed")]
    Closed,
}
