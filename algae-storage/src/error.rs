use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Persistence read error: {0}")]
    PersistenceRead(String),

    #[error("Persistence write error: {0}")]
    PersistenceWrite(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
