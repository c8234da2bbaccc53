use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, SqliteStoreError>;

impl From<SqliteStoreError> for tether_session::Error {
    fn from(err: SqliteStoreError) -> Self {
        tether_session::Error::Persistence(err.to_string())
    }
}
