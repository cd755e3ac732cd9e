use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("invalid row in {table}: {message}")]
    InvalidRow {
        table: &'static str,
        message: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
