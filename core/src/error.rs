use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden operation: {0}")]
    ForbiddenOperation(String),

    #[error("Unknown relation '{0}'")]
    UnknownRelation(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Map a rusqlite write error to the domain error it represents, so
    /// ingestion reports constraint breaches as integrity violations
    /// instead of opaque database failures.
    pub fn from_sqlite_write(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::Integrity(
                    msg.clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            _ => CoreError::Database(err),
        }
    }
}
