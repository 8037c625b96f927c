use thiserror::Error;

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Repository initialization failed: {message}")]
    InitializationError { message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

impl RepositoryError {
    pub fn conversation_not_found(id: impl Into<i64>) -> Self {
        RepositoryError::NotFound {
            entity: "Conversation",
            id: id.into(),
        }
    }

    pub fn tag_not_found(id: impl Into<i64>) -> Self {
        RepositoryError::NotFound {
            entity: "Tag",
            id: id.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
