use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("response {response_id} was already evaluated in session {session_id}")]
    AlreadyEvaluated { session_id: i64, response_id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl EvalError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn session_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "session",
            id,
        }
    }

    pub fn response_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "response",
            id,
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
