use std::fmt;

use thiserror::Error;

/// Why a repository call failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseErrorKind {
    /// Pool timed out or closed, or the socket dropped. Safe to retry.
    #[error("database unavailable: {message}")]
    Unavailable { message: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Unique or foreign-key constraint rejected the write
    #[error("constraint '{constraint}' violated")]
    Conflict { constraint: String },

    #[error("column '{column}' holds an unreadable value: {message}")]
    Decode { column: String, message: String },

    #[error("transaction failed: {message}")]
    Transaction { message: String },

    #[error("query failed: {message}")]
    Query { message: String },
}

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    /// Operation that was running, e.g. "insert order"
    pub context: Option<String>,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind, context: None }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn decode<S: Into<String>, M: fmt::Display>(column: S, message: M) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            column: column.into(),
            message: message.to_string(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Conflict { .. })
    }

    pub fn from_sqlx(error: sqlx::Error) -> Self {
        let kind = match error {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "?".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Unavailable {
                    message: error.to_string(),
                }
            }
            sqlx::Error::ColumnDecode { index, source } => DatabaseErrorKind::Decode {
                column: index,
                message: source.to_string(),
            },
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation, foreign_key_violation
                Some("23505") | Some("23503") => DatabaseErrorKind::Conflict {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                _ => DatabaseErrorKind::Query {
                    message: db_err.message().to_string(),
                },
            },
            other => DatabaseErrorKind::Query {
                message: other.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for DatabaseError {}
