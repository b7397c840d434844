use leadcheck_model::ModelError;
use thiserror::Error;

/// How the engine treats a failed step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Re-attempted according to the step's retry policy.
    Transient,
    /// Final; the step fails immediately.
    Permanent,
}

#[derive(Error, Debug)]
pub enum LeadError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} ({url})")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("{workflow} failed: {error}")]
    ChildFailed { workflow: String, error: String },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeadError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            LeadError::Http(_)
            | LeadError::HttpStatus { .. }
            | LeadError::Persistence(_)
            | LeadError::Cache(_) => FailureClass::Transient,
            #[cfg(feature = "database")]
            LeadError::Database(err) => database_failure_class(err),
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, LeadError::Cancelled(_))
    }
}

/// Connection and pool failures may clear up; decoding, missing rows and
/// constraint violations fail the same way every time.
#[cfg(feature = "database")]
fn database_failure_class(err: &sqlx::Error) -> FailureClass {
    match err {
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::Encode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Configuration(_) => FailureClass::Permanent,
        sqlx::Error::Database(db)
            if !matches!(db.kind(), sqlx::error::ErrorKind::Other) =>
        {
            FailureClass::Permanent
        }
        _ => FailureClass::Transient,
    }
}

impl From<ModelError> for LeadError {
    fn from(err: ModelError) -> Self {
        LeadError::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LeadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_storage_errors_are_transient() {
        let status = LeadError::HttpStatus {
            status: reqwest::StatusCode::BAD_GATEWAY,
            url: "https://api.example.test".into(),
        };
        assert!(status.is_transient());
        assert!(LeadError::Persistence("connection reset".into()).is_transient());
    }

    #[test]
    fn input_and_control_errors_are_permanent() {
        assert!(!LeadError::InvalidInput("missing run_id".into()).is_transient());
        assert!(!LeadError::TimedOut("finish".into()).is_transient());
        assert!(LeadError::Cancelled("record".into()).is_cancellation());
    }

    #[cfg(feature = "database")]
    #[test]
    fn deterministic_database_errors_are_permanent() {
        assert!(!LeadError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!LeadError::Database(sqlx::Error::ColumnNotFound("status".into())).is_transient());
        assert!(!LeadError::Database(sqlx::Error::Decode("bad uuid".into())).is_transient());
        assert!(LeadError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(LeadError::Database(sqlx::Error::WorkerCrashed).is_transient());
    }
}
