//! Error taxonomy shared by every store client and orchestrator.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sqlx::mysql::MySqlDatabaseError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// The external system an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    ObjectStore,
    Database,
    LabelService,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Store::ObjectStore => f.write_str("object store"),
            Store::Database => f.write_str("database"),
            Store::LabelService => f.write_str("label service"),
        }
    }
}

/// Which best-effort labeling stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStage {
    Detection,
    Insert,
}

impl fmt::Display for LabelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelStage::Detection => f.write_str("label detection"),
            LabelStage::Insert => f.write_str("label insert"),
        }
    }
}

/// Errors produced by store clients and orchestrators
#[derive(Error, Debug)]
pub enum Error {
    /// No such user, asset or object
    #[error("no such {entity}: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Network, timeout or throttling failure worth retrying
    #[error("{store} unavailable: {message}")]
    Transient { store: Store, message: String },

    /// The store refused the request and would refuse it again
    #[error("{store} rejected request: {message}")]
    Rejected { store: Store, message: String },

    /// Configuration does not match the identity it is expected to carry
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Optional enrichment failed; never surfaced past the upload pipeline
    #[error("{stage} failed: {source}")]
    BestEffort {
        stage: LabelStage,
        #[source]
        source: Box<Error>,
    },

    /// Asset rows were truncated but the purge did not finish.
    ///
    /// Truncation commits on its own, so the rows are gone and `keys` is the
    /// only remaining record of the objects they referenced. Never retried.
    #[error("asset rows deleted but purge did not finish: {source}")]
    PurgeIncomplete {
        keys: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Coarse classification used at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Transient,
    Rejected,
    Integrity,
    BestEffort,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// HTTP status a transport layer should answer with
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Integrity => 409,
            ErrorKind::Rejected => 502,
            ErrorKind::Transient => 503,
            ErrorKind::BestEffort | ErrorKind::Internal => 500,
        }
    }
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn best_effort(stage: LabelStage, source: Error) -> Self {
        Error::BestEffort {
            stage,
            source: Box::new(source),
        }
    }

    pub fn purge_incomplete(keys: Vec<String>, source: Error) -> Self {
        Error::PurgeIncomplete {
            keys,
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::BestEffort { .. } => ErrorKind::BestEffort,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::PurgeIncomplete { .. } | Error::Io { .. } | Error::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the retry executor may attempt the operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Classify a database driver error.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| is_transient_mysql_error(e.number()))
                .unwrap_or(false),
            _ => false,
        };

        let message = err.to_string();
        if transient {
            Error::Transient {
                store: Store::Database,
                message,
            }
        } else {
            Error::Rejected {
                store: Store::Database,
                message,
            }
        }
    }

    /// Classify an AWS SDK error from either S3 or Rekognition.
    pub(crate) fn from_sdk<E, R>(store: Store, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: fmt::Debug + Send + Sync + 'static,
    {
        let transient = match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                true
            }
            SdkError::ServiceError(ctx) => is_transient_aws_code(ctx.err().code()),
            _ => false,
        };

        let message = DisplayErrorContext(&err).to_string();
        if transient {
            Error::Transient { store, message }
        } else {
            Error::Rejected { store, message }
        }
    }
}

/// Lock wait timeout, deadlock, and lost/gone server connections
fn is_transient_mysql_error(number: u16) -> bool {
    matches!(number, 1205 | 1213 | 2006 | 2013 | 1040 | 1053)
}

fn is_transient_aws_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some(
            "InternalError"
                | "InternalServerError"
                | "ServiceUnavailable"
                | "ServiceUnavailableException"
                | "SlowDown"
                | "Throttling"
                | "ThrottlingException"
                | "ThrottledException"
                | "ProvisionedThroughputExceededException"
                | "LimitExceededException"
                | "RequestTimeout"
                | "RequestTimeoutException"
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        let transient = Error::Transient {
            store: Store::ObjectStore,
            message: "connection reset".to_string(),
        };
        assert!(transient.is_transient());

        assert!(!Error::not_found("asset", 1001).is_transient());
        assert!(!Error::Integrity("mismatch".to_string()).is_transient());
        assert!(!Error::Rejected {
            store: Store::Database,
            message: "duplicate key".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("user", 7).kind().status_code(), 404);
        assert_eq!(
            Error::InvalidInput("no file name".to_string())
                .kind()
                .status_code(),
            400
        );
        assert_eq!(ErrorKind::Transient.status_code(), 503);
        assert_eq!(ErrorKind::Rejected.status_code(), 502);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }

    #[test]
    fn test_sqlx_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(Error::from_sqlx(sqlx::Error::Io(io)).is_transient());
        assert!(Error::from_sqlx(sqlx::Error::PoolTimedOut).is_transient());
        assert_eq!(
            Error::from_sqlx(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn test_aws_codes() {
        assert!(is_transient_aws_code(Some("SlowDown")));
        assert!(is_transient_aws_code(Some("ThrottlingException")));
        assert!(!is_transient_aws_code(Some("AccessDenied")));
        assert!(!is_transient_aws_code(None));
    }

    #[test]
    fn test_mysql_numbers() {
        assert!(is_transient_mysql_error(1213));
        assert!(is_transient_mysql_error(1205));
        assert!(!is_transient_mysql_error(1062));
    }

    #[test]
    fn test_incomplete_purge_is_not_retried() {
        let err = Error::purge_incomplete(
            vec!["p_sarkar/1-a.jpg".to_string()],
            Error::Transient {
                store: Store::Database,
                message: "Lost connection to MySQL server during query".to_string(),
            },
        );
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_best_effort_display_names_stage() {
        let err = Error::best_effort(
            LabelStage::Insert,
            Error::Transient {
                store: Store::Database,
                message: "gone away".to_string(),
            },
        );
        assert!(err.to_string().starts_with("label insert failed"));
        assert_eq!(err.kind(), ErrorKind::BestEffort);
    }
}
