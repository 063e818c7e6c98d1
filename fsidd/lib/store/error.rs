use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Database error codes that indicate a transient condition worth retrying.
///
/// The list covers PostgreSQL SQLSTATE codes and SQLite extended result codes, since both report
/// through `sqlx::error::DatabaseError::code`.
const RETRYABLE_ERROR_CODES: &[&str] = &[
    // connection exceptions
    "08006", // connection_failure
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "08P01", // protocol_violation
    // constraint errors
    "23505", // unique_violation
    // transaction rollback, the transaction can be tried again
    "40000", // transaction_rollback
    "40002", // transaction_integrity_constraint_violation
    "40001", // serialization_failure
    "40003", // statement_completion_unknown
    "40P01", // deadlock_detected
    // the server may recover as other clients disconnect or the database grows
    "53000", // insufficient_resources
    "53100", // disk_full
    "53200", // out_of_memory
    "53300", // too_many_connections
    // sqlite
    "5",    // SQLITE_BUSY
    "6",    // SQLITE_LOCKED
    "7",    // SQLITE_NOMEM
    "13",   // SQLITE_FULL
    "261",  // SQLITE_BUSY_RECOVERY
    "262",  // SQLITE_LOCKED_SHAREDCACHE
    "517",  // SQLITE_BUSY_SNAPSHOT
    "773",  // SQLITE_BUSY_TIMEOUT
    "2067", // SQLITE_CONSTRAINT_UNIQUE
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a store operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// An error returned by an [`FsidSource`](super::FsidSource).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row matched the lookup.
    #[error("no rows in result set")]
    NotFound,

    /// The path already has an fsid; another allocator won the race.
    #[error("duplicate key value violates unique constraint: {0}")]
    Conflict(String),

    /// The store could not be reached or is temporarily out of resources.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the operation for a reason that will not go away on retry.
    #[error("{0}")]
    Other(String),

    /// An error raised by the SQL driver.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Classifies an error as transient (retry) or permanent (surface immediately).
pub trait Retryable {
    /// Returns `true` if the failed operation may succeed when attempted again.
    fn is_retryable(&self) -> bool;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StoreError {
    /// Returns `true` for the "no matching row" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound | StoreError::Database(sqlx::Error::RowNotFound)
        )
    }

    /// Returns `true` if the path is already allocated.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` if `code` is in the table of transient database error codes.
pub fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_ERROR_CODES.contains(&code)
}

fn is_retryable_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => {
            db.is_unique_violation() || db.code().is_some_and(|code| is_retryable_code(&code))
        }
        _ => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::NotFound | StoreError::Other(_) => false,
            StoreError::Conflict(_) | StoreError::Unavailable(_) => true,
            StoreError::Database(e) => is_retryable_sqlx(e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
