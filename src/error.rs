/// Error type for the pgmigrate crate.
///
/// Every variant names the protocol phase that produced it, so callers can log
/// a precise diagnosis without inspecting internals. [`Error::AlreadyRunning`]
/// is the one expected, benign outcome under concurrent startup: another
/// instance holds the advisory lock and is performing the run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid run-time configuration, such as a bookkeeping table name that
    /// is not a valid SQL identifier.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Another session holds the advisory lock. Callers in orchestration
    /// contexts typically treat this as "someone else is migrating" and exit
    /// cleanly rather than retrying.
    #[error("another migration run is in progress")]
    AlreadyRunning,

    /// The run's cancel token was triggered before or during the run.
    #[error("migration run cancelled")]
    Cancelled,

    /// The advisory-lock acquisition call itself failed at the transport
    /// level. Distinct from [`Error::AlreadyRunning`], which is contention.
    #[error("failed to acquire advisory lock")]
    AcquireLock(#[source] postgres::Error),

    /// The advisory-lock release call failed at the transport level.
    #[error("failed to release advisory lock")]
    ReleaseLock(#[source] postgres::Error),

    /// The server reported that the advisory lock was not held by this
    /// session at release time.
    #[error("advisory lock was not held by this session")]
    LockNotHeld,

    #[error("failed to begin migration transaction")]
    Begin(#[source] postgres::Error),

    #[error("failed to create bookkeeping table {table}")]
    CreateTable {
        table: String,
        #[source]
        source: postgres::Error,
    },

    #[error("failed to lock bookkeeping table {table}")]
    LockTable {
        table: String,
        #[source]
        source: postgres::Error,
    },

    #[error("failed to read applied versions")]
    ReadApplied(#[source] postgres::Error),

    /// The migration source failed to list its entries or to produce the
    /// body for a listed entry.
    #[error("migration source error for {name}: {message}")]
    Source { name: String, message: String },

    /// Two source entries reduce to the same version string. Detected before
    /// anything is applied, rather than surfacing later as a primary-key
    /// violation on the bookkeeping table.
    #[error("duplicate migration version {0}")]
    DuplicateVersion(String),

    /// A specific migration's SQL body, or the insert recording it, failed.
    /// The whole transaction is rolled back; nothing from this run persists.
    #[error("failed to apply migration {version}")]
    Apply {
        version: String,
        #[source]
        source: postgres::Error,
    },

    /// The finalizing commit failed after every body executed. Nothing from
    /// this run is durable; re-running is safe.
    #[error("failed to commit migrations")]
    Commit(#[source] postgres::Error),
}
