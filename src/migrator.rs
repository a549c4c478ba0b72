//! The migration engine: at-most-once, all-or-nothing application of
//! pending SQL migrations under distributed mutual exclusion.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use postgres::Client;

use crate::error::Error;
use crate::lock::{AdvisoryLock, LockStrategy};
use crate::source::{sorted_versions, MigrationSource};

/// Default name of the bookkeeping table.
pub const DEFAULT_TABLE_NAME: &str = "schema_migrations";

/// Default advisory-lock identifier: the 64-bit FNV-1a hash of "pgmigrate".
///
/// Every instance coordinating on the same schema must agree on this value;
/// override it with [`Migrator::with_lock_id`] if it collides with another
/// advisory-lock user in your database.
pub const DEFAULT_LOCK_ID: i64 = 2380160182163437269;

type AppliedHook = Box<dyn Fn(&str) + Send + Sync>;

/// A cloneable cancellation flag checked at each blocking point of a run:
/// before lock acquisition, before each migration body, and before commit.
///
/// Cancelling mid-run aborts the transaction (rolling back every statement
/// of the run) and still releases the advisory lock on the way out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Whether this run created the bookkeeping table.
    pub table_created: bool,
    /// Versions applied by this run, in application order. Empty when the
    /// database was already up to date (an idempotent re-run).
    pub applied: Vec<String>,
}

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies a source of versioned `.sql` files to a PostgreSQL database
/// exactly once each, in lexicographic version order, within a single
/// transaction, under a session-scoped advisory lock.
///
/// Construct with [`Migrator::new`] and hand [`Migrator::run`] a dedicated
/// [`postgres::Client`]. The client is one database session; it must not be
/// shared with other concurrent work for the duration of the run, because
/// the advisory lock lives in its session state.
///
/// ```no_run
/// use postgres::{Client, NoTls};
/// use pgmigrate::{DirSource, Migrator};
///
/// let mut client = Client::connect("postgres://app@localhost/app", NoTls)?;
/// let migrator = Migrator::new(DirSource::new("./migrations"));
/// match migrator.run(&mut client) {
///     Ok(report) => println!("applied {} migrations", report.applied.len()),
///     Err(pgmigrate::Error::AlreadyRunning) => println!("another instance is migrating"),
///     Err(err) => return Err(err.into()),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Migrator<S> {
    source: S,
    table_name: String,
    lock_id: i64,
    lock: Box<dyn LockStrategy + Send + Sync>,
    on_applied: Option<AppliedHook>,
    cancel: Option<CancelToken>,
}

impl<S: MigrationSource> Migrator<S> {
    /// Create a migrator over `source` with default configuration:
    /// bookkeeping table [`DEFAULT_TABLE_NAME`], lock id [`DEFAULT_LOCK_ID`],
    /// PostgreSQL advisory locking, and no applied-migration hook.
    pub fn new(source: S) -> Self {
        Self {
            source,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            lock_id: DEFAULT_LOCK_ID,
            lock: Box::new(AdvisoryLock),
            on_applied: None,
            cancel: None,
        }
    }

    /// Set the name of the bookkeeping table. May be schema-qualified
    /// (`myschema.my_migrations`); validated against SQL identifier rules at
    /// run time because it is interpolated into DDL.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Set the advisory-lock identifier used for run-wide mutual exclusion.
    pub fn with_lock_id(mut self, id: i64) -> Self {
        self.lock_id = id;
        self
    }

    /// Substitute the mutual-exclusion strategy. The default is
    /// [`AdvisoryLock`].
    pub fn with_lock_strategy(
        mut self,
        strategy: impl LockStrategy + Send + Sync + 'static,
    ) -> Self {
        self.lock = Box::new(strategy);
        self
    }

    /// Attach a cancellation token. See [`CancelToken`].
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set a callback invoked with each version as it is applied, before the
    /// run commits. Defaults to nothing.
    pub fn on_migration_applied<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_applied = Some(Box::new(callback));
        self
    }

    /// Apply all pending migrations.
    ///
    /// Exactly one concurrent caller (across processes) wins the advisory
    /// lock and performs the work; the rest get [`Error::AlreadyRunning`]
    /// without touching the bookkeeping table. The winner applies the whole
    /// pending set inside one transaction: either every pending version
    /// commits together with its bookkeeping rows, or none do. Zero pending
    /// versions is a successful no-op.
    ///
    /// The advisory lock is released on every return path once acquired. A
    /// release failure after the run's outcome is already determined is
    /// logged (under the `tracing` feature) rather than returned; if the
    /// session dies the server releases the lock itself.
    pub fn run(&self, client: &mut Client) -> Result<MigrationReport, Error> {
        validate_table_name(&self.table_name)?;
        self.check_cancelled()?;

        if !self.lock.try_acquire(client, self.lock_id)? {
            return Err(Error::AlreadyRunning);
        }

        let result = self.run_locked(client);

        if let Err(_release_err) = self.lock.release(client, self.lock_id) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                error = %_release_err,
                lock_id = self.lock_id,
                "failed to release advisory lock after migration run"
            );
        }

        result
    }

    fn run_locked(&self, client: &mut Client) -> Result<MigrationReport, Error> {
        let mut tx = client.transaction().map_err(Error::Begin)?;

        let table_existed: bool = tx
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&self.table_name])
            .map_err(|e| Error::CreateTable {
                table: self.table_name.clone(),
                source: e,
            })?
            .get(0);

        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table_name
        ))
        .map_err(|e| Error::CreateTable {
            table: self.table_name.clone(),
            source: e,
        })?;

        // The advisory lock is the primary mechanism; the table lock
        // additionally serializes the read-diff-write sequence against any
        // transaction reaching this table through some other path.
        tx.batch_execute(&format!(
            "LOCK TABLE {} IN ACCESS EXCLUSIVE MODE",
            self.table_name
        ))
        .map_err(|e| Error::LockTable {
            table: self.table_name.clone(),
            source: e,
        })?;

        let applied: HashSet<String> = tx
            .query(
                &format!("SELECT version FROM {}", self.table_name),
                &[],
            )
            .map_err(Error::ReadApplied)?
            .into_iter()
            .map(|row| row.get(0))
            .collect();

        let versions = sorted_versions(self.source.names()?)?;

        let mut report = MigrationReport {
            table_created: !table_existed,
            applied: Vec::new(),
        };

        let insert_sql = format!(
            "INSERT INTO {} (version) VALUES ($1)",
            self.table_name
        );

        for (version, name) in versions {
            if applied.contains(&version) {
                continue;
            }
            self.check_cancelled()?;

            let body = self.source.body(&name)?;
            tx.batch_execute(&body).map_err(|e| Error::Apply {
                version: version.clone(),
                source: e,
            })?;
            tx.execute(&insert_sql, &[&version])
                .map_err(|e| Error::Apply {
                    version: version.clone(),
                    source: e,
                })?;

            #[cfg(feature = "tracing")]
            tracing::info!(version = %version, "applied migration");

            if let Some(callback) = &self.on_applied {
                callback(&version);
            }
            report.applied.push(version);
        }

        self.check_cancelled()?;
        tx.commit().map_err(Error::Commit)?;
        Ok(report)
    }

    /// Read the bookkeeping table, ordered by version. Returns an empty list
    /// if the table does not exist (no run has ever completed).
    pub fn applied_history(&self, client: &mut Client) -> Result<Vec<AppliedMigration>, Error> {
        validate_table_name(&self.table_name)?;

        let exists: bool = client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&self.table_name])
            .map_err(Error::ReadApplied)?
            .get(0);
        if !exists {
            return Ok(Vec::new());
        }

        let rows = client
            .query(
                &format!(
                    "SELECT version, applied_at FROM {} ORDER BY version",
                    self.table_name
                ),
                &[],
            )
            .map_err(Error::ReadApplied)?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                version: row.get(0),
                applied_at: row.get(1),
            })
            .collect())
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// The table name is interpolated into DDL, so restrict it to plain
/// (optionally schema-qualified) SQL identifiers.
fn validate_table_name(name: &str) -> Result<(), Error> {
    let mut parts = name.split('.');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(table), None, None) => is_identifier(table),
        (Some(schema), Some(table), None) => is_identifier(schema) && is_identifier(table),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid bookkeeping table name: {name:?}"
        )))
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
