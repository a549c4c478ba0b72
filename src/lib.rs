//! `pgmigrate` applies a directory of versioned SQL files to a PostgreSQL
//! database exactly once each, in deterministic order, safely under
//! concurrent invocation from multiple independent processes.
//!
//! # Motivation
//!
//! In a deployment pipeline several instances of an application may start
//! simultaneously, each trying to bring the schema up to date. At most one
//! of them must actually perform the work; the rest must detect this and
//! return immediately. `pgmigrate` coordinates the race with a PostgreSQL
//! session-scoped advisory lock: the winner applies every pending migration
//! inside a single transaction, the losers get [`Error::AlreadyRunning`] and
//! exit without touching anything.
//!
//! # How a run works
//!
//! 1. Take a non-blocking advisory lock on the caller's session. Contention
//!    is not an error to retry; it means another instance owns the run.
//! 2. In one transaction: create the bookkeeping table if absent, take an
//!    exclusive table lock on it (defense in depth), read the set of
//!    already-applied versions, and diff it against the source.
//! 3. Apply each pending `.sql` body in ascending lexicographic version
//!    order, recording each version in the bookkeeping table as it goes.
//! 4. Commit everything together, then release the advisory lock. Any
//!    failure along the way rolls the whole run back; re-running is always
//!    safe because nothing partial was committed.
//!
//! # Example
//!
//! ```no_run
//! use postgres::{Client, NoTls};
//! use pgmigrate::{DirSource, Error, Migrator};
//!
//! let mut client = Client::connect("postgres://app@localhost/app", NoTls)?;
//! let migrator = Migrator::new(DirSource::new("./migrations"));
//! match migrator.run(&mut client) {
//!     Ok(report) => println!("applied: {:?}", report.applied),
//!     // Another instance is migrating; nothing to do.
//!     Err(Error::AlreadyRunning) => {}
//!     Err(err) => return Err(err.into()),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Migration files need a fixed-width numeric prefix for correct ordering
//! (`0001_create_users.sql`, `0002_add_email.sql`, ...). The version is the
//! file name without its `.sql` suffix; anything else in the source is
//! ignored. Forward-only by design: there is no `down` support, and bodies
//! must be statements that can execute inside a transaction.
//!
//! Migrations can also ship inside the binary via [`StaticSource`] and
//! [`include_str!`], or come from any custom [`MigrationSource`]. The
//! advisory-lock primitive itself is pluggable through [`LockStrategy`] for
//! deployments that need a different mutual-exclusion mechanism.

mod error;
pub use error::Error;

mod source;
pub use source::{DirSource, MigrationSource, StaticSource};

mod lock;
pub use lock::{AdvisoryLock, LockStrategy};

mod migrator;
pub use migrator::{
    AppliedMigration, CancelToken, MigrationReport, Migrator, DEFAULT_LOCK_ID,
    DEFAULT_TABLE_NAME,
};

#[cfg(test)]
pub(crate) mod test_support;
