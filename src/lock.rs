//! Run-wide mutual exclusion between independent migrator processes.
//!
//! The lock must be scoped to a single database session, independent of any
//! transaction: transaction-scoped locking would be dropped at transaction
//! boundaries inside the run. Because a sync [`postgres::Client`] is exactly
//! one session, holding the client for the whole run guarantees the lock
//! cannot be silently dropped by pool recycling between acquire and release.

use postgres::Client;

use crate::error::Error;

/// Strategy for the run-wide mutual-exclusion lock.
///
/// `try_acquire` must be non-blocking: it returns `false` immediately when
/// another session holds the token rather than waiting. The shipped
/// implementation is [`AdvisoryLock`]; porting to an engine without advisory
/// locks means substituting an equivalent session-scoped primitive (a lock
/// table with a conditional insert, for example) behind this trait.
pub trait LockStrategy {
    /// Attempt a non-blocking acquisition of the session-scoped lock
    /// identified by `token`. Returns `true` iff acquired.
    fn try_acquire(&self, client: &mut Client, token: i64) -> Result<bool, Error>;

    /// Release a previously acquired lock on the same session. Returns
    /// [`Error::LockNotHeld`] if the server reports the lock was not held.
    fn release(&self, client: &mut Client, token: i64) -> Result<(), Error>;
}

/// PostgreSQL session-scoped advisory locking
/// (`pg_try_advisory_lock` / `pg_advisory_unlock`).
///
/// The token is a database-wide resource: every instance coordinating on the
/// same schema must use the same value. The lock survives until released or
/// until the session terminates, whichever comes first.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvisoryLock;

impl LockStrategy for AdvisoryLock {
    fn try_acquire(&self, client: &mut Client, token: i64) -> Result<bool, Error> {
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&token])
            .map_err(Error::AcquireLock)?;
        Ok(row.get(0))
    }

    fn release(&self, client: &mut Client, token: i64) -> Result<(), Error> {
        let row = client
            .query_one("SELECT pg_advisory_unlock($1)", &[&token])
            .map_err(Error::ReleaseLock)?;
        let released: bool = row.get(0);
        if !released {
            return Err(Error::LockNotHeld);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fresh_db, session_on};

    #[test]
    fn advisory_lock_excludes_other_sessions() {
        let (mut first, db_name) = fresh_db();
        let mut second = session_on(&db_name);
        let lock = AdvisoryLock;

        assert!(lock.try_acquire(&mut first, 7001).unwrap());
        // Same session re-acquires (advisory locks stack per session).
        assert!(lock.try_acquire(&mut first, 7001).unwrap());
        lock.release(&mut first, 7001).unwrap();

        // Still held once by the first session.
        assert!(!lock.try_acquire(&mut second, 7001).unwrap());

        lock.release(&mut first, 7001).unwrap();
        assert!(lock.try_acquire(&mut second, 7001).unwrap());
        lock.release(&mut second, 7001).unwrap();
    }

    #[test]
    fn release_without_hold_reports_not_held() {
        let (mut client, _db_name) = fresh_db();
        let err = AdvisoryLock.release(&mut client, 7002).unwrap_err();
        assert!(matches!(err, Error::LockNotHeld));
    }
}
