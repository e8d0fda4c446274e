//! Cross-process mutual exclusion for everything that reads-then-mutates migration state.

use crate::error::Error;
use crate::session::Session;

/// Key of the database-scoped lock every engine instance contends on.
pub const LOCK_KEY: i64 = 9628173550095224;

/// Runs `critical` while holding the migration lock on `session`.
///
/// The lock is released on every exit path. A release failure is reported only when
/// `critical` succeeded; otherwise the error from `critical` wins.
pub(crate) fn with_lock<S, T, F>(session: &mut S, critical: F) -> Result<T, Error>
where
    S: Session + ?Sized,
    F: FnOnce(&mut S) -> Result<T, Error>,
{
    #[cfg(feature = "tracing")]
    tracing::debug!(key = LOCK_KEY, "Acquiring migration lock");

    session
        .acquire_lock(LOCK_KEY)
        .map_err(|e| Error::LockAcquire(Box::new(e)))?;

    let result = critical(session);
    let released = session.release_lock(LOCK_KEY);

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(Error::LockRelease(Box::new(e))),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(_release_error)) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_release_error, "Failed to release migration lock");
            Err(e)
        }
    }
}
