//! The database seam.
//!
//! [Session] lists every interaction the engine has with the database. A session is one
//! connection, owned exclusively by one [Migrator](crate::Migrator) for the duration of
//! each call. Implementations are provided for `postgres::Client` and
//! [SqliteSession](crate::sqlite::SqliteSession).

use crate::error::Error;

/// A single database connection as seen by the migration engine.
///
/// `table` arguments are the (optionally schema-qualified) version table name and are
/// interpolated into SQL as-is.
pub trait Session {
    /// Executes one or more statements, without parameters.
    fn execute_sql(&mut self, sql: &str) -> Result<(), Error>;

    /// Blocks until the exclusive lock identified by `key` is held by this session.
    fn acquire_lock(&mut self, key: i64) -> Result<(), Error>;

    /// Releases the lock identified by `key`. Releasing a lock that is not held is not an error.
    fn release_lock(&mut self, key: i64) -> Result<(), Error>;

    fn version_table_exists(&mut self, table: &str) -> Result<bool, Error>;

    /// Creates the version table (at most one row, `version >= 0`) and seeds it with version 0.
    /// Must not duplicate the seed row when re-run.
    fn create_version_table(&mut self, table: &str) -> Result<(), Error>;

    /// Every `version` value currently stored.
    fn read_versions(&mut self, table: &str) -> Result<Vec<i32>, Error>;

    /// Updates every stored row to `version`, returning the number of rows changed.
    fn write_version(&mut self, table: &str, version: i32) -> Result<u64, Error>;

    /// Drops the version table and any helper objects created alongside it.
    fn drop_service_data(&mut self, table: &str) -> Result<(), Error>;

    /// Clears session-local settings a migration may have changed.
    fn reset_session(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.execute_sql("BEGIN")
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.execute_sql("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.execute_sql("ROLLBACK")
    }
}

impl<S: Session + ?Sized> Session for &mut S {
    fn execute_sql(&mut self, sql: &str) -> Result<(), Error> {
        (**self).execute_sql(sql)
    }
    fn acquire_lock(&mut self, key: i64) -> Result<(), Error> {
        (**self).acquire_lock(key)
    }
    fn release_lock(&mut self, key: i64) -> Result<(), Error> {
        (**self).release_lock(key)
    }
    fn version_table_exists(&mut self, table: &str) -> Result<bool, Error> {
        (**self).version_table_exists(table)
    }
    fn create_version_table(&mut self, table: &str) -> Result<(), Error> {
        (**self).create_version_table(table)
    }
    fn read_versions(&mut self, table: &str) -> Result<Vec<i32>, Error> {
        (**self).read_versions(table)
    }
    fn write_version(&mut self, table: &str, version: i32) -> Result<u64, Error> {
        (**self).write_version(table, version)
    }
    fn drop_service_data(&mut self, table: &str) -> Result<(), Error> {
        (**self).drop_service_data(table)
    }
    fn reset_session(&mut self) -> Result<(), Error> {
        (**self).reset_session()
    }
    fn begin(&mut self) -> Result<(), Error> {
        (**self).begin()
    }
    fn commit(&mut self) -> Result<(), Error> {
        (**self).commit()
    }
    fn rollback(&mut self) -> Result<(), Error> {
        (**self).rollback()
    }
}

/// The transaction around a single migration step.
///
/// When transactional mode is off this is a pass-through. Dropping an uncommitted guard
/// rolls the transaction back.
pub(crate) struct StepTransaction<'a, S: Session + ?Sized> {
    session: &'a mut S,
    open: bool,
}

impl<'a, S: Session + ?Sized> StepTransaction<'a, S> {
    pub fn begin(session: &'a mut S, transactional: bool) -> Result<Self, Error> {
        if transactional {
            session.begin()?;
        }
        Ok(Self {
            session,
            open: transactional,
        })
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if !self.open {
            return Ok(());
        }
        // a failed COMMIT ends the transaction too
        self.open = false;
        self.session.commit()
    }
}

impl<S: Session + ?Sized> Drop for StepTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(_error) = self.session.rollback() {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_error, "Failed to roll back migration step");
        }
    }
}
