//! The single-row version record.

use crate::error::Error;
use crate::session::Session;

/// Creates the version table seeded with version 0 unless it is already visible.
/// Returns whether the table was created. Callers hold the migration lock.
pub(crate) fn ensure_table_exists<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
) -> Result<bool, Error> {
    if session.version_table_exists(table)? {
        return Ok(false);
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Creating migration version table: {}", table);

    session.create_version_table(table)?;
    Ok(true)
}

pub(crate) fn current_version<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
) -> Result<i32, Error> {
    if !session.version_table_exists(table)? {
        return Err(Error::NotInitialized(table.to_string()));
    }
    match session.read_versions(table)?.as_slice() {
        [version] => Ok(*version),
        rows => Err(Error::CorruptVersionTable {
            table: table.to_string(),
            rows: rows.len(),
        }),
    }
}

pub(crate) fn set_version<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
    version: i32,
) -> Result<(), Error> {
    match session.write_version(table, version)? {
        1 => Ok(()),
        rows => Err(Error::CorruptVersionTable {
            table: table.to_string(),
            rows: rows as usize,
        }),
    }
}
