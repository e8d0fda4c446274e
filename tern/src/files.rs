//! Discovery of migration scripts and shared template fragments.

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// 001_init.sql, or the older 0001-init.sql
static MIGRATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A(\d{1,4})[-_].+\.sql\z").expect("migration file pattern is valid")
});

/// Returns the sequence number encoded in a migration file name,
/// or `None` if the name does not follow the migration naming convention.
pub fn sequence_of(file_name: &str) -> Option<u32> {
    MIGRATION_PATTERN
        .captures(file_name)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// Scans `path` (non-recursively) for migration scripts and returns them ordered by sequence.
///
/// Sequence numbers must run 1, 2, 3, ... without duplicates or gaps.
/// Files that don't match the naming convention are skipped.
pub fn find_migrations(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, Error> {
    let path = path.as_ref();
    let entries = fs::read_dir(path).map_err(|e| Error::io(path, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(path, e))?;
        let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match sequence_of(&name) {
            Some(sequence) => names.push((name, sequence)),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(file = %name, "Skipping file (not a migration)");
            }
        }
    }
    names.sort();

    let mut paths: Vec<PathBuf> = Vec::with_capacity(names.len());
    for (name, sequence) in names {
        let expected = paths.len() as u32 + 1;
        if sequence < expected {
            return Err(Error::DuplicateSequence(sequence));
        }
        if sequence > expected {
            return Err(Error::MissingSequence(expected));
        }
        paths.push(path.join(name));
    }

    if paths.is_empty() {
        return Err(Error::NoMigrationsFound(path.to_path_buf()));
    }
    Ok(paths)
}

/// Finds shared fragments: `.sql` files exactly one directory below `root`.
/// Each is returned with its template name, the `/`-separated path relative to `root`.
pub fn find_shared_fragments(root: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>, Error> {
    let root = root.as_ref();
    let mut fragments = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|ext| ext.to_str()) != Some("sql")
        {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        fragments.push((name, entry.path().to_path_buf()));
    }
    Ok(fragments)
}
