use crate::error::Error;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Key/value data available to migration templates while they are rendered.
pub type Data = BTreeMap<String, serde_json::Value>;

/// One numbered, fully rendered forward migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// 1-based position in the migration list.
    pub sequence: i32,
    /// The original file name.
    pub name: String,
    /// Rendered statement text, executed as-is.
    pub sql: String,
}

/// A report of the steps applied by a successful `migrate_to` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i32,
    pub to_version: i32,
    pub migrations_run: Vec<i32>,
}

/// Options supplied when constructing a [Migrator](crate::Migrator).
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    /// Wrap each step (body, session reset, version update) in its own transaction.
    /// Disable for bodies holding statements that refuse to run inside one.
    pub transactional: bool,
    /// Directory used by [load_default_migrations](crate::Migrator::load_default_migrations).
    pub default_path: Option<PathBuf>,
    /// Data made available to templates.
    pub data: Data,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            transactional: true,
            default_path: None,
            data: Data::new(),
        }
    }
}

type StartHook = Box<dyn Fn(i32, &str, &str) + Send + Sync>;
type CompleteHook = Box<dyn Fn(i32, &str, Duration) + Send + Sync>;
type ErrorHook = Box<dyn Fn(i32, &str, &Error) + Send + Sync>;

/// Observer callbacks fired by the runner. They are notifications only.
#[derive(Default)]
pub(crate) struct Hooks {
    pub on_migration_start: Option<StartHook>,
    pub on_migration_complete: Option<CompleteHook>,
    pub on_migration_error: Option<ErrorHook>,
}

impl Hooks {
    pub fn started(&self, migration: &Migration) {
        if let Some(ref callback) = self.on_migration_start {
            callback(migration.sequence, &migration.name, &migration.sql);
        }
    }

    pub fn completed(&self, migration: &Migration, duration: Duration) {
        if let Some(ref callback) = self.on_migration_complete {
            callback(migration.sequence, &migration.name, duration);
        }
    }

    pub fn failed(&self, migration: &Migration, error: &Error) {
        if let Some(ref callback) = self.on_migration_error {
            callback(migration.sequence, &migration.name, error);
        }
    }
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}
