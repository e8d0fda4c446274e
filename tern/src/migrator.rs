use crate::core::{Data, Hooks, Migration, MigrationReport, MigratorOptions};
use crate::error::Error;
use crate::files::{find_migrations, find_shared_fragments};
use crate::lock::with_lock;
use crate::session::{Session, StepTransaction};
use crate::template::{contains_sql, TemplateSet};
use crate::version;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// The entrypoint for applying SQL migration scripts to one database.
///
/// Construct it with the [Session] it will use exclusively, load migrations with
/// [load_migrations](Self::load_migrations), then call [migrate](Self::migrate) or
/// [migrate_to](Self::migrate_to).
///
/// Every operation that mutates the version record runs while holding the migration lock,
/// so concurrent migrators against the same database never interleave their steps.
#[derive(Debug)]
pub struct Migrator<S: Session> {
    session: S,
    version_table: String,
    options: MigratorOptions,
    migrations: Vec<Migration>,
    hooks: Hooks,
}

impl<S: Session> Migrator<S> {
    /// Create a migrator using default options. It is highly recommended that
    /// `version_table` be schema qualified.
    ///
    /// Creates the version table (seeded with version 0) if it does not exist yet.
    pub fn new(session: S, version_table: impl Into<String>) -> Result<Self, Error> {
        Self::with_options(session, version_table, MigratorOptions::default())
    }

    pub fn with_options(
        mut session: S,
        version_table: impl Into<String>,
        options: MigratorOptions,
    ) -> Result<Self, Error> {
        let version_table = version_table.into();
        with_lock(&mut session, |session| {
            version::ensure_table_exists(session, &version_table)
        })?;

        Ok(Self {
            session,
            version_table,
            options,
            migrations: Vec::new(),
            hooks: Hooks::default(),
        })
    }

    /// Set a callback invoked before each step's SQL is executed.
    /// The callback receives the migration sequence, name, and rendered SQL.
    pub fn on_migration_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, &str, &str) + Send + Sync + 'static,
    {
        self.hooks.on_migration_start = Some(Box::new(callback));
        self
    }

    /// Set a callback invoked after a step has been committed.
    /// The callback receives the migration sequence, name, and duration.
    pub fn on_migration_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, &str, Duration) + Send + Sync + 'static,
    {
        self.hooks.on_migration_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback invoked when a step fails.
    /// The callback receives the migration sequence, name, and error.
    pub fn on_migration_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, &str, &Error) + Send + Sync + 'static,
    {
        self.hooks.on_migration_error = Some(Box::new(callback));
        self
    }

    /// Add a value available to templates. Only affects migrations loaded afterwards.
    pub fn insert_data(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.options.data.insert(key.into(), value.into());
    }

    pub fn data(&self) -> &Data {
        &self.options.data
    }

    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    /// The loaded migrations, ordered by sequence.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The underlying session, e.g. to obtain a driver cancel handle before a long run.
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Load, render and validate every migration script in `path`.
    ///
    /// `.sql` files one directory below `path` are registered as shared fragments that
    /// migration bodies can include. On any error the previously loaded list is kept
    /// unchanged; nothing touches the database.
    pub fn load_migrations(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let paths = find_migrations(path)?;

        let mut templates = TemplateSet::new();
        for (name, fragment_path) in find_shared_fragments(path)? {
            let body = fs::read_to_string(&fragment_path)
                .map_err(|e| Error::io(&fragment_path, e))?;

            #[cfg(feature = "tracing")]
            tracing::debug!(fragment = %name, "Registering shared fragment");

            templates.add(name, body)?;
        }

        let mut migrations = Vec::with_capacity(paths.len());
        for migration_path in paths {
            let name = migration_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let body = fs::read_to_string(&migration_path)
                .map_err(|e| Error::io(&migration_path, e))?;

            templates.add(name.clone(), body.trim().to_string())?;
            let sql = templates.render(&name, &self.options.data)?;
            if !contains_sql(&sql) {
                return Err(Error::EmptyForwardMigration(name));
            }

            migrations.push(Migration {
                sequence: migrations.len() as i32 + 1,
                name,
                sql,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            path = %path.display(),
            count = migrations.len(),
            "Loaded migrations"
        );

        self.migrations = migrations;
        Ok(())
    }

    /// Load migrations from [MigratorOptions::default_path].
    pub fn load_default_migrations(&mut self) -> Result<(), Error> {
        let path = self
            .options
            .default_path
            .clone()
            .ok_or_else(|| Error::Generic("no default migration path configured".to_string()))?;
        self.load_migrations(path)
    }

    /// Append an already rendered migration as the next step.
    pub fn append_migration(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        let sequence = self.migrations.len() as i32 + 1;
        self.migrations.push(Migration {
            sequence,
            name: name.into(),
            sql: sql.into(),
        });
    }

    /// Read the version stored in the version table.
    pub fn get_current_version(&mut self) -> Result<i32, Error> {
        version::current_version(&mut self.session, &self.version_table)
    }

    /// The loaded migrations that have not been applied yet.
    pub fn pending_migrations(&mut self) -> Result<&[Migration], Error> {
        let current = self.get_current_version()?;
        let applied = usize::try_from(current)
            .ok()
            .filter(|&applied| applied <= self.migrations.len())
            .ok_or_else(|| bad_current_version(current, self.migrations.len()))?;
        Ok(&self.migrations[applied..])
    }

    /// Apply every pending migration.
    pub fn migrate(&mut self) -> Result<MigrationReport, Error> {
        let target = self.migrations.len() as i32;
        self.migrate_to(target)
    }

    /// Apply migrations until the stored version equals `target_version`.
    ///
    /// Each step commits on its own. If step `k` fails, the steps before it stay applied
    /// and the stored version is `k - 1`; the returned error names the failing migration.
    pub fn migrate_to(&mut self, target_version: i32) -> Result<MigrationReport, Error> {
        let transactional = self.options.transactional;
        let version_table = self.version_table.as_str();
        let migrations = self.migrations.as_slice();
        let hooks = &self.hooks;

        with_lock(&mut self.session, |session| {
            let current_version = version::current_version(session, version_table)?;
            let len = migrations.len();
            if current_version < 0 || current_version as usize > len {
                return Err(bad_current_version(current_version, len));
            }
            if target_version < current_version || target_version as usize > len {
                return Err(Error::BadVersion(format!(
                    "destination version {} is outside the valid versions of {} to {}",
                    target_version, current_version, len
                )));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                current_version = current_version,
                target_version = target_version,
                "Considering migrations to run"
            );

            let mut migrations_run = Vec::new();
            for migration in &migrations[current_version as usize..target_version as usize] {
                #[cfg(feature = "tracing")]
                let _span = tracing::info_span!(
                    "migration_up",
                    sequence = migration.sequence,
                    name = %migration.name
                )
                .entered();

                #[cfg(feature = "tracing")]
                tracing::info!("Starting migration");

                let started = Instant::now();
                if let Err(error) =
                    apply_step(session, version_table, migration, transactional, hooks)
                {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %error, "Migration failed");

                    hooks.failed(migration, &error);
                    return Err(error);
                }
                let duration = started.elapsed();

                #[cfg(feature = "tracing")]
                tracing::info!(
                    duration_ms = duration.as_millis(),
                    "Migration completed successfully"
                );

                hooks.completed(migration, duration);
                migrations_run.push(migration.sequence);
            }

            Ok(MigrationReport {
                from_version: current_version,
                to_version: target_version,
                migrations_run,
            })
        })
    }

    /// Set the stored version without running any migration, for out-of-band recovery.
    pub fn force_version(&mut self, version: i32) -> Result<(), Error> {
        let max = self.migrations.len();
        if version < 0 || version as usize > max {
            return Err(Error::VersionOutOfRange { version, max });
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(version = version, "Forcing migration version");

        let version_table = &self.version_table;
        with_lock(&mut self.session, |session| {
            version::set_version(session, version_table, version)
        })
    }

    /// Drop the version table and its helper objects.
    pub fn drop_service_data(&mut self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::warn!("Dropping migration version table: {}", self.version_table);

        let version_table = &self.version_table;
        with_lock(&mut self.session, |session| {
            session.drop_service_data(version_table)
        })
    }
}

fn bad_current_version(current: i32, len: usize) -> Error {
    if current < 0 {
        Error::BadVersion(format!("current version {} is less than 0", current))
    } else {
        Error::BadVersion(format!(
            "current version {} is greater than last version of {}",
            current, len
        ))
    }
}

fn apply_step<S: Session + ?Sized>(
    session: &mut S,
    version_table: &str,
    migration: &Migration,
    transactional: bool,
    hooks: &Hooks,
) -> Result<(), Error> {
    let mut tx = StepTransaction::begin(session, transactional)?;

    hooks.started(migration);

    tx.session().execute_sql(&migration.sql).map_err(|error| {
        if error.is_database_error() {
            Error::MigrationExecution {
                name: migration.name.clone(),
                sql: migration.sql.clone(),
                source: Box::new(error),
            }
        } else {
            error
        }
    })?;

    // Before the version update, since a migration may have changed search_path
    if let Err(_error) = tx.session().reset_session() {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_error, "Failed to reset session settings");
    }

    version::set_version(tx.session(), version_table, migration.sequence)?;
    tx.commit()
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::sqlite::SqliteSession;
    use rusqlite::Connection;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use tempfile::{NamedTempFile, TempDir};

    const TABLE: &str = "tern_version";

    fn migrations_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        dir
    }

    fn two_step_dir() -> TempDir {
        migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_add_col.sql", "alter table t add column v int;"),
        ])
    }

    fn in_memory() -> Migrator<SqliteSession> {
        Migrator::new(
            SqliteSession::new(Connection::open_in_memory().unwrap()),
            TABLE,
        )
        .unwrap()
    }

    fn columns(migrator: &Migrator<SqliteSession>, table: &str) -> Vec<String> {
        let conn = migrator.session().connection();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn new_creates_version_table() {
        let mut migrator = in_memory();
        assert_eq!(migrator.get_current_version().unwrap(), 0);
        assert!(migrator.migrations().is_empty());
    }

    #[test]
    fn migrates_fresh_database() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        let report = migrator.migrate().unwrap();
        assert_eq!(
            report,
            MigrationReport {
                from_version: 0,
                to_version: 2,
                migrations_run: vec![1, 2],
            }
        );
        assert_eq!(migrator.get_current_version().unwrap(), 2);
        assert_eq!(columns(&migrator, "t"), vec!["id", "v"]);
    }

    #[test]
    fn failing_step_leaves_earlier_steps_committed() {
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_add_col.sql", "alter table t add colum v int;"),
        ]);
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        let err = migrator.migrate().unwrap_err();
        match &err {
            Error::MigrationExecution { name, sql, source } => {
                assert_eq!(name, "002_add_col.sql");
                assert_eq!(sql, "alter table t add colum v int;");
                assert!(source.is_database_error());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("002_add_col.sql: "));
        assert_eq!(migrator.get_current_version().unwrap(), 1);
        assert_eq!(columns(&migrator, "t"), vec!["id"]);
    }

    #[test]
    fn failing_step_is_rolled_back() {
        let dir = migrations_dir(&[(
            "001_init.sql",
            "create table t(id int);\nTHIS IS NOT VALID SQL;",
        )]);
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        assert!(migrator.migrate().is_err());
        assert_eq!(migrator.get_current_version().unwrap(), 0);
        assert!(columns(&migrator, "t").is_empty());
    }

    #[test]
    fn resumes_after_fixing_a_failed_step() {
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_add_col.sql", "alter table t add colum v int;"),
        ]);
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();
        assert!(migrator.migrate().is_err());

        fs::write(
            dir.path().join("002_add_col.sql"),
            "alter table t add column v int;",
        )
        .unwrap();
        migrator.load_migrations(dir.path()).unwrap();
        let report = migrator.migrate().unwrap();
        assert_eq!(report.from_version, 1);
        assert_eq!(report.migrations_run, vec![2]);
    }

    #[test]
    fn migrate_to_intermediate_version() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        let report = migrator.migrate_to(1).unwrap();
        assert_eq!(report.migrations_run, vec![1]);
        assert_eq!(migrator.get_current_version().unwrap(), 1);
        assert_eq!(columns(&migrator, "t"), vec!["id"]);
    }

    #[test]
    fn migrate_to_current_version_does_nothing() {
        let dir = two_step_dir();
        let started = Arc::new(Mutex::new(Vec::new()));
        let started_clone = Arc::clone(&started);
        let mut migrator = in_memory().on_migration_start(move |sequence, _, _| {
            started_clone.lock().unwrap().push(sequence);
        });
        migrator.load_migrations(dir.path()).unwrap();
        migrator.migrate().unwrap();
        started.lock().unwrap().clear();

        let report = migrator.migrate_to(2).unwrap();
        assert!(report.migrations_run.is_empty());
        assert!(started.lock().unwrap().is_empty());
        assert_eq!(migrator.get_current_version().unwrap(), 2);
    }

    #[test]
    fn rejects_backward_and_out_of_range_targets() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();
        migrator.migrate_to(1).unwrap();

        let err = migrator.migrate_to(0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "destination version 0 is outside the valid versions of 1 to 2"
        );
        assert!(matches!(migrator.migrate_to(3), Err(Error::BadVersion(_))));
        assert!(matches!(migrator.migrate_to(-1), Err(Error::BadVersion(_))));
        assert_eq!(migrator.get_current_version().unwrap(), 1);
    }

    #[test]
    fn stored_version_beyond_loaded_list_is_rejected() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();
        migrator.migrate().unwrap();

        let reduced = migrations_dir(&[("001_init.sql", "create table t(id int);")]);
        migrator.load_migrations(reduced.path()).unwrap();
        let err = migrator.migrate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "current version 2 is greater than last version of 1"
        );
        assert!(matches!(
            migrator.pending_migrations(),
            Err(Error::BadVersion(_))
        ));
    }

    #[test]
    fn hooks_observe_each_step() {
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_add_col.sql", "alter table t add colum v int;"),
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let (starts, completes, errors) = (events.clone(), events.clone(), events.clone());
        let mut migrator = in_memory()
            .on_migration_start(move |sequence, name, sql| {
                starts
                    .lock()
                    .unwrap()
                    .push(format!("start {sequence} {name} {sql}"));
            })
            .on_migration_complete(move |sequence, name, _| {
                completes
                    .lock()
                    .unwrap()
                    .push(format!("complete {sequence} {name}"));
            })
            .on_migration_error(move |sequence, name, _| {
                errors.lock().unwrap().push(format!("error {sequence} {name}"));
            });
        migrator.load_migrations(dir.path()).unwrap();
        assert!(migrator.migrate().is_err());

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start 1 001_init.sql create table t(id int);",
                "complete 1 001_init.sql",
                "start 2 002_add_col.sql alter table t add colum v int;",
                "error 2 002_add_col.sql",
            ]
        );
    }

    #[test]
    fn non_transactional_mode_runs_steps_directly() {
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_vacuum.sql", "vacuum;"),
        ]);
        let file = NamedTempFile::new().unwrap();
        let options = MigratorOptions {
            transactional: false,
            ..MigratorOptions::default()
        };
        let mut migrator =
            Migrator::with_options(SqliteSession::open(file.path()).unwrap(), TABLE, options)
                .unwrap();
        migrator.load_migrations(dir.path()).unwrap();
        migrator.migrate().unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 2);
    }

    #[test]
    fn vacuum_cannot_run_inside_a_transaction() {
        let dir = migrations_dir(&[("001_vacuum.sql", "vacuum;")]);
        let file = NamedTempFile::new().unwrap();
        let mut migrator = Migrator::new(SqliteSession::open(file.path()).unwrap(), TABLE).unwrap();
        migrator.load_migrations(dir.path()).unwrap();
        assert!(matches!(
            migrator.migrate(),
            Err(Error::MigrationExecution { .. })
        ));
        assert_eq!(migrator.get_current_version().unwrap(), 0);
    }

    #[test]
    fn renders_templates_with_data_and_fragments() {
        let dir = migrations_dir(&[
            ("shared/id_column.sql", "{{ id_name }} integer primary key"),
            (
                "001_init.sql",
                "create table {{ table }}({% include \"shared/id_column.sql\" %});",
            ),
        ]);
        let mut migrator = in_memory();
        migrator.insert_data("table", "accounts");
        migrator.insert_data("id_name", "account_id");
        migrator.load_migrations(dir.path()).unwrap();

        assert_eq!(
            migrator.migrations()[0].sql,
            "create table accounts(account_id integer primary key);"
        );
        migrator.migrate().unwrap();
        assert_eq!(columns(&migrator, "accounts"), vec!["account_id"]);
    }

    #[test]
    fn empty_migration_fails_the_load() {
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_empty.sql", "\n-- nothing to do yet\n\n"),
        ]);
        let mut migrator = in_memory();
        let err = migrator.load_migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::EmptyForwardMigration(ref name) if name == "002_empty.sql"));
        assert!(migrator.migrations().is_empty());
        assert_eq!(migrator.migrate().unwrap().migrations_run, Vec::<i32>::new());
        assert_eq!(migrator.get_current_version().unwrap(), 0);
    }

    #[test]
    fn template_error_names_the_migration() {
        let dir = migrations_dir(&[("001_init.sql", "create table {{ missing }}(id int);")]);
        let mut migrator = in_memory();
        let err = migrator.load_migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::TemplateRender { ref name, .. } if name == "001_init.sql"));
    }

    #[test]
    fn failed_load_keeps_previous_list() {
        let mut migrator = in_memory();
        migrator.load_migrations(two_step_dir().path()).unwrap();

        let broken = migrations_dir(&[("001-a.sql", "select 1;"), ("003-c.sql", "select 1;")]);
        let err = migrator.load_migrations(broken.path()).unwrap_err();
        assert!(matches!(err, Error::MissingSequence(2)));
        assert_eq!(migrator.migrations().len(), 2);
    }

    #[test]
    fn default_path_comes_from_options() {
        let dir = two_step_dir();
        let options = MigratorOptions {
            default_path: Some(dir.path().to_path_buf()),
            ..MigratorOptions::default()
        };
        let session = SqliteSession::new(Connection::open_in_memory().unwrap());
        let mut migrator = Migrator::with_options(session, TABLE, options).unwrap();
        migrator.load_default_migrations().unwrap();
        assert_eq!(migrator.migrations().len(), 2);

        let mut without = in_memory();
        assert!(matches!(
            without.load_default_migrations(),
            Err(Error::Generic(_))
        ));
    }

    #[test]
    fn append_migration_assigns_next_sequence() {
        let mut migrator = in_memory();
        migrator.append_migration("create", "create table t(id int);");
        migrator.append_migration("seed", "insert into t values (1);");
        assert_eq!(
            migrator
                .migrations()
                .iter()
                .map(|m| (m.sequence, m.name.as_str()))
                .collect::<Vec<_>>(),
            vec![(1, "create"), (2, "seed")]
        );
        migrator.migrate().unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 2);
    }

    #[test]
    fn pending_migrations_follow_the_stored_version() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();
        assert_eq!(migrator.pending_migrations().unwrap().len(), 2);

        migrator.migrate_to(1).unwrap();
        let pending = migrator.pending_migrations().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "002_add_col.sql");
    }

    #[test]
    fn force_version_updates_without_running_sql() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        migrator.force_version(2).unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 2);
        assert!(columns(&migrator, "t").is_empty());

        migrator.force_version(0).unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 0);
    }

    #[test]
    fn force_version_rejects_out_of_range() {
        let dir = two_step_dir();
        let mut migrator = in_memory();
        migrator.load_migrations(dir.path()).unwrap();

        for version in [-1, 3] {
            let err = migrator.force_version(version).unwrap_err();
            assert!(
                matches!(err, Error::VersionOutOfRange { version: v, max: 2 } if v == version),
                "{err:?}"
            );
        }
        assert_eq!(migrator.get_current_version().unwrap(), 0);
    }

    #[test]
    fn drop_service_data_removes_version_table() {
        let mut migrator = in_memory();
        migrator.drop_service_data().unwrap();
        assert!(matches!(
            migrator.get_current_version(),
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(migrator.migrate(), Err(Error::NotInitialized(_))));
    }

    #[test]
    fn borrowed_session_stays_with_the_caller() {
        let mut session = SqliteSession::new(Connection::open_in_memory().unwrap());
        {
            let mut migrator = Migrator::new(&mut session, TABLE).unwrap();
            migrator.append_migration("create", "create table t(id int);");
            migrator.migrate().unwrap();
        }
        let rows: i64 = session
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(session.read_versions(TABLE).unwrap(), vec![1]);
    }

    #[test]
    fn existing_version_table_is_reused() {
        let file = NamedTempFile::new().unwrap();
        let dir = two_step_dir();
        {
            let mut migrator =
                Migrator::new(SqliteSession::open(file.path()).unwrap(), TABLE).unwrap();
            migrator.load_migrations(dir.path()).unwrap();
            migrator.migrate_to(1).unwrap();
        }
        let mut migrator = Migrator::new(SqliteSession::open(file.path()).unwrap(), TABLE).unwrap();
        assert_eq!(migrator.get_current_version().unwrap(), 1);
    }

    #[test]
    fn concurrent_migrations_are_safe() {
        let file = NamedTempFile::new().unwrap();
        let db_path = Arc::new(file.path().to_path_buf());
        let dir = migrations_dir(&[
            ("001_init.sql", "create table t(id int);"),
            ("002_seed.sql", "insert into t values (1);"),
        ]);
        let scripts = Arc::new(dir.path().to_path_buf());

        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let db_path = Arc::clone(&db_path);
                let scripts = Arc::clone(&scripts);
                thread::spawn(move || {
                    let session = SqliteSession::open(db_path.as_path())
                        .unwrap()
                        .with_poll_interval(std::time::Duration::from_millis(5));
                    barrier.wait();

                    let mut migrator = Migrator::new(session, TABLE).unwrap();
                    migrator.load_migrations(scripts.as_path()).unwrap();
                    let result = migrator.migrate();
                    assert!(result.is_ok(), "Thread {} failed: {:?}", i, result);
                    result.unwrap().migrations_run.len()
                })
            })
            .collect();

        let runs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(runs.iter().filter(|&&n| n == 2).count(), 1, "{runs:?}");
        assert_eq!(runs.iter().filter(|&&n| n == 0).count(), 2, "{runs:?}");

        let conn = Connection::open(db_path.as_path()).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        let version: i32 = conn
            .query_row(&format!("SELECT version FROM {TABLE}"), [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
