use std::path::PathBuf;

/// Error type for the tern crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no migrations found at {}", .0.display())]
    NoMigrationsFound(PathBuf),
    #[error("duplicate migration {0}")]
    DuplicateSequence(u32),
    #[error("missing migration {0}")]
    MissingSequence(u32),
    #[error("no sql in forward migration step {0}")]
    EmptyForwardMigration(String),
    #[error("failed to parse template {name}: {source}")]
    TemplateParse {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to render template {name}: {source}")]
    TemplateRender {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    /// The stored or requested version does not fit the loaded migration list.
    #[error("{0}")]
    BadVersion(String),
    #[error("version {version} is outside the valid versions of 0 to {max}")]
    VersionOutOfRange { version: i32, max: usize },
    /// A migration body was rejected by the database.
    /// `sql` is the exact text that was sent.
    #[error("{name}: {source}")]
    MigrationExecution {
        name: String,
        sql: String,
        #[source]
        source: Box<Error>,
    },
    #[error("version table {0} does not exist")]
    NotInitialized(String),
    #[error("version table {table} holds {rows} rows, expected exactly one")]
    CorruptVersionTable { table: String, rows: usize },
    #[error("failed to acquire migration lock: {0}")]
    LockAcquire(#[source] Box<Error>),
    #[error("failed to release migration lock: {0}")]
    LockRelease(#[source] Box<Error>),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Walk(#[from] walkdir::Error),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(rusqlite::Error),
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Whether this error carries a structured error reported by the database server
    /// (as opposed to a transport or client-side failure).
    pub fn is_database_error(&self) -> bool {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(e) => e.as_db_error().is_some(),
            #[cfg(feature = "sqlite")]
            Self::Rusqlite(e) => e.sqlite_error_code().is_some(),
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
