//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Resolve a configured url into a concrete SQLite target.
//! - Open one connection, or build the `r2d2` manager for a target, and apply
//!   the pragmas core behavior relies on.
//!
//! # Invariants
//! - Returned and managed connections have `foreign_keys=ON` and the
//!   configured busy timeout.
//! - In-memory targets are shared-cache URIs so the pool connection and the
//!   anchor see the same database.

use super::DbResult;
use log::{debug, error};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);

/// Physical database a url resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    /// Named shared-cache in-memory database.
    Memory { name: String },
    File(PathBuf),
    /// Raw `file:` URI handed to SQLite untouched.
    Uri(String),
}

impl DbTarget {
    /// Parses `:memory:`, `sqlite::memory:`, `sqlite://path`, `file:` URIs or
    /// a plain filesystem path.
    ///
    /// Each in-memory url gets a process-unique database name.
    pub fn parse(url: &str) -> Self {
        let trimmed = url.trim();
        if trimmed.is_empty() || trimmed == ":memory:" || trimmed == "sqlite::memory:" {
            let seq = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            return Self::Memory {
                name: format!("xrepo-mem-{}-{seq}", std::process::id()),
            };
        }
        if trimmed.starts_with("file:") {
            return Self::Uri(trimmed.to_string());
        }
        let path = trimmed
            .strip_prefix("sqlite://")
            .or_else(|| trimmed.strip_prefix("sqlite:"))
            .unwrap_or(trimmed);
        Self::File(PathBuf::from(path))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }

    pub(crate) fn mode(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::File(_) => "file",
            Self::Uri(_) => "uri",
        }
    }
}

/// Per-connection settings applied right after open.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub busy_timeout: Duration,
    /// Extra `PRAGMA name = value` pairs, names and values pre-validated.
    pub pragmas: Vec<(String, String)>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            pragmas: Vec::new(),
        }
    }
}

/// Opens one SQLite connection for `target` and configures it.
///
/// # Side effects
/// - Emits `db_open` debug/error events with duration and mode.
pub fn open_connection(target: &DbTarget, settings: &ConnectionSettings) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();

    let opened = match target {
        DbTarget::Memory { name } => Connection::open_with_flags(memory_uri(name), uri_flags()),
        DbTarget::File(path) => Connection::open(path),
        DbTarget::Uri(uri) => Connection::open_with_flags(uri, uri_flags()),
    };

    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
                started_at.elapsed().as_millis()
            );
            return Err(err.into());
        }
    };

    if let Err(err) = configure(&conn, settings) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_configure_failed error={err}",
            started_at.elapsed().as_millis()
        );
        return Err(err.into());
    }

    debug!(
        "event=db_open module=db status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

/// `r2d2` manager opening `target` with the same flags and pragmas as
/// `open_connection`.
pub(crate) fn connection_manager(
    target: &DbTarget,
    settings: &ConnectionSettings,
) -> SqliteConnectionManager {
    let manager = match target {
        DbTarget::Memory { name } => {
            SqliteConnectionManager::file(memory_uri(name)).with_flags(uri_flags())
        }
        DbTarget::File(path) => SqliteConnectionManager::file(path),
        DbTarget::Uri(uri) => SqliteConnectionManager::file(uri).with_flags(uri_flags()),
    };
    let settings = settings.clone();
    let mode = target.mode();
    manager.with_init(move |conn| {
        configure(conn, &settings)?;
        debug!("event=db_open module=db status=ok mode={mode} source=pool");
        Ok(())
    })
}

fn memory_uri(name: &str) -> String {
    format!("file:{name}?mode=memory&cache=shared")
}

fn uri_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn configure(conn: &Connection, settings: &ConnectionSettings) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(settings.busy_timeout)?;
    for (name, value) in &settings.pragmas {
        conn.execute_batch(&format!("PRAGMA {name} = {value};"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{open_connection, ConnectionSettings, DbTarget};
    use std::path::PathBuf;

    #[test]
    fn parse_recognizes_memory_aliases_with_unique_names() {
        let first = DbTarget::parse(":memory:");
        let second = DbTarget::parse("sqlite::memory:");
        assert!(first.is_memory());
        assert!(second.is_memory());
        assert_ne!(first, second);
    }

    #[test]
    fn parse_strips_sqlite_scheme() {
        assert_eq!(
            DbTarget::parse("sqlite:///tmp/app.db"),
            DbTarget::File(PathBuf::from("/tmp/app.db"))
        );
        assert_eq!(
            DbTarget::parse("data/app.db"),
            DbTarget::File(PathBuf::from("data/app.db"))
        );
        assert!(matches!(
            DbTarget::parse("file:app.db?mode=ro"),
            DbTarget::Uri(_)
        ));
    }

    #[test]
    fn memory_connections_share_one_database() {
        let target = DbTarget::parse(":memory:");
        let settings = ConnectionSettings::default();
        let a = open_connection(&target, &settings).unwrap();
        let b = open_connection(&target, &settings).unwrap();

        a.execute_batch("CREATE TABLE shared_rows (id INTEGER PRIMARY KEY);")
            .unwrap();
        let exists: i64 = b
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'shared_rows';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn extra_pragmas_are_applied() {
        let settings = ConnectionSettings {
            pragmas: vec![("user_version".to_string(), "7".to_string())],
            ..ConnectionSettings::default()
        };
        let conn = open_connection(&DbTarget::parse(":memory:"), &settings).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 7);
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
