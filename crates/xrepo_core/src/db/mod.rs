//! SQLite connection plumbing beneath the repository layer.
//!
//! # Responsibility
//! - Open and configure SQLite connections (`open`).
//! - Hand out `r2d2` pooled connections through the `ConnectionSource` seam (`pool`).
//! - Optionally create/extend/validate tables of registered entities (`schema`).
//!
//! # Invariants
//! - Every connection leaving this module has `foreign_keys=ON` and a busy timeout.
//! - Pool capacity (`max_active`) is never exceeded.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod pool;
pub mod schema;

pub use open::{open_connection, ConnectionSettings, DbTarget};
pub use pool::{ConnectionSource, PoolOptions, PoolStatus, PooledConnection, SqlitePool};
pub use schema::{sync_schema, SchemaSync};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// No pooled connection became available before the acquire timeout.
    PoolTimeout {
        waited_ms: u128,
        max_active: u32,
    },
    PoolClosed,
    MissingRequiredTable(String),
    MissingRequiredColumn {
        table: String,
        column: String,
    },
}

impl DbError {
    /// Whether the failure comes from pool acquisition/release rather than SQL.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::PoolTimeout { .. } | Self::PoolClosed)
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::PoolTimeout {
                waited_ms,
                max_active,
            } => write!(
                f,
                "no pooled connection available after {waited_ms}ms (max_active={max_active})"
            ),
            Self::PoolClosed => write!(f, "connection pool is closed"),
            Self::MissingRequiredTable(table) => write!(f, "required table `{table}` is missing"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column `{column}` is missing in table `{table}`")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::PoolTimeout { .. } => None,
            Self::PoolClosed => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
