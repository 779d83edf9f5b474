//! Generic SQLite repository layer.
//!
//! One `Repo` per database: entity CRUD, criteria and raw SQL queries,
//! pagination, and declarative transactions where nested entries join the
//! transaction already active on the current thread.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;

pub use config::RepoConfig;
pub use db::{
    ConnectionSource, DbError, PoolOptions, PoolStatus, PooledConnection, SchemaSync, SqlitePool,
};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::entity::{AuditStamps, ColumnDef, Entity, EntityMeta, EntityRegistry, IdGeneration};
pub use model::page::{Page, PageRequest};
pub use model::record::Record;
pub use query::binder::{bind, BoundStatement, SqlParam};
pub use query::criteria::{col, Column, CompareOp, Criteria, Expr, Window};
pub use query::materialize::{BindingTable, FromRecord, RowMapper, Shape};
pub use repo::error::{RepoError, RepoResult};
pub use repo::repository::Repo;
pub use repo::scope::{BeginMode, TransHooks, TransactionScope, TxStats};
pub use repo::session::Session;
pub use rusqlite::types::Value;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
