//! Entity contract and registry metadata.
//!
//! # Responsibility
//! - Define what a persistable type must declare: table, id column, columns,
//!   row values and id assignment.
//! - Validate declarations once at registration and index them for lookup.
//!
//! # Invariants
//! - Table and column names match the SQL identifier policy before they are
//!   ever interpolated into statements.
//! - `ID_COLUMN` is one of the declared columns.
//! - A registry never holds two entries for the same type or type name.

use crate::query::is_valid_identifier;
use crate::query::materialize::Shape;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use std::any::TypeId;

/// How a missing id is produced on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdGeneration {
    /// SQLite assigns the rowid; read back with `last_insert_rowid`.
    #[default]
    RowId,
    /// A v4 UUID string is assigned before insert.
    Uuid,
    /// Caller must always set the id.
    Assigned,
}

/// One declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            nullable: true,
        }
    }

    pub const fn not_null(self) -> Self {
        Self {
            nullable: false,
            ..self
        }
    }
}

/// Creation/update timestamps in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditStamps {
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl AuditStamps {
    /// Sets `created_at` only when absent and always refreshes `updated_at`.
    pub fn touch(&mut self, now_ms: i64) {
        if self.created_at.is_none() {
            self.created_at = Some(now_ms);
        }
        self.updated_at = Some(now_ms);
    }
}

/// A type persisted to one table.
///
/// Reading goes through the `Shape` binding table; writing goes through
/// `to_row`, which lists every column except the id column.
pub trait Entity: Shape + Send {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";
    const ID_GENERATION: IdGeneration = IdGeneration::RowId;

    /// Every column, id included.
    fn columns() -> &'static [ColumnDef];

    /// Current id; `None` means the entity has not been stored yet.
    fn id(&self) -> Option<Value>;

    fn assign_id(&mut self, id: Value);

    /// `(column, value)` pairs for every non-id column.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    fn audit_stamps(&mut self) -> Option<&mut AuditStamps> {
        None
    }
}

/// Registration-time snapshot of an `Entity` declaration.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub type_id: TypeId,
    /// Unqualified Rust type name, used by entity-language queries.
    pub type_name: String,
    pub table: &'static str,
    pub id_column: &'static str,
    pub id_generation: IdGeneration,
    pub columns: &'static [ColumnDef],
}

impl EntityMeta {
    pub fn of<E: Entity>() -> RepoResult<Self> {
        let type_name = short_type_name(std::any::type_name::<E>());
        if !is_valid_identifier(E::TABLE) {
            return Err(RepoError::Config(format!(
                "entity `{type_name}` has invalid table name `{}`",
                E::TABLE
            )));
        }
        let columns = E::columns();
        if columns.is_empty() {
            return Err(RepoError::Config(format!(
                "entity `{type_name}` declares no columns"
            )));
        }
        for (index, column) in columns.iter().enumerate() {
            if !is_valid_identifier(column.name) {
                return Err(RepoError::Config(format!(
                    "entity `{type_name}` has invalid column name `{}`",
                    column.name
                )));
            }
            if columns[..index]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(column.name))
            {
                return Err(RepoError::Config(format!(
                    "entity `{type_name}` declares column `{}` twice",
                    column.name
                )));
            }
        }
        if !columns.iter().any(|column| column.name == E::ID_COLUMN) {
            return Err(RepoError::Config(format!(
                "entity `{type_name}` id column `{}` is not one of its columns",
                E::ID_COLUMN
            )));
        }

        Ok(Self {
            type_id: TypeId::of::<E>(),
            type_name,
            table: E::TABLE,
            id_column: E::ID_COLUMN,
            id_generation: E::ID_GENERATION,
            columns,
        })
    }

    /// Declared spelling of `name`, matched ASCII case-insensitively.
    pub fn column(&self, name: &str) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
            .map(|column| column.name)
    }

    /// Quoted, comma-separated list of every column.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| format!("\"{}\"", column.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Lookup table over registered entities.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: Vec<EntityMeta>,
}

impl EntityRegistry {
    pub fn new(entries: Vec<EntityMeta>) -> Self {
        Self { entries }
    }

    /// Adds `meta`; rejects a type or type name that is already present.
    pub fn insert(&mut self, meta: EntityMeta) -> RepoResult<()> {
        if self
            .entries
            .iter()
            .any(|entry| entry.type_id == meta.type_id || entry.type_name == meta.type_name)
        {
            return Err(RepoError::Config(format!(
                "entity `{}` is already registered",
                meta.type_name
            )));
        }
        self.entries.push(meta);
        Ok(())
    }

    pub fn meta<E: Entity>(&self) -> RepoResult<&EntityMeta> {
        let type_id = TypeId::of::<E>();
        self.entries
            .iter()
            .find(|entry| entry.type_id == type_id)
            .ok_or_else(|| {
                RepoError::Config(format!(
                    "entity `{}` is not registered",
                    short_type_name(std::any::type_name::<E>())
                ))
            })
    }

    pub fn by_type_name(&self, name: &str) -> Option<&EntityMeta> {
        self.entries.iter().find(|entry| entry.type_name == name)
    }

    pub fn entries(&self) -> &[EntityMeta] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
