//! Schema synchronization for registered entities.
//!
//! # Responsibility
//! - Create missing entity tables (`create`).
//! - Additionally add missing columns to existing tables (`update`).
//! - Reject connections whose tables/columns do not match entities (`validate`).
//!
//! # Invariants
//! - `none` never touches the database.
//! - Columns added by `update` are always nullable; SQLite cannot add a
//!   `NOT NULL` column without a default.

use super::{DbError, DbResult};
use crate::model::entity::{ColumnDef, EntityMeta, IdGeneration};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaSync {
    #[default]
    None,
    Create,
    Update,
    Validate,
}

impl SchemaSync {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "validate" => Some(Self::Validate),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Create => "create",
            Self::Update => "update",
            Self::Validate => "validate",
        }
    }
}

/// Applies `mode` for every entity on one connection, inside one transaction.
pub fn sync_schema(conn: &mut Connection, mode: SchemaSync, entities: &[EntityMeta]) -> DbResult<()> {
    if mode == SchemaSync::None || entities.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for meta in entities {
        match mode {
            SchemaSync::None => {}
            SchemaSync::Create => create_table(&tx, meta)?,
            SchemaSync::Update => {
                if table_exists(&tx, meta.table)? {
                    add_missing_columns(&tx, meta)?;
                } else {
                    create_table(&tx, meta)?;
                }
            }
            SchemaSync::Validate => validate_table(&tx, meta)?,
        }
    }
    tx.commit()?;

    info!(
        "event=schema_sync module=db status=ok mode={} entities={}",
        mode.as_str(),
        entities.len()
    );
    Ok(())
}

fn create_table(conn: &Connection, meta: &EntityMeta) -> DbResult<()> {
    let columns = meta
        .columns
        .iter()
        .map(|column| column_sql(meta, column))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({columns});",
        meta.table
    ))?;
    Ok(())
}

fn column_sql(meta: &EntityMeta, column: &ColumnDef) -> String {
    if column.name == meta.id_column {
        return match meta.id_generation {
            IdGeneration::RowId => format!("\"{}\" INTEGER PRIMARY KEY", column.name),
            IdGeneration::Uuid | IdGeneration::Assigned => {
                format!("\"{}\" {} PRIMARY KEY NOT NULL", column.name, column.sql_type)
            }
        };
    }
    if column.nullable {
        format!("\"{}\" {}", column.name, column.sql_type)
    } else {
        format!("\"{}\" {} NOT NULL", column.name, column.sql_type)
    }
}

fn add_missing_columns(conn: &Connection, meta: &EntityMeta) -> DbResult<()> {
    for column in meta.columns {
        if table_has_column(conn, meta.table, column.name)? {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {};",
            meta.table, column.name, column.sql_type
        ))?;
        info!(
            "event=schema_sync module=db status=column_added table={} column={}",
            meta.table, column.name
        );
    }
    Ok(())
}

fn validate_table(conn: &Connection, meta: &EntityMeta) -> DbResult<()> {
    if !table_exists(conn, meta.table)? {
        return Err(DbError::MissingRequiredTable(meta.table.to_string()));
    }
    for column in meta.columns {
        if !table_has_column(conn, meta.table, column.name)? {
            return Err(DbError::MissingRequiredColumn {
                table: meta.table.to_string(),
                column: column.name.to_string(),
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1 COLLATE NOCASE
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::{sync_schema, SchemaSync};
    use crate::db::DbError;
    use crate::model::entity::{ColumnDef, EntityMeta, IdGeneration};
    use rusqlite::Connection;
    use std::any::TypeId;

    const COLUMNS: &[ColumnDef] = &[
        ColumnDef::new("id", "INTEGER"),
        ColumnDef::new("name", "TEXT").not_null(),
        ColumnDef::new("age", "INTEGER"),
    ];

    fn meta() -> EntityMeta {
        EntityMeta {
            type_id: TypeId::of::<()>(),
            type_name: "Probe".to_string(),
            table: "gadget",
            id_column: "id",
            id_generation: IdGeneration::RowId,
            columns: COLUMNS,
        }
    }

    #[test]
    fn parse_accepts_known_modes() {
        assert_eq!(SchemaSync::parse("UPDATE"), Some(SchemaSync::Update));
        assert_eq!(SchemaSync::parse(""), Some(SchemaSync::None));
        assert_eq!(SchemaSync::parse("drop-all"), None);
    }

    #[test]
    fn create_then_validate_succeeds() {
        let mut conn = Connection::open_in_memory().unwrap();
        sync_schema(&mut conn, SchemaSync::Create, &[meta()]).unwrap();
        sync_schema(&mut conn, SchemaSync::Validate, &[meta()]).unwrap();
    }

    #[test]
    fn update_adds_missing_columns() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE gadget (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();

        sync_schema(&mut conn, SchemaSync::Update, &[meta()]).unwrap();

        conn.execute("INSERT INTO gadget (name, age) VALUES ('a', 3);", [])
            .unwrap();
    }

    #[test]
    fn validate_reports_missing_table_and_column() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = sync_schema(&mut conn, SchemaSync::Validate, &[meta()]).unwrap_err();
        assert!(matches!(err, DbError::MissingRequiredTable(table) if table == "gadget"));

        conn.execute_batch("CREATE TABLE gadget (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        let err = sync_schema(&mut conn, SchemaSync::Validate, &[meta()]).unwrap_err();
        assert!(matches!(
            err,
            DbError::MissingRequiredColumn { ref column, .. } if column == "age"
        ));
    }
}
