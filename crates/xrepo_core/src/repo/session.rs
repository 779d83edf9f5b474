//! Explicit transaction context carrying every query operation.
//!
//! # Responsibility
//! - Run entity CRUD, criteria queries, raw SQL and pagination against the
//!   connection of the enclosing transaction.
//!
//! # Invariants
//! - A `Session` only exists inside `TransactionScope::run`; everything it
//!   executes belongs to that one transaction.
//! - Argument errors are raised before any statement is prepared.
//! - Log lines carry metadata only, never SQL text or bound values.

use super::error::{RepoError, RepoResult};
use crate::db::PooledConnection;
use crate::model::entity::{Entity, EntityMeta, EntityRegistry, IdGeneration};
use crate::model::page::{Page, PageRequest};
use crate::model::record::Record;
use crate::query::binder::{bind, BoundStatement, SqlParam};
use crate::query::criteria::{Criteria, Window};
use crate::query::entity_query::rewrite_entity_names;
use crate::query::materialize::{FromRecord, RowMapper};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

pub struct Session<'r> {
    conn: Rc<PooledConnection>,
    registry: &'r EntityRegistry,
}

impl<'r> Session<'r> {
    pub(crate) fn new(conn: Rc<PooledConnection>, registry: &'r EntityRegistry) -> Self {
        Self { conn, registry }
    }

    /// Connection of the enclosing transaction.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn registry(&self) -> &EntityRegistry {
        self.registry
    }

    /// Runs `work` in this session's transaction.
    pub fn trans<T, W>(&self, work: W) -> RepoResult<T>
    where
        W: FnOnce(&Session<'r>) -> RepoResult<T>,
    {
        work(self)
    }

    /// Inserts or updates `entity`, assigning a generated id when needed.
    ///
    /// Audit stamps, when present, are touched first. An entity with an id is
    /// updated; when no row matched it is inserted with that id.
    pub fn save_or_update<E: Entity>(&self, mut entity: E) -> RepoResult<E> {
        let meta = self.registry.meta::<E>()?;
        if let Some(stamps) = entity.audit_stamps() {
            stamps.touch(chrono::Utc::now().timestamp_millis());
        }

        match entity.id().filter(|id| !matches!(id, Value::Null)) {
            Some(id) => {
                let row = entity.to_row();
                if self.update_row(meta, &row, &id)? == 0 {
                    self.insert_row(meta, &row, Some(id))?;
                }
            }
            None => match meta.id_generation {
                IdGeneration::RowId => {
                    self.insert_row(meta, &entity.to_row(), None)?;
                    entity.assign_id(Value::Integer(self.conn.last_insert_rowid()));
                }
                IdGeneration::Uuid => {
                    let id = Value::Text(Uuid::new_v4().to_string());
                    entity.assign_id(id.clone());
                    self.insert_row(meta, &entity.to_row(), Some(id))?;
                }
                IdGeneration::Assigned => {
                    return Err(RepoError::Argument(format!(
                        "entity `{}` requires an assigned id",
                        meta.type_name
                    )));
                }
            },
        }
        Ok(entity)
    }

    /// Primary-key lookup; a miss is `None`.
    pub fn find_by_id<E: Entity>(&self, id: impl Into<SqlParam>) -> RepoResult<Option<E>> {
        let id = id_value(id.into())?;
        let meta = self.registry.meta::<E>()?;
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" = ? LIMIT 1",
            meta.select_list(),
            meta.table,
            meta.id_column
        );
        let bound = bind(&sql, &[SqlParam::Value(id)])?;
        Ok(self.query_bound(&bound, Some(1))?.into_iter().next())
    }

    /// First match of `criteria`; several matches are not an error.
    pub fn find<E: Entity>(&self, criteria: &Criteria) -> RepoResult<Option<E>> {
        let meta = self.registry.meta::<E>()?;
        let compiled = criteria.compile_select(meta, Window::first())?;
        let bound = bind(&compiled.sql, &compiled.params)?;
        Ok(self.query_bound(&bound, Some(1))?.into_iter().next())
    }

    /// Matches of `criteria`, skipping `start` rows and returning at most `limit`.
    pub fn find_list<E: Entity>(
        &self,
        criteria: &Criteria,
        start: Option<u64>,
        limit: Option<u64>,
    ) -> RepoResult<Vec<E>> {
        let window = Window::new(start, limit)?;
        self.find_window(criteria, window)
    }

    pub fn find_all<E: Entity>(&self) -> RepoResult<Vec<E>> {
        self.find_window(&Criteria::all(), Window::unbounded())
    }

    /// One page of `criteria` matches plus the total match count.
    pub fn find_page<E: Entity>(
        &self,
        page: u64,
        page_size: u64,
        criteria: &Criteria,
    ) -> RepoResult<Page<E>> {
        let request = PageRequest::new(page, page_size)?;
        let list = self.find_window(
            criteria,
            Window::offset_limit(request.offset(), request.page_size()),
        )?;
        let total = self.count::<E>(criteria)?;
        Ok(Page::of(request, list, total))
    }

    pub fn count<E: Entity>(&self, criteria: &Criteria) -> RepoResult<u64> {
        let meta = self.registry.meta::<E>()?;
        let compiled = criteria.compile_count(meta)?;
        let bound = bind(&compiled.sql, &compiled.params)?;
        self.count_bound(&bound)
    }

    /// Deletes the row of `entity`; `true` when a row was removed.
    pub fn delete<E: Entity>(&self, entity: &E) -> RepoResult<bool> {
        let meta = self.registry.meta::<E>()?;
        let id = entity
            .id()
            .filter(|id| !matches!(id, Value::Null))
            .ok_or_else(|| {
                RepoError::Argument(format!(
                    "cannot delete `{}` without an id",
                    meta.type_name
                ))
            })?;
        self.delete_where_id(meta, id)
    }

    pub fn delete_by_id<E: Entity>(&self, id: impl Into<SqlParam>) -> RepoResult<bool> {
        let id = id_value(id.into())?;
        let meta = self.registry.meta::<E>()?;
        self.delete_where_id(meta, id)
    }

    /// Runs a modifying statement; returns the affected row count.
    pub fn execute(&self, sql: &str, params: &[SqlParam]) -> RepoResult<usize> {
        let bound = bind(require_sql(sql)?, params)?;
        let mut stmt = bound.prepare(&self.conn)?;
        let affected = stmt.raw_execute()?;
        debug!("event=sql_execute module=repo status=ok affected={affected}");
        Ok(affected)
    }

    pub fn first_row(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Option<Record>> {
        self.first_row_as(sql, params)
    }

    pub fn first_row_as<R: FromRecord>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> RepoResult<Option<R>> {
        let bound = bind(require_sql(sql)?, params)?;
        Ok(self.query_bound(&bound, Some(1))?.into_iter().next())
    }

    pub fn rows(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Vec<Record>> {
        self.rows_as(sql, params)
    }

    pub fn rows_as<R: FromRecord>(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Vec<R>> {
        let bound = bind(require_sql(sql)?, params)?;
        self.query_bound(&bound, None)
    }

    /// Like `first_row_as`, with registered entity type names usable as tables.
    pub fn entity_first_row<R: FromRecord>(
        &self,
        query: &str,
        params: &[SqlParam],
    ) -> RepoResult<Option<R>> {
        let sql = rewrite_entity_names(require_sql(query)?, self.registry);
        self.first_row_as(&sql, params)
    }

    /// Like `rows_as`, with registered entity type names usable as tables.
    pub fn entity_rows<R: FromRecord>(&self, query: &str, params: &[SqlParam]) -> RepoResult<Vec<R>> {
        let sql = rewrite_entity_names(require_sql(query)?, self.registry);
        self.rows_as(&sql, params)
    }

    pub fn sql_page(
        &self,
        sql: &str,
        page: u64,
        page_size: u64,
        params: &[SqlParam],
    ) -> RepoResult<Page<Record>> {
        self.sql_page_as(sql, page, page_size, params)
    }

    /// Windows `sql` to one page and counts all of its rows with the same params.
    pub fn sql_page_as<R: FromRecord>(
        &self,
        sql: &str,
        page: u64,
        page_size: u64,
        params: &[SqlParam],
    ) -> RepoResult<Page<R>> {
        let request = PageRequest::new(page, page_size)?;
        let inner = require_sql(sql)?.trim_end_matches(|c: char| c == ';' || c.is_whitespace());

        let list_sql = format!(
            "SELECT * FROM ({inner}\n) AS t LIMIT {} OFFSET {}",
            request.page_size(),
            request.offset()
        );
        let list = self.query_bound(&bind(&list_sql, params)?, None)?;

        let count_sql = format!("select count(1) from ({inner}\n) as t");
        let total = self.count_bound(&bind(&count_sql, params)?)?;
        Ok(Page::of(request, list, total))
    }

    /// SQLite library version of the connection.
    pub fn db_version(&self) -> RepoResult<String> {
        Ok(self
            .conn
            .query_row("SELECT sqlite_version();", [], |row| row.get(0))?)
    }

    /// File stem of the main database, or `main` when it has no file.
    pub fn db_name(&self) -> RepoResult<String> {
        let file: Option<String> = self.conn.query_row(
            "SELECT file FROM pragma_database_list WHERE name = 'main';",
            [],
            |row| row.get(0),
        )?;
        let stem = file
            .filter(|file| !file.is_empty())
            .and_then(|file| {
                Path::new(&file)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });
        Ok(stem.unwrap_or_else(|| "main".to_string()))
    }

    fn find_window<E: Entity>(&self, criteria: &Criteria, window: Window) -> RepoResult<Vec<E>> {
        let meta = self.registry.meta::<E>()?;
        let compiled = criteria.compile_select(meta, window)?;
        let bound = bind(&compiled.sql, &compiled.params)?;
        self.query_bound(&bound, None)
    }

    fn query_bound<R: FromRecord>(
        &self,
        bound: &BoundStatement,
        max_rows: Option<usize>,
    ) -> RepoResult<Vec<R>> {
        let mut stmt = bound.prepare(&self.conn)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();
        let mapper = RowMapper::<R>::resolve(columns);

        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(row.get::<_, Value>(index)?);
            }
            out.push(mapper.map_row(values)?);
            if max_rows.is_some_and(|max| out.len() >= max) {
                break;
            }
        }
        Ok(out)
    }

    fn count_bound(&self, bound: &BoundStatement) -> RepoResult<u64> {
        let count = self
            .query_bound::<i64>(bound, Some(1))?
            .into_iter()
            .next()
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn insert_row(
        &self,
        meta: &EntityMeta,
        row: &[(&'static str, Value)],
        id: Option<Value>,
    ) -> RepoResult<usize> {
        let mut columns = Vec::with_capacity(row.len() + 1);
        let mut values = Vec::with_capacity(row.len() + 1);
        for (name, value) in row {
            columns.push(format!("\"{}\"", declared_column(meta, name)?));
            values.push(value);
        }
        if let Some(id) = id.as_ref() {
            columns.push(format!("\"{}\"", meta.id_column));
            values.push(id);
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO \"{}\" DEFAULT VALUES", meta.table)
        } else {
            let placeholders = (1..=values.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({placeholders})",
                meta.table,
                columns.join(", ")
            )
        };
        let inserted = self.conn.execute(&sql, params_from_iter(values))?;
        debug!(
            "event=entity_insert module=repo status=ok entity={}",
            meta.type_name
        );
        Ok(inserted)
    }

    fn update_row(
        &self,
        meta: &EntityMeta,
        row: &[(&'static str, Value)],
        id: &Value,
    ) -> RepoResult<usize> {
        if row.is_empty() {
            let sql = format!(
                "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?1",
                meta.table, meta.id_column
            );
            let existing: i64 = self.conn.query_row(&sql, [id], |r| r.get(0))?;
            return Ok(usize::try_from(existing).unwrap_or(0));
        }

        let mut assignments = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len() + 1);
        for (index, (name, value)) in row.iter().enumerate() {
            assignments.push(format!("\"{}\" = ?{}", declared_column(meta, name)?, index + 1));
            values.push(value);
        }
        values.push(id);
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{}\" = ?{}",
            meta.table,
            assignments.join(", "),
            meta.id_column,
            values.len()
        );
        let updated = self.conn.execute(&sql, params_from_iter(values))?;
        debug!(
            "event=entity_update module=repo status=ok entity={} affected={updated}",
            meta.type_name
        );
        Ok(updated)
    }

    fn delete_where_id(&self, meta: &EntityMeta, id: Value) -> RepoResult<bool> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1",
            meta.table, meta.id_column
        );
        let deleted = self.conn.execute(&sql, [id])?;
        debug!(
            "event=entity_delete module=repo status=ok entity={} affected={deleted}",
            meta.type_name
        );
        Ok(deleted > 0)
    }
}

/// Trimmed statement text; empty text is an argument error.
pub(crate) fn require_sql(sql: &str) -> RepoResult<&str> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Argument("sql must not be empty".to_string()));
    }
    Ok(trimmed)
}

/// Scalar, non-null id value.
pub(crate) fn id_value(id: SqlParam) -> RepoResult<Value> {
    match id {
        SqlParam::Value(value) => Ok(value),
        SqlParam::Null => Err(RepoError::Argument("id must not be null".to_string())),
        SqlParam::List(_) => Err(RepoError::Argument("id must be a single value".to_string())),
    }
}

fn declared_column(meta: &EntityMeta, name: &str) -> RepoResult<&'static str> {
    meta.column(name).ok_or_else(|| {
        RepoError::Config(format!(
            "entity `{}` wrote undeclared column `{name}`",
            meta.type_name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{id_value, require_sql};
    use crate::query::binder::SqlParam;
    use crate::repo::error::RepoError;

    #[test]
    fn require_sql_rejects_blank_text() {
        assert!(matches!(require_sql("  \n"), Err(RepoError::Argument(_))));
        assert_eq!(require_sql(" SELECT 1 ").unwrap(), "SELECT 1");
    }

    #[test]
    fn id_value_requires_one_scalar() {
        assert!(matches!(id_value(SqlParam::Null), Err(RepoError::Argument(_))));
        assert!(matches!(
            id_value(SqlParam::from(vec![1, 2])),
            Err(RepoError::Argument(_))
        ));
        assert!(id_value(SqlParam::from("sys")).is_ok());
    }
}
