//! Typed filter/sort/distinct criteria compiled to SQLite statements.
//!
//! # Responsibility
//! - Let callers describe entity queries as values instead of SQL text.
//! - Compile a criteria into a windowed SELECT or a COUNT for one entity.
//!
//! # Invariants
//! - Every column name is checked against the entity's declared columns and
//!   emitted in its declared spelling, double-quoted.
//! - Values are never interpolated; they travel as `?` parameters through the
//!   binder.
//! - COUNT statements drop ordering.

use crate::model::entity::EntityMeta;
use crate::model::page::MAX_SQL_INTEGER;
use crate::query::binder::{flatten, SqlParam};
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
        }
    }
}

/// Filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Null {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    fn render(&self, meta: &EntityMeta, sql: &mut String, params: &mut Vec<SqlParam>) -> RepoResult<()> {
        match self {
            Self::Compare { column, op, value } => {
                sql.push_str(&quoted_column(meta, column)?);
                sql.push(' ');
                sql.push_str(op.as_sql());
                sql.push_str(" ?");
                params.push(SqlParam::from(value.clone()));
            }
            Self::Null { column, negated } => {
                sql.push_str(&quoted_column(meta, column)?);
                sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Self::In {
                column,
                values,
                negated,
            } => {
                let column = quoted_column(meta, column)?;
                if values.is_empty() {
                    sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                } else {
                    sql.push_str(&column);
                    sql.push_str(if *negated { " NOT IN (?)" } else { " IN (?)" });
                    params.push(SqlParam::List(values.clone()));
                }
            }
            Self::And(items) => render_group(items, " AND ", "1 = 1", meta, sql, params)?,
            Self::Or(items) => render_group(items, " OR ", "1 = 0", meta, sql, params)?,
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(meta, sql, params)?;
                sql.push(')');
            }
        }
        Ok(())
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

fn render_group(
    items: &[Expr],
    joiner: &str,
    empty: &str,
    meta: &EntityMeta,
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) -> RepoResult<()> {
    if items.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    sql.push('(');
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            sql.push_str(joiner);
        }
        item.render(meta, sql, params)?;
    }
    sql.push(')');
    Ok(())
}

fn quoted_column(meta: &EntityMeta, name: &str) -> RepoResult<String> {
    meta.column(name)
        .map(|column| format!("\"{column}\""))
        .ok_or_else(|| {
            RepoError::Argument(format!(
                "unknown column `{name}` for entity `{}`",
                meta.type_name
            ))
        })
}

/// Column handle used to build expressions.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
}

/// Starts an expression on `name`.
pub fn col(name: impl Into<String>) -> Column {
    Column { name: name.into() }
}

impl Column {
    /// `= value`; a null value becomes `IS NULL` and a list becomes `IN`.
    pub fn eq(self, value: impl Into<SqlParam>) -> Expr {
        match value.into() {
            SqlParam::Null => self.is_null(),
            SqlParam::List(values) => self.in_values(values, false),
            SqlParam::Value(value) => self.compare(CompareOp::Eq, value),
        }
    }

    /// `<> value`; a null value becomes `IS NOT NULL` and a list becomes `NOT IN`.
    pub fn ne(self, value: impl Into<SqlParam>) -> Expr {
        match value.into() {
            SqlParam::Null => self.is_not_null(),
            SqlParam::List(values) => self.in_values(values, true),
            SqlParam::Value(value) => self.compare(CompareOp::Ne, value),
        }
    }

    pub fn gt(self, value: impl Into<SqlParam>) -> Expr {
        self.compare(CompareOp::Gt, scalar(value))
    }

    pub fn ge(self, value: impl Into<SqlParam>) -> Expr {
        self.compare(CompareOp::Ge, scalar(value))
    }

    pub fn lt(self, value: impl Into<SqlParam>) -> Expr {
        self.compare(CompareOp::Lt, scalar(value))
    }

    pub fn le(self, value: impl Into<SqlParam>) -> Expr {
        self.compare(CompareOp::Le, scalar(value))
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        self.compare(CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_in<I, T>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<SqlParam>,
    {
        self.in_values(flatten(values), false)
    }

    pub fn not_in<I, T>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<SqlParam>,
    {
        self.in_values(flatten(values), true)
    }

    pub fn is_null(self) -> Expr {
        Expr::Null {
            column: self.name,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Null {
            column: self.name,
            negated: true,
        }
    }

    fn compare(self, op: CompareOp, value: Value) -> Expr {
        Expr::Compare {
            column: self.name,
            op,
            value,
        }
    }

    fn in_values(self, values: Vec<Value>, negated: bool) -> Expr {
        Expr::In {
            column: self.name,
            values,
            negated,
        }
    }
}

/// Lists compare against their first element.
fn scalar(value: impl Into<SqlParam>) -> Value {
    match value.into() {
        SqlParam::Null => Value::Null,
        SqlParam::Value(value) => value,
        SqlParam::List(values) => values.into_iter().next().unwrap_or(Value::Null),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderBy {
    column: String,
    ascending: bool,
}

/// Filter, ordering and distinctness of an entity query.
///
/// An empty criteria selects every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filter: Option<Expr>,
    order: Vec<OrderBy>,
    distinct: bool,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Criteria without filter or ordering.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds `expr`, AND-combined with any existing filter.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn asc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            ascending: true,
        });
        self
    }

    pub fn desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            ascending: false,
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// `SELECT` of every entity column, windowed by `window`.
    pub fn compile_select(&self, meta: &EntityMeta, window: Window) -> RepoResult<CompiledQuery> {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&meta.select_list());
        sql.push_str(&format!(" FROM \"{}\"", meta.table));

        let mut params = Vec::new();
        self.render_where(meta, &mut sql, &mut params)?;

        for (index, order) in self.order.iter().enumerate() {
            sql.push_str(if index == 0 { " ORDER BY " } else { ", " });
            sql.push_str(&quoted_column(meta, &order.column)?);
            sql.push_str(if order.ascending { " ASC" } else { " DESC" });
        }
        window.render(&mut sql);

        Ok(CompiledQuery { sql, params })
    }

    /// `COUNT(*)`, or `COUNT(DISTINCT id)` for distinct criteria. Ordering is dropped.
    pub fn compile_count(&self, meta: &EntityMeta) -> RepoResult<CompiledQuery> {
        let mut sql = if self.distinct {
            format!(
                "SELECT COUNT(DISTINCT \"{}\") FROM \"{}\"",
                meta.id_column, meta.table
            )
        } else {
            format!("SELECT COUNT(*) FROM \"{}\"", meta.table)
        };
        let mut params = Vec::new();
        self.render_where(meta, &mut sql, &mut params)?;
        Ok(CompiledQuery { sql, params })
    }

    fn render_where(
        &self,
        meta: &EntityMeta,
        sql: &mut String,
        params: &mut Vec<SqlParam>,
    ) -> RepoResult<()> {
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.render(meta, sql, params)?;
        }
        Ok(())
    }
}

/// SQL text with `?` placeholders and the values to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Row window applied to list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    start: Option<u64>,
    limit: Option<u64>,
}

impl Window {
    /// `start` rows are skipped; at most `limit` rows are returned.
    ///
    /// # Errors
    /// - `Argument` when `limit` is `Some(0)`.
    /// - `Argument` when `start` or `limit` exceeds `i64::MAX`.
    pub fn new(start: Option<u64>, limit: Option<u64>) -> RepoResult<Self> {
        if limit == Some(0) {
            return Err(RepoError::Argument("limit must be > 0".to_string()));
        }
        for (name, value) in [("start", start), ("limit", limit)] {
            if let Some(value) = value.filter(|value| *value > MAX_SQL_INTEGER) {
                return Err(RepoError::Argument(format!(
                    "{name} must be <= {MAX_SQL_INTEGER}, got {value}"
                )));
            }
        }
        Ok(Self { start, limit })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub(crate) fn first() -> Self {
        Self {
            start: None,
            limit: Some(1),
        }
    }

    pub(crate) fn offset_limit(offset: u64, limit: u64) -> Self {
        Self {
            start: Some(offset),
            limit: Some(limit),
        }
    }

    fn render(&self, sql: &mut String) {
        match (self.start, self.limit) {
            (None, None) => {}
            (None, Some(limit)) => sql.push_str(&format!(" LIMIT {limit}")),
            (Some(start), Some(limit)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {start}"));
            }
            (Some(start), None) => sql.push_str(&format!(" LIMIT -1 OFFSET {start}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{col, Criteria, Window};
    use crate::model::entity::{ColumnDef, EntityMeta, IdGeneration};
    use crate::query::binder::SqlParam;
    use crate::repo::error::RepoError;
    use rusqlite::types::Value;
    use std::any::TypeId;

    const COLUMNS: &[ColumnDef] = &[
        ColumnDef::new("id", "INTEGER"),
        ColumnDef::new("name", "TEXT"),
        ColumnDef::new("age", "INTEGER"),
    ];

    fn meta() -> EntityMeta {
        EntityMeta {
            type_id: TypeId::of::<()>(),
            type_name: "Person".to_string(),
            table: "person",
            id_column: "id",
            id_generation: IdGeneration::RowId,
            columns: COLUMNS,
        }
    }

    #[test]
    fn empty_criteria_selects_everything() {
        let compiled = Criteria::all()
            .compile_select(&meta(), Window::unbounded())
            .unwrap();
        assert_eq!(compiled.sql, "SELECT \"id\", \"name\", \"age\" FROM \"person\"");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn filters_order_and_window_compile_in_place() {
        let criteria = Criteria::new()
            .filter(col("NAME").like("a%"))
            .filter(col("age").ge(18).or(col("age").is_null()))
            .desc("age")
            .asc("id");
        let compiled = criteria
            .compile_select(&meta(), Window::new(Some(10), Some(5)).unwrap())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"id\", \"name\", \"age\" FROM \"person\" WHERE (\"name\" LIKE ? AND (\"age\" >= ? OR \"age\" IS NULL)) ORDER BY \"age\" DESC, \"id\" ASC LIMIT 5 OFFSET 10"
        );
        assert_eq!(
            compiled.params,
            vec![
                SqlParam::Value(Value::Text("a%".to_string())),
                SqlParam::Value(Value::Integer(18)),
            ]
        );
    }

    #[test]
    fn eq_promotes_null_and_lists() {
        let compiled = Criteria::new()
            .filter(col("name").eq(Option::<String>::None))
            .filter(col("id").eq(vec![1, 2]))
            .compile_count(&meta())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) FROM \"person\" WHERE (\"name\" IS NULL AND \"id\" IN (?))"
        );
        assert_eq!(
            compiled.params,
            vec![SqlParam::List(vec![Value::Integer(1), Value::Integer(2)])]
        );
    }

    #[test]
    fn empty_in_lists_short_circuit() {
        let compiled = Criteria::new()
            .filter(col("id").is_in(Vec::<i64>::new()))
            .filter(!col("id").not_in(Vec::<i64>::new()))
            .compile_count(&meta())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) FROM \"person\" WHERE (1 = 0 AND NOT (1 = 1))"
        );
    }

    #[test]
    fn distinct_count_uses_id_and_drops_ordering() {
        let compiled = Criteria::new()
            .distinct()
            .asc("name")
            .compile_count(&meta())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(DISTINCT \"id\") FROM \"person\""
        );
    }

    #[test]
    fn start_without_limit_uses_unbounded_limit() {
        let compiled = Criteria::all()
            .compile_select(&meta(), Window::new(Some(3), None).unwrap())
            .unwrap();
        assert!(compiled.sql.ends_with(" LIMIT -1 OFFSET 3"));
    }

    #[test]
    fn unknown_columns_and_zero_limit_are_argument_errors() {
        let err = Criteria::new()
            .filter(col("nope").eq(1))
            .compile_count(&meta())
            .unwrap_err();
        assert!(matches!(err, RepoError::Argument(_)));

        let err = Criteria::new()
            .asc("missing")
            .compile_select(&meta(), Window::unbounded())
            .unwrap_err();
        assert!(matches!(err, RepoError::Argument(_)));

        assert!(matches!(
            Window::new(None, Some(0)),
            Err(RepoError::Argument(_))
        ));
    }

    #[test]
    fn window_bounds_must_fit_sqlite_integers() {
        let too_big = i64::MAX as u64 + 1;
        assert!(matches!(
            Window::new(Some(too_big), None),
            Err(RepoError::Argument(_))
        ));
        assert!(matches!(
            Window::new(None, Some(u64::MAX)),
            Err(RepoError::Argument(_))
        ));

        let compiled = Criteria::all()
            .compile_select(&meta(), Window::new(Some(i64::MAX as u64), Some(1)).unwrap())
            .unwrap();
        assert!(compiled.sql.ends_with(&format!(" LIMIT 1 OFFSET {}", i64::MAX)));
    }
}
