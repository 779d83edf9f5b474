//! Result materialization into records, scalars and declared shapes.
//!
//! # Responsibility
//! - Resolve, once per query, how each result column reaches the target type.
//! - Apply that resolution to every row.
//!
//! # Invariants
//! - Null values are never assigned; shape fields keep their `Default` value.
//! - Unmapped columns and failed field conversions are logged at `warn` and
//!   skipped; the row is still produced.
//! - Each shape's binding table is built once per process.

use crate::model::record::Record;
use crate::repo::error::{RepoError, RepoResult};
use log::warn;
use once_cell::sync::Lazy;
use rusqlite::types::{FromSql, FromSqlResult, Value, ValueRef};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A target type filled column by column from a fresh `Default` value.
pub trait Shape: Default + 'static {
    /// Declares the column bindings of this shape.
    fn bind(table: &mut BindingTable<Self>);
}

type Setter<T> = Box<dyn Fn(&mut T, &Value) -> FromSqlResult<()> + Send + Sync>;

struct Binding<T> {
    column: &'static str,
    set: Setter<T>,
}

/// Declarative column → setter table for one shape.
pub struct BindingTable<T> {
    entries: Vec<Binding<T>>,
}

impl<T: 'static> BindingTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Binds `column` to `set`, converting the column value with `FromSql`.
    pub fn field<V>(&mut self, column: &'static str, set: fn(&mut T, V)) -> &mut Self
    where
        V: FromSql + 'static,
    {
        self.entries.push(Binding {
            column,
            set: Box::new(move |target, value| {
                let converted = V::column_result(ValueRef::from(value))?;
                set(target, converted);
                Ok(())
            }),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact column name first, then ASCII case-insensitive.
    fn position(&self, alias: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.column == alias)
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|entry| entry.column.eq_ignore_ascii_case(alias))
            })
    }
}

static BINDING_TABLES: Lazy<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Cached binding table of `T`, built on first use.
pub fn binding_table<T: Shape>() -> Arc<BindingTable<T>> {
    let type_id = TypeId::of::<T>();
    let cached = BINDING_TABLES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
        .cloned();
    if let Some(Ok(table)) = cached.map(|entry| entry.downcast::<BindingTable<T>>()) {
        return table;
    }

    let mut table = BindingTable::new();
    T::bind(&mut table);
    let table = Arc::new(table);
    let stored = BINDING_TABLES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(type_id)
        .or_insert_with(|| table.clone() as Arc<dyn Any + Send + Sync>)
        .clone();
    stored.downcast::<BindingTable<T>>().unwrap_or(table)
}

/// Per-query row conversion, resolved once from the result column aliases.
pub struct RowMapper<T> {
    map: Box<dyn Fn(Vec<Value>) -> RepoResult<T>>,
}

impl<T> RowMapper<T> {
    pub fn new(map: impl Fn(Vec<Value>) -> RepoResult<T> + 'static) -> Self {
        Self { map: Box::new(map) }
    }

    pub fn map_row(&self, values: Vec<Value>) -> RepoResult<T> {
        (self.map)(values)
    }
}

impl<T: FromRecord> RowMapper<T> {
    pub fn resolve(columns: Arc<[String]>) -> Self {
        T::mapper(columns)
    }
}

/// Types a result row can be materialized into.
pub trait FromRecord: Sized {
    fn mapper(columns: Arc<[String]>) -> RowMapper<Self>;
}

impl FromRecord for Record {
    fn mapper(columns: Arc<[String]>) -> RowMapper<Self> {
        RowMapper::new(move |values| Ok(Record::new(columns.clone(), values)))
    }
}

fn first_column<T: FromSql>(values: Vec<Value>) -> RepoResult<T> {
    let value = values
        .into_iter()
        .next()
        .ok_or_else(|| RepoError::Materialize("result row has no columns".to_string()))?;
    T::column_result(ValueRef::from(&value)).map_err(RepoError::from)
}

macro_rules! scalar_record {
    ($($ty:ty),*) => {
        $(
            impl FromRecord for $ty {
                fn mapper(_columns: Arc<[String]>) -> RowMapper<Self> {
                    RowMapper::new(first_column::<$ty>)
                }
            }
        )*
    };
}

scalar_record!(i64, i32, u32, f64, bool, String, Vec<u8>, Value);

impl<T: FromSql + 'static> FromRecord for Option<T> {
    fn mapper(_columns: Arc<[String]>) -> RowMapper<Self> {
        RowMapper::new(first_column::<Option<T>>)
    }
}

impl<T: Shape> FromRecord for T {
    fn mapper(columns: Arc<[String]>) -> RowMapper<Self> {
        let table = binding_table::<T>();
        let shape = std::any::type_name::<T>();
        let slots: Vec<Option<usize>> = columns
            .iter()
            .map(|alias| {
                let slot = table.position(alias);
                if slot.is_none() {
                    warn!(
                        "event=materialize module=query status=unmapped_column shape={shape} column={alias}"
                    );
                }
                slot
            })
            .collect();

        RowMapper::new(move |values| {
            let mut target = T::default();
            for (index, value) in values.iter().enumerate() {
                if matches!(value, Value::Null) {
                    continue;
                }
                let Some(Some(slot)) = slots.get(index) else {
                    continue;
                };
                let binding = &table.entries[*slot];
                if let Err(err) = (binding.set)(&mut target, value) {
                    warn!(
                        "event=materialize module=query status=conversion_skipped shape={shape} column={} error={err}",
                        binding.column
                    );
                }
            }
            Ok(target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{binding_table, BindingTable, FromRecord, RowMapper, Shape};
    use crate::model::record::Record;
    use crate::repo::error::RepoError;
    use rusqlite::types::Value;
    use std::sync::Arc;

    #[derive(Debug, Default, PartialEq)]
    struct DbRow {
        db: String,
        host: Option<String>,
        port: i64,
    }

    impl Shape for DbRow {
        fn bind(table: &mut BindingTable<Self>) {
            table
                .field("Db", |row: &mut Self, v: String| row.db = v)
                .field("host", |row: &mut Self, v: String| row.host = Some(v))
                .field("port", |row: &mut Self, v: i64| row.port = v);
        }
    }

    fn columns(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn shape_matches_exact_then_case_insensitive_and_skips_unknown() {
        let mapper = RowMapper::<DbRow>::resolve(columns(&["Db", "HOST", "extra"]));
        let row = mapper
            .map_row(vec![
                Value::Text("sys".to_string()),
                Value::Text("localhost".to_string()),
                Value::Integer(1),
            ])
            .unwrap();
        assert_eq!(
            row,
            DbRow {
                db: "sys".to_string(),
                host: Some("localhost".to_string()),
                port: 0,
            }
        );
    }

    #[test]
    fn null_values_keep_defaults() {
        let mapper = RowMapper::<DbRow>::resolve(columns(&["Db", "host", "port"]));
        let row = mapper
            .map_row(vec![Value::Text("sys".to_string()), Value::Null, Value::Null])
            .unwrap();
        assert_eq!(row.host, None);
        assert_eq!(row.port, 0);
    }

    #[test]
    fn failed_field_conversion_is_skipped() {
        let mapper = RowMapper::<DbRow>::resolve(columns(&["Db", "port"]));
        let row = mapper
            .map_row(vec![
                Value::Text("sys".to_string()),
                Value::Text("not a number".to_string()),
            ])
            .unwrap();
        assert_eq!(row.db, "sys");
        assert_eq!(row.port, 0);
    }

    #[test]
    fn scalars_take_first_column() {
        let mapper = RowMapper::<i64>::resolve(columns(&["count(1)", "other"]));
        assert_eq!(
            mapper
                .map_row(vec![Value::Integer(3), Value::Text("x".to_string())])
                .unwrap(),
            3
        );

        let mapper = RowMapper::<Option<String>>::resolve(columns(&["name"]));
        assert_eq!(mapper.map_row(vec![Value::Null]).unwrap(), None);
    }

    #[test]
    fn scalar_conversion_failure_is_a_materialize_error() {
        let mapper = RowMapper::<i64>::resolve(columns(&["name"]));
        let err = mapper
            .map_row(vec![Value::Text("sys".to_string())])
            .unwrap_err();
        assert!(matches!(err, RepoError::Materialize(_)));
    }

    #[test]
    fn records_keep_alias_order() {
        let mapper = Record::mapper(columns(&["b", "a"]));
        let record = mapper
            .map_row(vec![Value::Integer(2), Value::Integer(1)])
            .unwrap();
        let aliases: Vec<&str> = record.iter().map(|(alias, _)| alias).collect();
        assert_eq!(aliases, ["b", "a"]);
    }

    #[test]
    fn binding_table_is_built_once() {
        let first = binding_table::<DbRow>();
        let second = binding_table::<DbRow>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
    }
}
