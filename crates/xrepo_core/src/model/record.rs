//! Generic string-keyed result row.

use rusqlite::types::{FromSql, Value, ValueRef};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

/// One result row keyed by column alias, in statement column order.
///
/// Column names are shared by every record of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value for `column`; exact alias match first, then ASCII case-insensitive.
    pub fn get(&self, column: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|name| name == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(column))
            })?;
        self.values.get(index)
    }

    /// Typed read of `column`. `None` when the column is absent, null, or
    /// not convertible to `T`.
    pub fn get_as<T: FromSql>(&self, column: &str) -> Option<T> {
        let value = self.get(column)?;
        if matches!(value, Value::Null) {
            return None;
        }
        T::column_result(ValueRef::from(value)).ok()
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            match value {
                Value::Null => map.serialize_entry(column, &Option::<i64>::None)?,
                Value::Integer(v) => map.serialize_entry(column, v)?,
                Value::Real(v) => map.serialize_entry(column, v)?,
                Value::Text(v) => map.serialize_entry(column, v)?,
                Value::Blob(v) => map.serialize_entry(column, v)?,
            }
        }
        map.end()
    }
}
