//! Placeholder scanning and dual-mode parameter binding.
//!
//! # Responsibility
//! - Detect whether a statement uses named (`:a`, `@a`, `$a`) or positional
//!   (`?`, `?NNN`) placeholders.
//! - Attach caller values in the matching order and expand list values into
//!   `IN (...)` element placeholders.
//!
//! # Invariants
//! - The binding mode is derived from the statement text only.
//! - Placeholders inside string literals, quoted identifiers and comments are
//!   never touched.
//! - Null values are left unbound; SQLite reads an unbound parameter as NULL.
//! - An empty list renders as `NULL`, so `IN (NULL)` matches nothing.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Statement};
use std::collections::HashMap;

/// One caller-supplied parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Value(Value),
    /// Expanded into one placeholder per element.
    List(Vec<Value>),
}

impl SqlParam {
    pub fn blob(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Value(Value::Blob(bytes.into()))
    }

    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SqlParam>,
    {
        Self::List(flatten(values))
    }
}

/// Flattens nested params into plain values; nulls stay as `Value::Null`.
pub(crate) fn flatten<I, T>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = T>,
    T: Into<SqlParam>,
{
    let mut flat = Vec::new();
    for value in values {
        match value.into() {
            SqlParam::Null => flat.push(Value::Null),
            SqlParam::Value(value) => flat.push(value),
            SqlParam::List(inner) => flat.extend(inner),
        }
    }
    flat
}

macro_rules! scalar_param {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for SqlParam {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

scalar_param!(i8, i16, i32, i64, isize, u8, u16, u32, f32, f64, bool, String);

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Value(Value::Text(value.to_string()))
    }
}

impl From<&String> for SqlParam {
    fn from(value: &String) -> Self {
        Self::Value(Value::Text(value.clone()))
    }
}

impl From<Value> for SqlParam {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            other => Self::Value(other),
        }
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<SqlParam>> From<Vec<T>> for SqlParam {
    fn from(values: Vec<T>) -> Self {
        Self::list(values)
    }
}

impl<T: Into<SqlParam> + Clone> From<&[T]> for SqlParam {
    fn from(values: &[T]) -> Self {
        Self::list(values.iter().cloned())
    }
}

impl<T: Into<SqlParam>, const N: usize> From<[T; N]> for SqlParam {
    fn from(values: [T; N]) -> Self {
        Self::list(values)
    }
}

/// Builds a `Vec<SqlParam>` from heterogeneous values.
///
/// ```
/// let params = xrepo_core::sql_params!["sys", vec!["sys", "other"], 3];
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::SqlParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::SqlParam::from($value)),+]
    };
}

/// Statement text rewritten to numbered placeholders plus its bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    sql: String,
    bindings: Vec<(usize, Value)>,
}

impl BoundStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// `(1-based index, value)` pairs in index order.
    pub fn bindings(&self) -> &[(usize, Value)] {
        &self.bindings
    }

    /// Prepares the statement on `conn` and attaches every binding.
    pub fn prepare<'conn>(&self, conn: &'conn Connection) -> rusqlite::Result<Statement<'conn>> {
        let mut stmt = conn.prepare(&self.sql)?;
        for (index, value) in &self.bindings {
            stmt.raw_bind_parameter(*index, value)?;
        }
        Ok(stmt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Named(String),
    /// `?` (None) or `?NNN` (Some(NNN)).
    Positional(Option<usize>),
}

#[derive(Debug)]
struct Token {
    start: usize,
    end: usize,
    placeholder: Placeholder,
}

/// How one source parameter renders in the output text.
enum Slot {
    Single(usize),
    Expanded(Vec<usize>),
    EmptyList,
}

impl Slot {
    fn render(&self, out: &mut String) {
        match self {
            Self::Single(index) => {
                out.push('?');
                out.push_str(&index.to_string());
            }
            Self::Expanded(indexes) => {
                let rendered = indexes
                    .iter()
                    .map(|index| format!("?{index}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&rendered);
            }
            Self::EmptyList => out.push_str("NULL"),
        }
    }
}

#[derive(Default)]
struct SlotAllocator {
    next: usize,
    bindings: Vec<(usize, Value)>,
}

impl SlotAllocator {
    fn allocate(&mut self, value: Option<&SqlParam>) -> Slot {
        match value {
            Some(SqlParam::List(values)) if values.is_empty() => Slot::EmptyList,
            Some(SqlParam::List(values)) => {
                let indexes = values
                    .iter()
                    .map(|value| self.push(Some(value.clone())))
                    .collect();
                Slot::Expanded(indexes)
            }
            Some(SqlParam::Value(value)) => Slot::Single(self.push(Some(value.clone()))),
            Some(SqlParam::Null) | None => Slot::Single(self.push(None)),
        }
    }

    fn push(&mut self, value: Option<Value>) -> usize {
        self.next += 1;
        if let Some(value) = value.filter(|value| !matches!(value, Value::Null)) {
            self.bindings.push((self.next, value));
        }
        self.next
    }
}

/// Binds `values` to the placeholders of `sql`.
///
/// # Errors
/// - `Argument` when named and positional placeholders are mixed.
/// - `Argument` for `?0` or when more positional values than placeholders are
///   supplied.
pub fn bind(sql: &str, values: &[SqlParam]) -> RepoResult<BoundStatement> {
    if values.is_empty() {
        return Ok(BoundStatement {
            sql: sql.to_string(),
            bindings: Vec::new(),
        });
    }

    let tokens = scan(sql);
    let has_named = tokens
        .iter()
        .any(|token| matches!(token.placeholder, Placeholder::Named(_)));
    let has_positional = tokens
        .iter()
        .any(|token| matches!(token.placeholder, Placeholder::Positional(_)));
    if has_named && has_positional {
        return Err(RepoError::Argument(
            "statement mixes named and positional placeholders".to_string(),
        ));
    }

    let slot_keys = if has_named {
        named_slots(&tokens)
    } else {
        positional_slots(&tokens, values.len())?
    };

    let mut allocator = SlotAllocator::default();
    let mut slots: HashMap<usize, Slot> = HashMap::new();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut cursor = 0;
    for (token, key) in tokens.iter().zip(slot_keys) {
        out.push_str(&sql[cursor..token.start]);
        slots
            .entry(key)
            .or_insert_with(|| allocator.allocate(values.get(key)))
            .render(&mut out);
        cursor = token.end;
    }
    out.push_str(&sql[cursor..]);

    Ok(BoundStatement {
        sql: out,
        bindings: allocator.bindings,
    })
}

/// Source value index for every token; distinct names ordered by first occurrence.
fn named_slots(tokens: &[Token]) -> Vec<usize> {
    let mut order: Vec<&str> = Vec::new();
    tokens
        .iter()
        .map(|token| {
            let Placeholder::Named(name) = &token.placeholder else {
                return usize::MAX;
            };
            match order.iter().position(|known| *known == name.as_str()) {
                Some(index) => index,
                None => {
                    order.push(name.as_str());
                    order.len() - 1
                }
            }
        })
        .collect()
}

fn positional_slots(tokens: &[Token], supplied: usize) -> RepoResult<Vec<usize>> {
    let mut next_implicit = 0usize;
    let mut declared = 0usize;
    let mut keys = Vec::with_capacity(tokens.len());
    for token in tokens {
        let key = match token.placeholder {
            Placeholder::Positional(Some(0)) => {
                return Err(RepoError::Argument(
                    "positional placeholder `?0` is out of range".to_string(),
                ));
            }
            Placeholder::Positional(Some(number)) => number - 1,
            Placeholder::Positional(None) => {
                let key = next_implicit;
                next_implicit += 1;
                key
            }
            Placeholder::Named(_) => usize::MAX,
        };
        declared = declared.max(key + 1);
        keys.push(key);
    }
    if supplied > declared {
        return Err(RepoError::Argument(format!(
            "statement declares {declared} positional parameter(s) but {supplied} value(s) were supplied"
        )));
    }
    Ok(keys)
}

fn scan(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => i = skip_until(bytes, i + 1, &[quote]),
            b'[' => i = skip_until(bytes, i + 1, b"]"),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_until(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_until(bytes, i + 2, b"*/"),
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b'?' => {
                let end = digits_end(bytes, i + 1);
                let number = sql[i + 1..end].parse::<usize>().ok();
                tokens.push(Token {
                    start: i,
                    end,
                    placeholder: Placeholder::Positional(number),
                });
                i = end;
            }
            b':' | b'@' | b'$' if bytes.get(i + 1).is_some_and(|b| is_name_start(*b)) => {
                let end = name_end(bytes, i + 1);
                tokens.push(Token {
                    start: i,
                    end,
                    placeholder: Placeholder::Named(sql[i..end].to_string()),
                });
                i = end;
            }
            _ => i += 1,
        }
    }
    tokens
}

/// Index just past `terminator`, or the end of input when it never appears.
pub(crate) fn skip_until(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    let mut i = from;
    while i < bytes.len() {
        if bytes[i..].starts_with(terminator) {
            return i + terminator.len();
        }
        i += 1;
    }
    bytes.len()
}

fn digits_end(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    i
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn name_end(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}
