//! Error taxonomy of the repository layer.

use crate::db::DbError;
use rusqlite::types::FromSqlError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Lifecycle misuse, unregistered entities or invalid attributes.
    Config(String),
    /// Invalid caller input, rejected before any statement runs.
    Argument(String),
    /// Statement or schema failure inside a transaction.
    Db(DbError),
    /// Connection pool acquisition/close failure.
    Resource(DbError),
    /// A scalar result could not be converted to the requested type.
    Materialize(String),
}

impl RepoError {
    /// Underlying database error, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Db(err) | Self::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(message) => write!(f, "configuration error: {message}"),
            Self::Argument(message) => write!(f, "invalid argument: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Resource(err) => write!(f, "resource error: {err}"),
            Self::Materialize(message) => write!(f, "materialization failed: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Resource(err) => Some(err),
            Self::Config(_) => None,
            Self::Argument(_) => None,
            Self::Materialize(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        if value.is_resource() {
            Self::Resource(value)
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::FromSqlConversionFailure(index, kind, err) => Self::Materialize(
                format!("column {index} ({kind}) could not be converted: {err}"),
            ),
            rusqlite::Error::InvalidColumnType(index, name, kind) => Self::Materialize(format!(
                "column {index} `{name}` has incompatible type {kind}"
            )),
            other => Self::Db(DbError::Sqlite(other)),
        }
    }
}

impl From<FromSqlError> for RepoError {
    fn from(value: FromSqlError) -> Self {
        Self::Materialize(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use crate::db::DbError;
    use rusqlite::types::FromSqlError;
    use std::error::Error;

    #[test]
    fn pool_failures_become_resource_errors() {
        let err = RepoError::from(DbError::PoolClosed);
        assert!(matches!(err, RepoError::Resource(DbError::PoolClosed)));
        assert!(err.source().is_some());

        let err = RepoError::from(DbError::MissingRequiredTable("t".to_string()));
        assert!(matches!(err, RepoError::Db(_)));
    }

    #[test]
    fn conversion_failures_become_materialize_errors() {
        let err = RepoError::from(FromSqlError::InvalidType);
        assert!(matches!(err, RepoError::Materialize(_)));
        assert!(err.to_string().starts_with("materialization failed"));
    }
}
