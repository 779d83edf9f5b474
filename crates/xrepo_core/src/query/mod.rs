//! Statement construction and result shaping.
//!
//! # Responsibility
//! - Bind caller values to SQL placeholders (`binder`).
//! - Compile typed criteria into SELECT/COUNT statements (`criteria`).
//! - Map result rows into records, scalars or declared shapes (`materialize`).
//! - Rewrite entity type names in entity-language text (`entity_query`).
//!
//! # Invariants
//! - Every identifier interpolated into SQL text passed `is_valid_identifier`.
//! - Bound statements only carry numbered `?N` placeholders.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod binder;
pub mod criteria;
pub mod entity_query;
pub mod materialize;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("invalid identifier regex"));

/// Whether `name` can be interpolated as a table/column/pragma name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::is_valid_identifier;

    #[test]
    fn identifier_policy_rejects_sql_fragments() {
        assert!(is_valid_identifier("create_time"));
        assert!(is_valid_identifier("_Db2"));
        assert!(!is_valid_identifier("2db"));
        assert!(!is_valid_identifier("name; DROP TABLE x"));
        assert!(!is_valid_identifier("\"quoted\""));
        assert!(!is_valid_identifier(""));
    }
}
