//! Entity-language statements: SQL that names entity types instead of tables.

use crate::model::entity::EntityRegistry;
use crate::query::binder::skip_until;

const TABLE_KEYWORDS: [&str; 4] = ["FROM", "JOIN", "UPDATE", "INTO"];

/// Replaces each registered entity type name that directly follows
/// `FROM`, `JOIN`, `UPDATE` or `INTO` with its quoted table name.
///
/// Literals, quoted identifiers and comments are copied untouched.
pub fn rewrite_entity_names(sql: &str, registry: &EntityRegistry) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut after_keyword = false;
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_until(bytes, i + 1, &[quote]);
                after_keyword = false;
            }
            b'[' => {
                i = skip_until(bytes, i + 1, b"]");
                after_keyword = false;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_until(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_until(bytes, i + 2, b"*/"),
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &sql[start..i];
                if after_keyword {
                    if let Some(meta) = registry.by_type_name(word) {
                        out.push('"');
                        out.push_str(meta.table);
                        out.push('"');
                        after_keyword = false;
                        continue;
                    }
                }
                after_keyword = TABLE_KEYWORDS
                    .iter()
                    .any(|keyword| keyword.eq_ignore_ascii_case(word));
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                // Advance by a whole char so multi-byte text stays on boundaries.
                i += sql[i..].chars().next().map_or(1, char::len_utf8);
                after_keyword = false;
            }
        }
        out.push_str(&sql[start..i]);
    }
    out
}
