//! Dialect-specific quoting of identifiers and literals.
//!
//! Every value is truncated at the first NUL byte before quoting.

fn until_nul(value: &str) -> &str {
    match value.find('\0') {
        Some(end) => &value[..end],
        None => value,
    }
}

/// PostgreSQL identifier: `"name"` with embedded `"` doubled
pub fn pg_identifier(value: &str) -> String {
    format!("\"{}\"", until_nul(value).replace('"', "\"\""))
}

/// PostgreSQL string literal: `'value'` with embedded `'` doubled
pub fn pg_literal(value: &str) -> String {
    format!("'{}'", until_nul(value).replace('\'', "''"))
}

/// MySQL identifier: `` `name` `` with embedded backticks doubled
pub fn mysql_identifier(value: &str) -> String {
    format!("`{}`", until_nul(value).replace('`', "``"))
}

/// MySQL string literal with `\` and `'` escaped
pub fn mysql_literal(value: &str) -> String {
    format!("'{}'", until_nul(value).replace('\\', "\\\\").replace('\'', "''"))
}

/// Replace a quoted secret in a statement before it is logged
pub fn redact(statement: &str, quoted_secret: &str) -> String {
    statement.replace(quoted_secret, "'[REDACTED]'")
}
