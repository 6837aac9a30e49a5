//! Parameter formatting dialects
//!
//! Captured query parameters are substituted back into SQL text for reporting.
//! A [`ParameterFormatter`] renders one bound [`Value`] as a literal that could
//! be pasted into the vendor's SQL client and executed as-is, so captured
//! queries can be replayed without sanitizing.
//!
//! Vendor implementations are provided for MySQL/MariaDB and PostgreSQL; a
//! data source without a formatter falls back to `Value`'s default rendering.

use std::sync::Arc;

use crate::value::Value;

/// Formats bound parameter values as vendor SQL literals
pub trait ParameterFormatter: Send + Sync {
    /// The formatter name, matching the database product
    fn name(&self) -> &'static str;

    /// Format a single value as a SQL literal
    fn format(&self, value: &Value) -> String;
}

/// Escape a string for a single-quoted SQL literal by doubling quotes
pub(crate) fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn hex_literal(prefix: &str, bytes: &[u8], suffix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + bytes.len() * 2 + suffix.len());
    out.push_str(prefix);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out.push_str(suffix);
    out
}

// ===========================================================================
// MySQL / MariaDB
// ===========================================================================

/// MySQL/MariaDB parameter formatter
///
/// Booleans render as bit literals (`1`/`0`), binary data as `X'..'` hex
/// literals, and strings escape both quotes and backslashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlFormatter;

impl ParameterFormatter for MySqlFormatter {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int8(n) => n.to_string(),
            Value::Int16(n) => n.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::Float32(n) => n.to_string(),
            Value::Float64(n) => n.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::String(s) => format!("'{}'", escape_string_literal(s).replace('\\', "\\\\")),
            Value::Bytes(b) => hex_literal("X'", b, "'"),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("'{}'", t.format("%H:%M:%S")),
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::DateTimeTz(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Uuid(u) => format!("'{}'", u),
            Value::Json(j) => format!("'{}'", escape_string_literal(&j.to_string())),
        }
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL parameter formatter
///
/// Booleans render as `TRUE`/`FALSE`, binary data as `'\x..'` bytea literals,
/// timestamps with timezone keep their UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresFormatter;

impl ParameterFormatter for PostgresFormatter {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Int8(n) => n.to_string(),
            Value::Int16(n) => n.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::Float32(n) => n.to_string(),
            Value::Float64(n) => n.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::String(s) => format!("'{}'", escape_string_literal(s)),
            Value::Bytes(b) => hex_literal("'\\x", b, "'"),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("'{}'", t.format("%H:%M:%S")),
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::DateTimeTz(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%:z")),
            Value::Uuid(u) => format!("'{}'", u),
            Value::Json(j) => format!("'{}'", escape_string_literal(&j.to_string())),
        }
    }
}

/// Look up a formatter by database product name
///
/// Recognizes `postgres`/`postgresql`, `mysql`, and `mariadb` (case-insensitive).
pub fn formatter_for(name: &str) -> Option<Arc<dyn ParameterFormatter>> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(Arc::new(PostgresFormatter)),
        "mysql" | "mariadb" => Some(Arc::new(MySqlFormatter)),
        _ => None,
    }
}
