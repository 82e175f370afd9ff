//! SQL statement builders for collection tables
//!
//! Table and column names come from validated identifiers and are always
//! double-quoted. Values never appear in the SQL text; every statement
//! takes them as numbered parameters.

use crate::schema::Column;

/// Column names of an existing table, bound to the table name as `?1`
pub const TABLE_COLUMNS: &str = "SELECT name FROM pragma_table_info(?1)";

/// Quote an identifier for use in SQL text
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_def(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.sql_type);
    if column.primary_key {
        def.push_str(" PRIMARY KEY");
    } else if column.not_null {
        def.push_str(" NOT NULL");
    }
    def
}

/// SQL to create a collection table
pub fn create_table(table: &str, columns: &[Column]) -> String {
    let defs: Vec<String> = columns.iter().map(column_def).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(table),
        defs.join(",\n    ")
    )
}

/// SQL to create the listing-order index of a collection table
pub fn create_index(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}(created_at DESC, id DESC)",
        quote_ident(&format!("idx_{}_created_at", table)),
        quote_ident(table)
    )
}

/// SQL to add a column that a newer schema declares
pub fn add_column(table: &str, column: &Column) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(table), column_def(column))
}

/// Parameterized insert of a full row
pub fn insert(table: &str, columns: &[&str]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        params.join(", ")
    )
}

const ORDER: &str = "ORDER BY created_at DESC, id DESC";

pub fn select_all(table: &str) -> String {
    format!("SELECT * FROM {} {}", quote_ident(table), ORDER)
}

pub fn select_by_id(table: &str) -> String {
    format!("SELECT * FROM {} WHERE id = ?1", quote_ident(table))
}

/// Exact-match filter on one column; `NULL` needs `IS NULL` and takes no parameter
pub fn select_by_field(table: &str, column: &str, is_null: bool) -> String {
    let predicate = if is_null {
        format!("{} IS NULL", quote_ident(column))
    } else {
        format!("{} = ?1", quote_ident(column))
    };
    format!("SELECT * FROM {} WHERE {} {}", quote_ident(table), predicate, ORDER)
}

/// Partial update of the given columns.
///
/// Parameters: one per column, then the new `updated_at`, then the id.
/// `updated_at` only ever moves forward, and the updated row is returned.
pub fn update(table: &str, columns: &[&str]) -> String {
    let mut assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote_ident(c), i + 1))
        .collect();
    let n = columns.len();
    assignments.push(format!("updated_at = MAX(updated_at, ?{})", n + 1));
    format!(
        "UPDATE {} SET {} WHERE id = ?{} RETURNING *",
        quote_ident(table),
        assignments.join(", "),
        n + 2
    )
}

pub fn delete(table: &str) -> String {
    format!("DELETE FROM {} WHERE id = ?1", quote_ident(table))
}

pub fn count(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

pub fn clear(table: &str) -> String {
    format!("DELETE FROM {}", quote_ident(table))
}

/// Unicode lowercasing scalar function registered on every connection
pub const FOLD_FUNCTION: &str = "stowage_fold";

/// OR-chain of `LIKE` predicates sharing the pattern parameter `?1`.
///
/// Columns are folded with [`FOLD_FUNCTION`], so the pattern must be folded
/// the same way by the caller.
pub fn search(table: &str, columns: &[&str]) -> String {
    let predicates: Vec<String> = columns
        .iter()
        .map(|c| format!(r"{}({}) LIKE ?1 ESCAPE '\'", FOLD_FUNCTION, quote_ident(c)))
        .collect();
    format!(
        "SELECT * FROM {} WHERE {} {}",
        quote_ident(table),
        predicates.join(" OR "),
        ORDER
    )
}

/// Escape `LIKE` metacharacters so the query matches literally
pub fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `LIKE` pattern for a substring search
pub fn like_pattern(query: &str) -> String {
    format!("%{}%", escape_like(query))
}
