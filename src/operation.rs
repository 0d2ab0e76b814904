//! Operation-name derivation from SQL statement text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Operation label reported for statements without a name comment.
pub const UNKNOWN_OPERATION: &str = "unknown";

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--\s+name:\s+(\w+)").expect("operation name pattern is valid"));

/// Derives the operation label from a statement's leading comment.
///
/// Statements carrying a `-- name: <identifier>` header (the convention used
/// by query generators such as sqlc) report that identifier; anything else
/// reports [`UNKNOWN_OPERATION`]. The comment must open the statement text.
pub fn operation_name(sql: &str) -> &str {
    match NAME_PATTERN.captures(sql).and_then(|captures| captures.get(1)) {
        Some(name) => name.as_str(),
        None => UNKNOWN_OPERATION,
    }
}
