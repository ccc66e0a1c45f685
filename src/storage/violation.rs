//! Pattern matching on constraint-violation text reported by the backing store.
//!
//! MySQL, SQLite and PostgreSQL word their not-null and uniqueness failures differently;
//! every pattern below is matched against the full driver message.

use regex::Regex;
use std::sync::LazyLock;

static NOT_NULL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // MySQL: Integrity constraint violation: 1048 Column 'company_id' cannot be null
        r"Column '(\w+)' cannot be null",
        // SQLite: NOT NULL constraint failed: widgets.company_id
        r"NOT NULL constraint failed: (?:\w+\.)*(\w+)",
        // PostgreSQL: null value in column "company_id" of relation "widgets" violates ...
        r#"null value in column "(\w+)""#,
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static DUPLICATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Duplicate entry '(.*)'",
        r"UNIQUE constraint failed",
        r"duplicate key value violates unique constraint",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Column named by a not-null violation, if `message` is one.
#[must_use]
pub fn not_null_column(message: &str) -> Option<String> {
    NOT_NULL_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(message))
        .and_then(|captures| captures.get(1))
        .map(|column| column.as_str().to_string())
}

/// Whether `message` reports a uniqueness violation.
#[must_use]
pub fn is_duplicate_entry(message: &str) -> bool {
    DUPLICATE_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(message))
}

/// Property name for a column: everything from the first `_id` is dropped and the
/// remaining underscore-separated words are camel-cased.
///
/// `company_id` gives `company`, `parent_company_id` gives `parentCompany`.
#[must_use]
pub fn column_to_property(column: &str) -> String {
    let stem = column.find("_id").map_or(column, |end| &column[..end]);
    let mut words = stem.split('_').filter(|word| !word.is_empty());
    let mut property = words.next().unwrap_or_default().to_string();
    for word in words {
        property.push_str(&upper_first(word));
    }
    property
}

/// Readable message for a not-null violation on `column`, e.g. "Company can not be null.".
#[must_use]
pub fn not_null_message(column: &str) -> Option<String> {
    let property = column_to_property(column);
    if property.is_empty() {
        return None;
    }
    Some(format!("{} can not be null.", upper_first(&property)))
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
