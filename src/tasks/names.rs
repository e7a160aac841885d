//! Name Validation
//!
//! Task and position names have two forms:
//! - display: `Pick up wheel` (trimmed, single-spaced, capitalized)
//! - key: `pick_up_wheel` (lowercase, underscored), used for storage

use regex::Regex;
use std::sync::LazyLock;

/// Anything but letters, digits, underscore, dot, space and hyphen
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w. -]").expect("valid regex"));

/// Validated name in both of its forms
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidName {
    pub display: String,
    pub key: String,
}

/// Sanitize a user-provided name.
///
/// Strips characters other than letters, digits, underscore, dot, space and
/// hyphen, treats underscores as spaces, collapses whitespace, lowercases and
/// capitalizes the first letter. Returns `None` if nothing is left.
pub fn validate_name(raw: &str) -> Option<ValidName> {
    let stripped = DISALLOWED.replace_all(raw, "").replace('_', " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    let lower = collapsed.to_lowercase();
    let mut chars = lower.chars();
    let display = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return None,
    };
    let key = encode_key(&display);
    Some(ValidName { display, key })
}

/// Storage key of a display name
pub fn encode_key(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Display form of a storage key
pub fn decode_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.map(|c| if c == '_' { ' ' } else { c }))
            .collect(),
        None => String::new(),
    }
}
