/// Splits a raw path into trimmed, non-empty segments.
pub fn split_segments(raw: &str) -> Vec<&str> {
    raw.split('/').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Normalizes a raw object key: collapses separators and strips leading and
/// trailing slashes. Returns an empty string for blank input.
pub fn normalize_key(raw: &str) -> String {
    split_segments(raw).join("/")
}

/// Normalizes a folder prefix to its canonical slash-terminated form
/// (e.g. `"a/b/"`). An empty or all-slash input yields `""` (catalog root).
pub fn normalize_prefix(raw: &str) -> String {
    let cleaned = normalize_key(raw);
    if cleaned.is_empty() {
        String::new()
    } else {
        format!("{cleaned}/")
    }
}

/// Splits a canonical object key into its parent prefix (slash-terminated,
/// empty for root-level keys) and leaf name.
pub fn parent_and_leaf(key: &str) -> (String, String) {
    let parts = split_segments(key);
    match parts.split_last() {
        Some((leaf, parents)) if !parents.is_empty() => {
            (format!("{}/", parents.join("/")), (*leaf).to_string())
        }
        Some((leaf, _)) => (String::new(), (*leaf).to_string()),
        None => (String::new(), String::new()),
    }
}

/// Replaces the leaf segment of a key, keeping the same parent.
pub fn with_new_leaf(key: &str, new_name: &str) -> String {
    let (prefix, _) = parent_and_leaf(key);
    format!("{prefix}{new_name}")
}
