//! Ordered glob route tables.

use config::HttpMethod;

/// An ordered list of path globs, each optionally restricted to one method.
///
/// Lookups return the value of the first matching entry. Patterns use glob syntax where
/// `*` matches within one path segment and `**` matches any number of segments.
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    entries: Vec<RouteEntry<T>>,
}

#[derive(Debug, Clone)]
struct RouteEntry<T> {
    pattern: String,
    method: Option<HttpMethod>,
    value: T,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> RouteTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Earlier entries take precedence.
    pub fn push(&mut self, pattern: impl Into<String>, method: Option<HttpMethod>, value: T) {
        self.entries.push(RouteEntry {
            pattern: pattern.into(),
            method,
            value,
        });
    }

    /// The value of the first entry matching the request.
    pub fn find(&self, method: &str, path: &str) -> Option<&T> {
        let path = normalize(path);

        self.entries
            .iter()
            .find(|entry| {
                let method_matches = entry.method.is_none_or(|expected| expected.matches(method));
                method_matches && (entry.pattern == path || fast_glob::glob_match(entry.pattern.as_str(), path))
            })
            .map(|entry| &entry.value)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}
