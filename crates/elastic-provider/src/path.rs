//! Path utilities: wildcard normalization, regex escaping, wildcard matching
//! and path templating.
//!
//! Paths are slash-delimited strings. A `*` anywhere in a path makes it a
//! wildcard path that addresses many documents.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;

/// Characters escaped by [`escape_regex`]. Covers both the Rust `regex`
/// metacharacters and the engine's Lucene regexp reserved characters.
const REGEX_SPECIAL: &[char] = &[
    '\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}', '/', '-', '#', '@',
    '&', '<', '>', '~', '"',
];

/// Collapses runs of consecutive wildcards into one (`a***b` -> `a*b`).
///
/// An empty path addresses everything and becomes `*`.
pub fn prepare_path(path: &str) -> String {
    if path.is_empty() {
        return "*".to_string();
    }

    let mut prepared = String::with_capacity(path.len());
    let mut last = None;
    for c in path.chars() {
        if c == '*' && last == Some('*') {
            continue;
        }
        prepared.push(c);
        last = Some(c);
    }
    prepared
}

/// Returns true if the path contains a wildcard.
pub fn is_wildcard(path: &str) -> bool {
    path.contains('*')
}

/// Escapes every regex special character with a backslash.
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len() * 2);
    for c in input.chars() {
        if REGEX_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Converts a wildcard path into an engine regexp: special characters are
/// escaped first, then each escaped `*` becomes `.*`.
///
/// Engine regexps are implicitly anchored at both ends.
pub fn wildcard_to_regex(path: &str) -> String {
    escape_regex(path).replace("\\*", ".*")
}

/// Renders a write path against its payload.
///
/// `{{name}}` placeholders take the value of `name` in `data` (dotted names
/// descend into nested objects; missing values render empty), and the first
/// literal `{id}` is replaced by a freshly generated id.
pub fn render_path(path: &str, data: Option<&Value>) -> String {
    let mut rendered = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        rendered.push_str(&rest[..start]);
        let name = rest[start + 2..start + 2 + len].trim();
        if let Some(value) = data.and_then(|d| lookup(d, name)) {
            match value {
                Value::String(s) => rendered.push_str(s),
                Value::Null => {}
                other => rendered.push_str(&other.to_string()),
            }
        }
        rest = &rest[start + 2 + len + 2..];
    }
    rendered.push_str(rest);

    if rendered.contains("{id}") {
        let id = uuid::Uuid::new_v4().simple().to_string();
        rendered = rendered.replacen("{id}", &id, 1);
    }
    rendered
}

/// Looks up a dotted name inside a JSON object.
pub(crate) fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |current, part| current.get(part))
}

/// Matches paths against wildcard patterns.
///
/// `*` matches any run of characters (including `/`); matching is
/// case-sensitive and anchored at both ends. Compiled patterns are kept in a
/// bounded LRU so hot routes are not recompiled on every call.
pub struct WildcardMatcher {
    compiled: Mutex<LruCache<String, Regex>>,
}

impl WildcardMatcher {
    /// Creates a matcher that memoizes up to `capacity` compiled patterns.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            compiled: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns true if `input` matches `pattern`.
    pub fn matches(&self, pattern: &str, input: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if !pattern.contains('*') {
            return pattern == input;
        }

        let mut compiled = self.compiled.lock();
        if let Some(regex) = compiled.get(pattern) {
            return regex.is_match(input);
        }

        match Self::compile(pattern) {
            Some(regex) => {
                let matched = regex.is_match(input);
                compiled.put(pattern.to_string(), regex);
                matched
            }
            None => false,
        }
    }

    /// Number of compiled patterns currently held.
    pub fn cached_patterns(&self) -> usize {
        self.compiled.lock().len()
    }

    fn compile(pattern: &str) -> Option<Regex> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("^{}$", body)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("Failed to compile wildcard pattern '{}': {}", pattern, e);
                None
            }
        }
    }
}

impl Default for WildcardMatcher {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for WildcardMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WildcardMatcher")
            .field("cached_patterns", &self.cached_patterns())
            .finish()
    }
}
