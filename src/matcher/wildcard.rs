//! Glob matching used for wildcard host and URL lookups.
//!
//! `*` matches any run of bytes (including an empty one) and `?` matches
//! exactly one byte. Matching is done over bytes, so a multi-byte UTF-8
//! character counts as several `?` positions.

/// Returns true when `pattern` matches the whole of `text`.
///
/// ```rust
/// use pie_extractor::matcher::wildcard::wildcard_match;
///
/// assert!(wildcard_match("", "*"));
/// assert!(wildcard_match("api.example.com", "*.example.com"));
/// assert!(!wildcard_match("example.com", "*.example.com"));
/// ```
pub fn wildcard_match(text: &str, pattern: &str) -> bool {
    wildcard_match_bytes(text.as_bytes(), pattern.as_bytes())
}

/// Byte-level form of [`wildcard_match`].
pub fn wildcard_match_bytes(text: &[u8], pattern: &[u8]) -> bool {
    // prev[i]: text[..i] matches pattern[..j - 1]
    let mut prev = vec![false; text.len() + 1];
    let mut curr = vec![false; text.len() + 1];
    prev[0] = true;

    for &p in pattern {
        curr[0] = p == b'*' && prev[0];
        for i in 1..=text.len() {
            curr[i] = if p == b'*' {
                prev[i] || curr[i - 1]
            } else {
                prev[i - 1] && (p == b'?' || p == text[i - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[text.len()]
}

/// True when `key` should be filed in a wildcard index instead of an exact one.
pub fn is_wildcard_pattern(key: &str) -> bool {
    key.contains('*')
}
