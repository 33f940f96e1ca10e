//! Topic pattern matching
//!
//! Patterns and routing keys are dot-separated token lists. In a pattern,
//! `*` matches exactly one token and `#` matches zero or more tokens. Any
//! number of `#` tokens may appear; matching backtracks over them.

const SEPARATOR: char = '.';
const SINGLE: &str = "*";
const MULTI: &str = "#";

/// True if `routing_key` matches the topic `pattern`
///
/// Empty segments (`a..b`, `.a`, `a.`) are malformed and never match.
///
/// # Examples
/// ```rust
/// use routemq::broker::topic::matches;
///
/// assert!(matches("orders.*.created", "orders.eu.created"));
/// assert!(matches("orders.#", "orders"));
/// assert!(!matches("orders.*", "orders.eu.created"));
/// ```
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let Some(pattern) = split(pattern) else {
        return false;
    };
    let Some(key) = split(routing_key) else {
        return false;
    };
    match_tokens(&pattern, &key)
}

/// Check a pattern for empty segments or wildcards embedded in a token
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Ok(());
    }
    for (index, token) in pattern.split(SEPARATOR).enumerate() {
        if token.is_empty() {
            return Err(format!(
                "topic pattern '{}' has an empty segment at position {}",
                pattern, index
            ));
        }
        if token != SINGLE && token != MULTI && (token.contains('*') || token.contains('#')) {
            return Err(format!(
                "topic pattern '{}' mixes a wildcard into token '{}'",
                pattern, token
            ));
        }
    }
    Ok(())
}

/// Split into tokens; `None` when any segment is empty. The empty string is zero tokens.
fn split(value: &str) -> Option<Vec<&str>> {
    if value.is_empty() {
        return Some(Vec::new());
    }
    let tokens: Vec<&str> = value.split(SEPARATOR).collect();
    if tokens.iter().any(|token| token.is_empty()) {
        None
    } else {
        Some(tokens)
    }
}

/// Iterative wildcard match with backtracking to the most recent `#`
fn match_tokens(pattern: &[&str], key: &[&str]) -> bool {
    let (mut p, mut k) = (0usize, 0usize);
    // (pattern index after '#', key index the '#' currently absorbs up to)
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == MULTI {
            backtrack = Some((p + 1, k));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == SINGLE || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if let Some((after_multi, absorbed)) = backtrack {
            // let the last '#' swallow one more token and retry
            backtrack = Some((after_multi, absorbed + 1));
            p = after_multi;
            k = absorbed + 1;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|token| *token == MULTI)
}
