//! Range-pattern matching for schema/table routing
//!
//! A small glob dialect compiled to anchored regular expressions:
//!
//! - `*` matches one or more identifier characters (`[A-Za-z0-9_]+`)
//! - `[a-b]` matches the decimal form of any integer in the closed range,
//!   expanded by enumeration (bounds are swapped if reversed)
//! - any other byte matches itself literally
//!
//! Patterns are anchored: they must match the entire input. Worker-id
//! derivation lives here too so routing and matching share one module.
//!
//! ## Example
//!
//! ```rust
//! use binsift_core::pattern::RangeMatcher;
//!
//! let m = RangeMatcher::new("db_[0-9].table_[0-99]").unwrap();
//! assert!(m.matches("db_5.table_42"));
//! assert!(!m.matches("db_10.table_0"));
//! ```

use regex::Regex;
use thiserror::Error;

/// Largest allowed number of values in a `[a-b]` range.
const MAX_RANGE_SPAN: i64 = 1_000_000;

/// Error type for pattern compilation.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("missing closing ']' at byte {0}")]
    UnterminatedRange(usize),
    #[error("bad range format: {0:?}")]
    BadRange(String),
    #[error("range [{0}-{1}] expands to more than {MAX_RANGE_SPAN} values")]
    RangeTooWide(i64, i64),
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

impl From<PatternError> for crate::error::Error {
    fn from(e: PatternError) -> Self {
        crate::error::Error::Pattern {
            pattern: String::new(),
            reason: e.to_string(),
        }
    }
}

/// A compiled range pattern. Stateless after construction.
#[derive(Debug, Clone)]
pub struct RangeMatcher {
    pattern: String,
    regex: Regex,
}

impl RangeMatcher {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let body = compile_to_regex(pattern)?;
        let regex = Regex::new(&format!("^{}$", body))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Anchored match over the whole input.
    #[inline]
    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn compile_to_regex(pattern: &str) -> Result<String, PatternError> {
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                out.push_str("[A-Za-z0-9_]+");
                i += 1;
            }
            b'[' => {
                let close = pattern[i + 1..]
                    .find(']')
                    .map(|off| i + 1 + off)
                    .ok_or(PatternError::UnterminatedRange(i))?;
                let (start, end) = parse_range(&pattern[i + 1..close])?;
                let alternatives: Vec<String> = (start..=end).map(|n| n.to_string()).collect();
                out.push('(');
                out.push_str(&alternatives.join("|"));
                out.push(')');
                i = close + 1;
            }
            _ => {
                // Multi-byte UTF-8 sequences pass through as literal chars.
                let ch = pattern[i..].chars().next().expect("char boundary");
                out.push_str(&regex::escape(&ch.to_string()));
                i += ch.len_utf8();
            }
        }
    }

    Ok(out)
}

fn parse_range(s: &str) -> Result<(i64, i64), PatternError> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return Err(PatternError::BadRange(s.to_string()));
    }
    let a: i64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| PatternError::BadRange(s.to_string()))?;
    let b: i64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| PatternError::BadRange(s.to_string()))?;

    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    if end - start > MAX_RANGE_SPAN {
        return Err(PatternError::RangeTooWide(start, end));
    }
    Ok((start, end))
}

/// Stable non-cryptographic hash (FNV-1a, 64-bit). Identical inputs yield
/// identical values across runs and platforms.
fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Deterministic worker assignment for a `(table, key)` pair.
///
/// All events sharing a partition key land on the same worker so their
/// relative order survives parallel dispatch.
pub fn worker_id(table: &str, key: &str, workers: usize) -> usize {
    debug_assert!(workers > 0);
    let mut buf = Vec::with_capacity(table.len() + key.len() + 1);
    buf.extend_from_slice(table.as_bytes());
    buf.push(b':');
    buf.extend_from_slice(key.as_bytes());
    (fnv1a64(&buf) % workers as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let m = RangeMatcher::new("mydb.users").unwrap();
        assert!(m.matches("mydb.users"));
        assert!(!m.matches("mydb.users2"));
        assert!(!m.matches("xmydb.users"));
    }

    #[test]
    fn test_star_requires_identifier_chars() {
        let m = RangeMatcher::new("foo*").unwrap();
        assert!(m.matches("foobar"));
        assert!(m.matches("foo_1"));
        // `*` means one or more identifier chars, so the bare prefix
        // does not match.
        assert!(!m.matches("foo"));
        assert!(!m.matches("foo.bar"));
    }

    #[test]
    fn test_star_in_qualified_name() {
        let m = RangeMatcher::new("*.my_table").unwrap();
        assert!(m.matches("db1.my_table"));
        assert!(m.matches("shard_07.my_table"));
        assert!(!m.matches("db1.other"));
        assert!(!m.matches(".my_table"));
    }

    #[test]
    fn test_numeric_range() {
        let m = RangeMatcher::new("db_[0-3]").unwrap();
        assert!(m.matches("db_0"));
        assert!(m.matches("db_3"));
        assert!(!m.matches("db_4"));
        assert!(!m.matches("db_"));
    }

    #[test]
    fn test_range_reversed_bounds() {
        let m = RangeMatcher::new("t_[5-2]").unwrap();
        assert!(m.matches("t_2"));
        assert!(m.matches("t_5"));
        assert!(!m.matches("t_6"));
    }

    #[test]
    fn test_scenario_sharded_pattern() {
        let m = RangeMatcher::new("db_[0-9].table_[0-99]").unwrap();
        assert!(m.matches("db_5.table_42"));
        assert!(!m.matches("db_10.table_0"));
        assert!(m.matches("db_9.table_99"));
        assert!(!m.matches("db_5.table_100"));
    }

    #[test]
    fn test_anchoring() {
        let m = RangeMatcher::new("foo").unwrap();
        assert!(!m.matches("foofoo"));
        assert!(!m.matches("afoo"));
        assert!(m.matches("foo"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            RangeMatcher::new("db_[1-").unwrap_err(),
            PatternError::UnterminatedRange(_)
        ));
        assert!(matches!(
            RangeMatcher::new("db_[a-z]").unwrap_err(),
            PatternError::BadRange(_)
        ));
        assert!(matches!(
            RangeMatcher::new("db_[1]").unwrap_err(),
            PatternError::BadRange(_)
        ));
        assert!(matches!(
            RangeMatcher::new("db_[0-2000000]").unwrap_err(),
            PatternError::RangeTooWide(_, _)
        ));
    }

    #[test]
    fn test_literal_dot_not_wildcard() {
        let m = RangeMatcher::new("a.b").unwrap();
        assert!(m.matches("a.b"));
        assert!(!m.matches("axb"));
    }

    #[test]
    fn test_worker_id_deterministic() {
        for n in [1usize, 2, 4, 16] {
            let first = worker_id("users", "42", n);
            for _ in 0..10 {
                assert_eq!(worker_id("users", "42", n), first);
            }
            assert!(first < n);
        }
    }

    #[test]
    fn test_worker_id_distinguishes_keys() {
        // Not guaranteed for any single pair, but across a batch of keys
        // at least two workers must be hit with 16 partitions.
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            seen.insert(worker_id("users", &i.to_string(), 16));
        }
        assert!(seen.len() > 1);
        assert!(seen.iter().all(|&w| w < 16));
    }

    #[test]
    fn test_worker_id_single_worker() {
        assert_eq!(worker_id("t", "anything", 1), 0);
    }
}
