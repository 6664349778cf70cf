//! Wildcard value patterns
//!
//! A query pattern is a single string where `*` is only meaningful at the
//! ends:
//!
//! - no `*` -> exact match
//! - `*`, empty, or absent -> unconstrained
//! - `*suffix` -> suffix match
//! - `prefix*` -> prefix match
//! - `*middle*` -> substring match
//!
//! A `*` anywhere else is a literal character.

/// Parsed form of a wildcard query pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePattern {
    /// Matches every value
    Any,
    /// Matches the value exactly
    Exact(String),
    /// Matches values starting with the string
    Prefix(String),
    /// Matches values ending with the string
    Suffix(String),
    /// Matches values containing the string
    Contains(String),
}

impl ValuePattern {
    /// Parses a wildcard string. `None` and `""` are unconstrained.
    pub fn parse(pattern: Option<&str>) -> Self {
        let Some(pattern) = pattern else {
            return ValuePattern::Any;
        };
        if pattern.is_empty() || pattern == "*" {
            return ValuePattern::Any;
        }

        let leading = pattern.starts_with('*');
        let trailing = pattern.ends_with('*');

        match (leading, trailing) {
            (true, true) => {
                ValuePattern::Contains(pattern[1..pattern.len() - 1].to_string())
            }
            (true, false) => ValuePattern::Suffix(pattern[1..].to_string()),
            (false, true) => ValuePattern::Prefix(pattern[..pattern.len() - 1].to_string()),
            (false, false) => ValuePattern::Exact(pattern.to_string()),
        }
    }

    /// Whether `value` satisfies this pattern.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            ValuePattern::Any => true,
            ValuePattern::Exact(s) => value == s,
            ValuePattern::Prefix(s) => value.starts_with(s),
            ValuePattern::Suffix(s) => value.ends_with(s),
            ValuePattern::Contains(s) => value.contains(s),
        }
    }
}
