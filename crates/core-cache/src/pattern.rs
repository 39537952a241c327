//! Wildcard key patterns for bulk invalidation
//!
//! Only `*` is special (any run of characters, including none). Every other
//! character, `?` and `[` included, matches itself.

use crate::error::{CacheError, Result};
use glob::Pattern;
use std::fmt;

/// A compiled `*`-only wildcard pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    source: String,
    pattern: Pattern,
}

impl KeyPattern {
    pub fn new(source: &str) -> Result<Self> {
        let mut collapsed = source.to_string();
        while collapsed.contains("**") {
            collapsed = collapsed.replace("**", "*");
        }

        let escaped = collapsed
            .split('*')
            .map(Pattern::escape)
            .collect::<Vec<_>>()
            .join("*");

        let pattern = Pattern::new(&escaped).map_err(|e| CacheError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            pattern,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern.matches(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
