//! `<namespace>:<identifier>` references.
//!
//! Plugins and job runners are both addressed by a reference string such as
//! `datacat.ext.geo:geo_plugin`. The string is resolved against a static
//! registry built at startup; nothing is loaded dynamically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The reference string was not of the form `<namespace>:<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reference {0:?}: expected '<namespace>:<identifier>'")]
pub struct InvalidReference(pub String);

/// A validated `<namespace>:<identifier>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    raw: String,
    split: usize,
}

impl Reference {
    /// Parse a reference, requiring exactly one `:` with text on both sides.
    pub fn parse(raw: &str) -> Result<Self, InvalidReference> {
        let mut separators = raw.match_indices(':');
        let split = match (separators.next(), separators.next()) {
            (Some((idx, _)), None) => idx,
            _ => return Err(InvalidReference(raw.to_string())),
        };

        if split == 0 || split == raw.len() - 1 || raw.trim() != raw {
            return Err(InvalidReference(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            split,
        })
    }

    /// The part before the separator.
    pub fn namespace(&self) -> &str {
        &self.raw[..self.split]
    }

    /// The part after the separator.
    pub fn identifier(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Reference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Reference {
    type Error = InvalidReference;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Reference> for String {
    fn from(value: Reference) -> Self {
        value.raw
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
