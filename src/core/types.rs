//! Identity and identity-artifact types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entity identifier in `name@address` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub const ANYONE: &'static str = "anyone@anywhere";
    pub const EVERYONE: &'static str = "everyone@everywhere";
    pub const FOUNDER: &'static str = "founder@anywhere";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn anyone() -> Self {
        Self::new(Self::ANYONE)
    }

    pub fn everyone() -> Self {
        Self::new(Self::EVERYONE)
    }

    pub fn founder() -> Self {
        Self::new(Self::FOUNDER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> Option<&str> {
        self.0.split_once('@').map(|(name, _)| name)
    }

    pub fn address(&self) -> &str {
        self.0
            .split_once('@')
            .map(|(_, address)| address)
            .unwrap_or(&self.0)
    }

    /// Broadcast identifiers are placeholders, never real identities.
    pub fn is_broadcast(&self) -> bool {
        matches!(self.address(), "anywhere" | "everywhere")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for Id {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Public identity material. Only the key is inspected by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub public_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

impl Meta {
    pub fn new(public_key: impl Into<Vec<u8>>, seed: Option<&str>) -> Self {
        Self {
            public_key: public_key.into(),
            seed: seed.map(str::to_string),
        }
    }

    /// True when both metas were generated from the same key pair.
    pub fn matches(&self, other: &Meta) -> bool {
        !self.public_key.is_empty() && self.public_key == other.public_key
    }
}

/// Signed profile (bulletin for groups, visa for users), carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub identifier: Id,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Document {
    pub fn new(identifier: Id, data: &str) -> Self {
        Self {
            identifier,
            data: data.to_string(),
            signature: None,
        }
    }
}
