//! Domain types for patrol.
//!
//! Identity is the pair `(repository, number)` — [`ItemKey`] — with one
//! canonical string form `owner/name#number` used in the ledger file, the
//! control protocol, and the CLI. All path fields use `PathBuf`; never
//! `&str` or `String` for filesystem paths.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// RepoSlug
// ---------------------------------------------------------------------------

/// A repository identified as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    /// Parse `owner/name`. Both segments must be non-empty and free of
    /// path separators beyond the single `/`.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let invalid = |reason| StoreError::InvalidRef {
            input: input.to_string(),
            reason,
        };
        let (owner, name) = input
            .split_once('/')
            .ok_or_else(|| invalid("expected owner/name"))?;
        if owner.is_empty() || name.is_empty() {
            return Err(invalid("owner and name must be non-empty"));
        }
        if name.contains('/') {
            return Err(invalid("too many path segments"));
        }
        if owner.contains(['#', '\\']) || name.contains(['#', '\\']) {
            return Err(invalid("illegal character in repository slug"));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for RepoSlug {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RepoSlug> for String {
    fn from(slug: RepoSlug) -> Self {
        slug.to_string()
    }
}

// ---------------------------------------------------------------------------
// ItemKey
// ---------------------------------------------------------------------------

/// Stable identity of a reviewable item: `(repository, number)`.
///
/// Canonical serialization: `owner/name#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemKey {
    pub repo: RepoSlug,
    pub number: u64,
}

impl ItemKey {
    pub fn new(repo: RepoSlug, number: u64) -> Self {
        Self { repo, number }
    }

    /// Parse the canonical `owner/name#number` form.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let invalid = |reason| StoreError::InvalidRef {
            input: input.to_string(),
            reason,
        };
        let (slug, number) = input
            .rsplit_once('#')
            .ok_or_else(|| invalid("expected owner/name#number"))?;
        let number: u64 = number
            .parse()
            .map_err(|_| invalid("item number is not an unsigned integer"))?;
        Ok(Self {
            repo: RepoSlug::parse(slug)?,
            number,
        })
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

impl TryFrom<String> for ItemKey {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ItemKey> for String {
    fn from(key: ItemKey) -> Self {
        key.to_string()
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One discovered, review-eligible pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub key: ItemKey,
    pub title: String,
    pub author: String,
    /// Commit SHA of the item's current head.
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Item metadata persisted beside the review versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMeta {
    pub title: String,
    pub author: String,
    pub url: String,
    pub recorded_at: DateTime<Utc>,
}

/// One immutable review artifact, tied to the revision it reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVersion {
    pub created_at: DateTime<Utc>,
    /// Head SHA the review was generated against.
    pub revision: String,
    /// False when the generator failed; `body` then holds the reason.
    pub ok: bool,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_roundtrip() {
        let slug = RepoSlug::parse("acme/widgets").unwrap();
        assert_eq!(slug.owner(), "acme");
        assert_eq!(slug.name(), "widgets");
        assert_eq!(slug.to_string(), "acme/widgets");
    }

    #[test]
    fn slug_rejects_malformed_input() {
        for input in ["acme", "/widgets", "acme/", "a/b/c", "a#b/c"] {
            assert!(RepoSlug::parse(input).is_err(), "should reject '{input}'");
        }
    }

    #[test]
    fn key_roundtrip() {
        let key = ItemKey::parse("acme/widgets#42").unwrap();
        assert_eq!(key.repo.to_string(), "acme/widgets");
        assert_eq!(key.number, 42);
        assert_eq!(key.to_string(), "acme/widgets#42");
    }

    #[test]
    fn key_rejects_malformed_input() {
        for input in ["acme/widgets", "acme/widgets#", "acme/widgets#x", "#1"] {
            assert!(ItemKey::parse(input).is_err(), "should reject '{input}'");
        }
    }

    #[test]
    fn key_serde_uses_canonical_string() {
        let key = ItemKey::parse("acme/widgets#7").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"acme/widgets#7\"");
        let back: ItemKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn keys_are_structurally_comparable() {
        let a = ItemKey::parse("acme/widgets#1").unwrap();
        let b = ItemKey::parse("acme/widgets#1").unwrap();
        let c = ItemKey::parse("acme/widgets#2").unwrap();
        assert_eq!(a, b);
        assert!(a < c);
    }
}
