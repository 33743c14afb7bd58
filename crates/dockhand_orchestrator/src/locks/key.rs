//! Content-derived lock keys for physical resources

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// ASCII Unit Separator between name/value parts
const SEP: u8 = 0x1f;

/// SHA-256 identity of a resource (build context, registry tag), hex encoded
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Hash a list of named fields. Field order does not matter.
    pub fn build(fields: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        for (name, value) in sorted {
            hasher.update(name.as_bytes());
            hasher.update([SEP]);
            hasher.update(value.as_bytes());
            hasher.update([SEP]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Key for an image build over a context directory
    pub fn for_build(context: &str, dockerfile: &str, platform: &str) -> Self {
        Self::build(&[
            ("kind", "build"),
            ("context", context),
            ("dockerfile", dockerfile),
            ("platform", platform),
        ])
    }

    /// Key for pushing `repository:tag`
    pub fn for_push(repository: &str, tag: &str) -> Self {
        Self::build(&[("kind", "push"), ("repository", repository), ("tag", tag)])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_hex_sha256() {
        let key = ResourceKey::for_build("/src/app", "Dockerfile", "linux/amd64");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_field_order_is_irrelevant() {
        let a = ResourceKey::build(&[("a", "1"), ("b", "2")]);
        let b = ResourceKey::build(&[("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_resources_get_distinct_keys() {
        assert_ne!(
            ResourceKey::for_build("/src/app", "Dockerfile", "linux/amd64"),
            ResourceKey::for_build("/src/app", "Dockerfile", "linux/arm64")
        );
        assert_ne!(
            ResourceKey::for_push("registry/app", "v1"),
            ResourceKey::for_push("registry/app", "v2")
        );
        // Separator keeps boundaries unambiguous
        assert_ne!(
            ResourceKey::build(&[("ab", "c")]),
            ResourceKey::build(&[("a", "bc")])
        );
    }
}
