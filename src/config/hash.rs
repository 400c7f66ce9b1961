//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of resource attributes and of
//! whole documents, so state files and plans can record which desired state
//! they were computed from.

use sha2::{Digest, Sha256};

use super::spec::{AttributeMap, DeployConfig, ResourceId};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment document.
    ///
    /// Covers project identity and every resource's kind, name, attributes
    /// and dependencies, in declaration order.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.project.environment.as_bytes());

        for doc in &config.resources {
            hasher.update([0u8]);
            hasher.update(doc.id().to_string().as_bytes());

            let attributes = doc
                .to_spec()
                .map(|spec| spec.attribute_map())
                .unwrap_or_default();
            hasher.update(self.hash_attributes(&doc.id(), &attributes).as_bytes());

            let mut deps: Vec<&str> = doc.depends_on.iter().map(String::as_str).collect();
            deps.sort_unstable();
            for dep in deps {
                hasher.update(dep.as_bytes());
                hasher.update([0u8]);
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource's attributes.
    ///
    /// `BTreeMap` iteration order and compact JSON keep the encoding canonical.
    #[must_use]
    pub fn hash_attributes(&self, id: &ResourceId, attributes: &AttributeMap) -> String {
        let mut hasher = Sha256::new();

        hasher.update(id.to_string().as_bytes());
        for (key, value) in attributes {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
