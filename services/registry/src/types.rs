//! Wire types: descriptors, manifests and indices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, parse_digest};
use crate::error::{RegistryError, RegistryResult};

/// Media type of both the per-repository and global index documents.
pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Schema version written into indices this registry produces.
pub const INDEX_SCHEMA_VERSION: u32 = 2;

/// A typed reference to content, identified by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Human-readable name: a tag inside a repository index, a repository in the global index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Content type of the referenced content.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    /// Identity of the referenced content.
    pub digest: Digest,

    /// Size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// A bare descriptor for `digest` with the given media type.
    pub fn new(digest: Digest, media_type: impl Into<String>) -> Self {
        Self {
            name: None,
            media_type: media_type.into(),
            digest,
            size: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// Validate a client-supplied digest and content type into a descriptor.
///
/// The digest is checked first, so a request with both a bad digest and no
/// content type reports `DigestInvalid`.
pub fn parse_descriptor(raw_digest: &str, content_type: &str) -> RegistryResult<Descriptor> {
    let digest = parse_digest(raw_digest)?;
    if content_type.is_empty() {
        return Err(RegistryError::ContentTypeInvalid("empty".to_owned()));
    }
    Ok(Descriptor::new(digest, content_type))
}

/// A client-defined artifact manifest.
///
/// The well-known fields are typed; anything else the client sent is kept in
/// `extra` so a stored manifest reads back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    /// The manifest's own media type, if the client declared one in the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Configuration blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    /// Content blobs which make up the artifact.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<Descriptor>,

    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Fields this registry does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A searchable list of descriptors: manifests within a repository, or
/// repositories across the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Index schema version.
    #[serde(default)]
    pub schema_version: u32,

    /// Index media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Entries, ordered by name.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Index {
    /// An empty index stamped with this registry's schema version and media type.
    pub fn new() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            media_type: Some(MEDIA_TYPE_INDEX.to_owned()),
            ..Self::default()
        }
    }

    /// Insert or replace the entry with the same name, keeping entries ordered by name.
    pub fn upsert(&mut self, descriptor: Descriptor) {
        self.manifests.retain(|d| d.name != descriptor.name);
        self.manifests.push(descriptor);
        self.manifests.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Drop the entry named `name`, returning whether one was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.manifests.len();
        self.manifests.retain(|d| d.name.as_deref() != Some(name));
        before != self.manifests.len()
    }

    /// Keep only entries whose name contains `needle`, ignoring case.
    ///
    /// An empty needle keeps everything.
    pub fn search(mut self, needle: &str) -> Self {
        if needle.is_empty() {
            return self;
        }
        let needle = needle.to_lowercase();
        self.manifests.retain(|d| {
            d.name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle))
        });
        self
    }
}
