//! The persistence seam between HTTP handlers and whatever holds the data.

use std::fmt;

use axum::http::Uri;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::range::ContentRange;
use crate::types::{Index, Manifest};

/// A boxed byte stream of blob content.
pub type BlobStream = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Blob content in flight, with the metadata that travels alongside it.
pub struct StorageContent {
    /// Declared length in bytes, if the client or backend knows it.
    pub content_length: Option<u64>,
    /// Media type of the content.
    pub content_type: String,
    /// Transfer encoding of the content, e.g. `gzip`.
    pub content_encoding: Option<String>,
    /// The byte range this content covers, for partial uploads.
    pub range: Option<ContentRange>,
    /// The bytes themselves.
    pub content: BlobStream,
}

impl fmt::Debug for StorageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContent")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// A manifest as the client sent it, with its decoded form.
#[derive(Debug, Clone)]
pub struct ManifestContent {
    /// Media type declared by the client on upload.
    pub content_type: String,
    /// The decoded document.
    pub manifest: Manifest,
    /// The exact bytes uploaded, which digest references are checked against.
    pub raw: Bytes,
}

/// Either the store moved the bytes itself, or the client should talk to
/// the backend directly at a pre-authorized location.
#[derive(Debug)]
pub enum Transfer<T> {
    /// Handled in-process.
    Direct(T),
    /// Send the client here instead.
    Redirect(Uri),
}

/// Storage operations the registry handlers depend on.
///
/// Missing objects surface as a storage `NotFound` error unless the
/// operation documents a more specific error.
#[async_trait::async_trait]
pub trait RegistryStore: fmt::Debug + Send + Sync {
    /// Whether a manifest exists at `name:reference`.
    async fn manifest_exists(&self, name: &str, reference: &str) -> RegistryResult<bool>;

    /// Fetch a manifest. Missing manifests are `ManifestUnknown`.
    async fn get_manifest(&self, name: &str, reference: &str) -> RegistryResult<ManifestContent>;

    /// Store a manifest under `name:reference` and record it in the indices.
    ///
    /// A digest reference must match the digest of `content.raw`.
    async fn put_manifest(
        &self,
        name: &str,
        reference: &str,
        content: ManifestContent,
    ) -> RegistryResult<()>;

    /// Delete a manifest and drop it from the repository index.
    async fn delete_manifest(&self, name: &str, reference: &str) -> RegistryResult<()>;

    /// The registry-wide index of repositories, optionally filtered by name.
    async fn get_global_index(&self, search: Option<&str>) -> RegistryResult<Index>;

    /// The index of manifests in one repository, optionally filtered by name.
    async fn get_index(&self, name: &str, search: Option<&str>) -> RegistryResult<Index>;

    /// Delete a repository index and drop it from the global index.
    async fn remove_index(&self, name: &str) -> RegistryResult<()>;

    /// Whether a blob exists.
    async fn blob_exists(&self, name: &str, digest: &Digest) -> RegistryResult<bool>;

    /// Store a blob whose content must hash to `digest`.
    async fn put_blob(
        &self,
        name: &str,
        digest: &Digest,
        content: StorageContent,
    ) -> RegistryResult<Transfer<()>>;

    /// Fetch a blob. Missing blobs are `BlobUnknown`.
    async fn get_blob(&self, name: &str, digest: &Digest)
    -> RegistryResult<Transfer<StorageContent>>;
}
