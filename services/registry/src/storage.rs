//! [`RegistryStore`] backed by a [`storage::StorageBucket`].
//!
//! Everything lives in one bucket:
//!
//! ```text
//! _index.json                                   global index of repositories
//! repositories/<name>/_index.json               index of the repository's manifests
//! repositories/<name>/_manifests/<reference>    manifest bytes, as uploaded
//! repositories/<name>/_types/<reference>        manifest content type
//! repositories/<name>/_blobs/<alg>/<hex>        blob bytes
//! repositories/<name>/_blobs/<alg>/<hex>.meta   blob content type and encoding
//! repositories/<name>/_uploads/<uuid>           blob bytes awaiting verification
//! ```
//!
//! Blob bodies are written under `_uploads` and only renamed into `_blobs`
//! once their digest has been checked.
//!
//! Repository name segments always start with an alphanumeric, so the
//! `_`-prefixed entries never collide with a nested repository.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Uri};
use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storage::StorageBucket;
use tokio::io::BufReader;
use tokio::sync::Mutex;

use crate::digest::{Algorithm, Digest, HashingReader, parse_digest};
use crate::error::{RegistryError, RegistryResult};
use crate::store::{ManifestContent, RegistryStore, StorageContent, Transfer};
use crate::types::{Descriptor, Index, MEDIA_TYPE_INDEX, Manifest};

const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";
const DEFAULT_MANIFEST_TYPE: &str = "application/json";
const DOWNLOAD_BUFFER: usize = 64 * 1024;

/// When to hand clients a presigned backend URL instead of proxying bytes.
///
/// Redirects only happen when the backend can presign; otherwise the
/// registry always falls back to streaming the content itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectPolicy {
    /// Always proxy through the registry.
    #[default]
    Never,
    /// Redirect uploads that arrive without a known length.
    UnknownLength,
    /// Redirect every upload and download.
    Always,
}

impl RedirectPolicy {
    fn redirect_upload(&self, content_length: Option<u64>) -> bool {
        match self {
            RedirectPolicy::Never => false,
            RedirectPolicy::UnknownLength => content_length.is_none(),
            RedirectPolicy::Always => true,
        }
    }

    fn redirect_download(&self) -> bool {
        matches!(self, RedirectPolicy::Always)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobMeta {
    content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_encoding: Option<String>,
}

/// A registry store on top of any storage driver.
#[derive(Debug, Clone)]
pub struct StorageStore {
    bucket: StorageBucket,
    redirect: RedirectPolicy,
    presign_expiry: Duration,

    // Serializes read-modify-write cycles on index documents.
    index_lock: Arc<Mutex<()>>,
}

impl StorageStore {
    /// Store registry content in `bucket`, never redirecting.
    pub fn new(bucket: StorageBucket) -> Self {
        Self {
            bucket,
            redirect: RedirectPolicy::default(),
            presign_expiry: Duration::from_secs(3600),
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Set when clients are redirected to presigned backend URLs.
    pub fn with_redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    /// Set how long presigned URLs stay valid.
    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    fn global_index_path() -> Utf8PathBuf {
        Utf8PathBuf::from("_index.json")
    }

    fn repository(name: &str) -> Utf8PathBuf {
        Utf8Path::new("repositories").join(name)
    }

    fn index_path(name: &str) -> Utf8PathBuf {
        Self::repository(name).join("_index.json")
    }

    fn manifest_path(name: &str, reference: &str) -> Utf8PathBuf {
        Self::repository(name).join("_manifests").join(reference)
    }

    fn manifest_type_path(name: &str, reference: &str) -> Utf8PathBuf {
        Self::repository(name).join("_types").join(reference)
    }

    fn blob_path(name: &str, digest: &Digest) -> Utf8PathBuf {
        Self::repository(name)
            .join("_blobs")
            .join(digest.algorithm().as_str())
            .join(digest.encoded())
    }

    fn blob_meta_path(name: &str, digest: &Digest) -> Utf8PathBuf {
        let mut path = Self::blob_path(name, digest);
        path.set_extension("meta");
        path
    }

    fn upload_path(name: &str) -> Utf8PathBuf {
        Self::repository(name)
            .join("_uploads")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn exists(&self, path: &Utf8Path) -> RegistryResult<bool> {
        match self.bucket.metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Utf8Path) -> RegistryResult<T> {
        let data = self.bucket.read(path).await?;
        serde_json::from_slice(&data)
            .map_err(|err| RegistryError::Internal(format!("corrupt document at {path}: {err}")))
    }

    async fn write_json<T: Serialize>(&self, path: &Utf8Path, value: &T) -> RegistryResult<Vec<u8>> {
        let data = serde_json::to_vec(value)
            .map_err(|err| RegistryError::Internal(format!("encoding {path}: {err}")))?;
        self.bucket.write(path, &data).await?;
        Ok(data)
    }

    /// Read an index, treating a missing one as empty.
    async fn read_index_or_new(&self, path: &Utf8Path) -> RegistryResult<Index> {
        match self.read_json(path).await {
            Ok(index) => Ok(index),
            Err(err) if err.is_not_found() => Ok(Index::new()),
            Err(err) => Err(err),
        }
    }

    /// Delete an object which may legitimately be absent.
    async fn delete_if_present(&self, path: &Utf8Path) -> RegistryResult<()> {
        match self.bucket.delete(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write a repository index and point the global index at its new digest.
    ///
    /// Callers must hold `index_lock`.
    async fn commit_index(&self, name: &str, index: &Index) -> RegistryResult<()> {
        let data = self.write_json(&Self::index_path(name), index).await?;

        let global_path = Self::global_index_path();
        let mut global = self.read_index_or_new(&global_path).await?;
        global.upsert(Descriptor {
            name: Some(name.to_owned()),
            size: Some(data.len() as i64),
            ..Descriptor::new(Digest::compute(Algorithm::Sha256, &data), MEDIA_TYPE_INDEX)
        });
        self.write_json(&global_path, &global).await?;
        Ok(())
    }

    async fn discard_upload(&self, staging: &Utf8Path) {
        if let Err(err) = self.delete_if_present(staging).await {
            tracing::warn!(%staging, error = %err, "failed to remove staged upload");
        }
    }

    async fn presign(&self, path: &Utf8Path, method: Method) -> RegistryResult<Option<Uri>> {
        Ok(self
            .bucket
            .presign(path, method, self.presign_expiry)
            .await?)
    }
}

#[async_trait::async_trait]
impl RegistryStore for StorageStore {
    #[tracing::instrument(skip(self))]
    async fn manifest_exists(&self, name: &str, reference: &str) -> RegistryResult<bool> {
        self.exists(&Self::manifest_path(name, reference)).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_manifest(&self, name: &str, reference: &str) -> RegistryResult<ManifestContent> {
        let raw = match self.bucket.read(&Self::manifest_path(name, reference)).await {
            Ok(raw) => Bytes::from(raw),
            Err(err) if err.is_not_found() => {
                return Err(RegistryError::ManifestUnknown(format!("{name}:{reference}")));
            }
            Err(err) => return Err(err.into()),
        };

        let content_type = match self.bucket.read(&Self::manifest_type_path(name, reference)).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(err) if err.is_not_found() => DEFAULT_MANIFEST_TYPE.to_owned(),
            Err(err) => return Err(err.into()),
        };

        let manifest: Manifest = serde_json::from_slice(&raw).map_err(|err| {
            RegistryError::Internal(format!("corrupt manifest {name}:{reference}: {err}"))
        })?;

        Ok(ManifestContent {
            content_type,
            manifest,
            raw,
        })
    }

    #[tracing::instrument(skip(self, content), fields(content_type = %content.content_type))]
    async fn put_manifest(
        &self,
        name: &str,
        reference: &str,
        content: ManifestContent,
    ) -> RegistryResult<()> {
        let actual = if reference.contains(':') {
            let expected = parse_digest(reference)?;
            let actual = Digest::compute(expected.algorithm(), &content.raw);
            if actual != expected {
                tracing::debug!(%expected, %actual, "manifest digest mismatch");
                return Err(RegistryError::DigestInvalid(reference.to_owned()));
            }
            actual
        } else {
            Digest::compute(Algorithm::Sha256, &content.raw)
        };

        self.bucket
            .write(&Self::manifest_path(name, reference), &content.raw)
            .await?;
        self.bucket
            .write(
                &Self::manifest_type_path(name, reference),
                content.content_type.as_bytes(),
            )
            .await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index_or_new(&Self::index_path(name)).await?;
        index.upsert(Descriptor {
            name: Some(reference.to_owned()),
            size: Some(content.raw.len() as i64),
            annotations: content.manifest.annotations,
            ..Descriptor::new(actual, content.content_type)
        });
        self.commit_index(name, &index).await?;

        tracing::debug!(%name, %reference, "stored manifest");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_manifest(&self, name: &str, reference: &str) -> RegistryResult<()> {
        self.bucket
            .delete(&Self::manifest_path(name, reference))
            .await?;
        self.delete_if_present(&Self::manifest_type_path(name, reference))
            .await?;

        let _guard = self.index_lock.lock().await;
        let mut index: Index = match self.read_json(&Self::index_path(name)).await {
            Ok(index) => index,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        if index.remove(reference) {
            self.commit_index(name, &index).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_global_index(&self, search: Option<&str>) -> RegistryResult<Index> {
        let index: Index = self.read_json(&Self::global_index_path()).await?;
        Ok(index.search(search.unwrap_or_default()))
    }

    #[tracing::instrument(skip(self))]
    async fn get_index(&self, name: &str, search: Option<&str>) -> RegistryResult<Index> {
        let index: Index = self.read_json(&Self::index_path(name)).await?;
        Ok(index.search(search.unwrap_or_default()))
    }

    #[tracing::instrument(skip(self))]
    async fn remove_index(&self, name: &str) -> RegistryResult<()> {
        let _guard = self.index_lock.lock().await;
        self.bucket.delete(&Self::index_path(name)).await?;

        let global_path = Self::global_index_path();
        let mut global: Index = match self.read_json(&global_path).await {
            Ok(global) => global,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        if global.remove(name) {
            self.write_json(&global_path, &global).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn blob_exists(&self, name: &str, digest: &Digest) -> RegistryResult<bool> {
        self.exists(&Self::blob_path(name, digest)).await
    }

    #[tracing::instrument(skip(self, content), fields(%digest, length = ?content.content_length))]
    async fn put_blob(
        &self,
        name: &str,
        digest: &Digest,
        content: StorageContent,
    ) -> RegistryResult<Transfer<()>> {
        let path = Self::blob_path(name, digest);

        if self.exists(&path).await? {
            tracing::debug!("blob already present");
            return Ok(Transfer::Direct(()));
        }

        if content.range.is_some_and(|range| !range.is_initial()) {
            return Err(RegistryError::ContentRangeInvalid(
                "resumed uploads are not supported",
            ));
        }

        let meta = BlobMeta {
            content_type: content.content_type,
            content_encoding: content.content_encoding,
        };

        if self.redirect.redirect_upload(content.content_length) {
            if let Some(location) = self.presign(&path, Method::PUT).await? {
                self.write_json(&Self::blob_meta_path(name, digest), &meta)
                    .await?;
                tracing::debug!(%location, "redirecting upload");
                return Ok(Transfer::Redirect(location));
            }
        }

        let staging = Self::upload_path(name);
        let mut reader = BufReader::new(HashingReader::new(content.content, digest.algorithm()));
        if let Err(err) = self.bucket.upload(&staging, &mut reader).await {
            self.discard_upload(&staging).await;
            return Err(err.into());
        }

        let actual = reader.get_ref().digest();
        if actual != *digest {
            tracing::debug!(%actual, read = reader.get_ref().bytes_read(), "blob digest mismatch");
            self.discard_upload(&staging).await;
            return Err(RegistryError::DigestInvalid(digest.to_string()));
        }

        let committed = async {
            self.write_json(&Self::blob_meta_path(name, digest), &meta)
                .await?;
            self.bucket.rename(&staging, &path).await?;
            Ok::<_, RegistryError>(())
        }
        .await;
        if let Err(err) = committed {
            self.discard_upload(&staging).await;
            return Err(err);
        }
        Ok(Transfer::Direct(()))
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn get_blob(
        &self,
        name: &str,
        digest: &Digest,
    ) -> RegistryResult<Transfer<StorageContent>> {
        let path = Self::blob_path(name, digest);

        let metadata = match self.bucket.metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.is_not_found() => {
                return Err(RegistryError::BlobUnknown(digest.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if self.redirect.redirect_download() {
            if let Some(location) = self.presign(&path, Method::GET).await? {
                return Ok(Transfer::Redirect(location));
            }
        }

        let meta = match self
            .read_json::<BlobMeta>(&Self::blob_meta_path(name, digest))
            .await
        {
            Ok(meta) => meta,
            Err(err) if err.is_not_found() => BlobMeta {
                content_type: DEFAULT_BLOB_TYPE.to_owned(),
                content_encoding: None,
            },
            Err(err) => return Err(err),
        };

        let (mut writer, reader) = tokio::io::duplex(DOWNLOAD_BUFFER);
        let bucket = self.bucket.clone();
        tokio::spawn(async move {
            if let Err(err) = bucket.download(&path, &mut writer).await {
                tracing::warn!(%path, error = %err, "blob download failed after headers were sent");
            }
        });

        Ok(Transfer::Direct(StorageContent {
            content_length: Some(metadata.size),
            content_type: meta.content_type,
            content_encoding: meta.content_encoding,
            range: None,
            content: Box::new(reader),
        }))
    }
}
