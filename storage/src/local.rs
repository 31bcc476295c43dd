use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Storage driver which keeps objects as files under a root directory.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. Each bucket is a directory below it.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn bucket_root(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if remote
            .components()
            .any(|c| !matches!(c, camino::Utf8Component::Normal(_)))
        {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("path must be relative and normalized: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }
        Ok(self.bucket_root(bucket).join(remote))
    }

    fn error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &'static str,
    ) -> impl FnOnce(std::io::Error) -> StorageError {
        let engine = self.name();
        let bucket = bucket.to_owned();
        let remote = remote.to_string();
        move |err| {
            StorageError::builder(engine, StorageErrorKind::from_io(&err), err)
                .bucket(bucket)
                .path(remote)
                .context(context)
                .build()
        }
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn scheme(&self) -> &str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(self.error(bucket, remote, "metadata"))?;
        Ok(Metadata {
            size: metadata.len(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(self.error(bucket, remote, "remove file"))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        let parent = path.parent().unwrap_or(&self.root);

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(self.error(bucket, remote, "create parent directories"))?;

        // Written beside the target and renamed into place, so readers never see a partial object.
        let staging = parent.join(format!(
            ".{}.{}.partial",
            path.file_name().unwrap_or("object"),
            uuid::Uuid::new_v4()
        ));

        let result = async {
            let mut writer = tokio::io::BufWriter::new(
                tokio::fs::File::create(&staging)
                    .await
                    .map_err(self.error(bucket, remote, "create staging file"))?,
            );

            tokio::io::copy_buf(&mut *local, &mut writer)
                .await
                .map_err(self.error(bucket, remote, "copy"))?;

            writer
                .shutdown()
                .await
                .map_err(self.error(bucket, remote, "shutdown writer"))?;

            tokio::fs::rename(&staging, &path)
                .await
                .map_err(self.error(bucket, remote, "rename into place"))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        result
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(self.error(bucket, remote, "open file"))?,
        );

        tokio::io::copy_buf(&mut reader, local)
            .await
            .map_err(self.error(bucket, remote, "copy"))?;

        local
            .flush()
            .await
            .map_err(self.error(bucket, remote, "flush writer"))?;

        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from)?;
        let target = self.path(bucket, to)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.error(bucket, to, "create parent directories"))?;
        }

        tracing::trace!(%source, %target, "rename local object");
        tokio::fs::rename(&source, &target)
            .await
            .map_err(self.error(bucket, from, "rename"))
    }
}
