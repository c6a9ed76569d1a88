//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{FileMover, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use lineage_core::Provider;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

fn io_error(err: std::io::Error, key: &str) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        _ => StorageError::Io(err),
    }
}

/// Check that `key` is a relative, `/`-separated key such as
/// `tmp/uploads/<id>/<file>` or `datasets/<id>/<file>`.
fn check_key(key: &str) -> StorageResult<()> {
    let invalid = |why: &str| Err(StorageError::InvalidKey(format!("{why}: {key:?}")));

    if key.is_empty() {
        return invalid("empty key");
    }
    if key.starts_with('/') {
        return invalid("absolute key");
    }
    if key.contains('\\') || key.contains('\0') {
        return invalid("forbidden character in key");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("empty segment in key"),
            "." | ".." => return invalid("relative segment in key"),
            _ => {}
        }
    }
    Ok(())
}

/// Local filesystem object store.
///
/// Objects live at `root/<key>`. Keys may not walk through a symlink, so
/// every object stays under `root`.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `key` under the root.
    ///
    /// Every existing prefix of the key is checked with `symlink_metadata`;
    /// the walk stops at the first prefix that does not exist yet.
    async fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;

        let mut path = self.root.clone();
        let mut walking = true;
        for segment in key.split('/') {
            path.push(segment);
            if !walking {
                continue;
            }
            match fs::symlink_metadata(&path).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(StorageError::InvalidKey(format!(
                        "key passes through a symlink: {key:?}"
                    )));
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => walking = false,
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Ok(path)
    }

    async fn create_parent(path: &Path) -> StorageResult<()> {
        match path.parent() {
            Some(parent) => Ok(fs::create_dir_all(parent).await?),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FileMover for FilesystemBackend {
    /// Hard-link `to` onto the source, then unlink the source.
    ///
    /// Linking fails when `to` exists, so a move never replaces an object.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn move_file(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.resolve(from).await?;
        let target = self.resolve(to).await?;

        let meta = fs::metadata(&source).await.map_err(|e| io_error(e, from))?;
        if !meta.is_file() {
            return Err(StorageError::InvalidKey(format!("not a file: {from}")));
        }

        Self::create_parent(&target).await?;
        fs::hard_link(&source, &target)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(to.to_string()),
                _ => io_error(err, from),
            })?;
        fs::remove_file(&source).await.map_err(|e| io_error(e, from))?;

        tracing::debug!(%from, %to, "Moved object");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key).await?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key).await?;
        let data = fs::read(&path).await.map_err(|e| io_error(e, key))?;
        Ok(Bytes::from(data))
    }

    /// Write a sibling `.part` file, sync it, then rename it into place.
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        Self::create_parent(&path).await?;

        let mut partial = path.clone().into_os_string();
        partial.push(format!(".{}.part", Uuid::new_v4().simple()));
        let partial = PathBuf::from(partial);

        let mut file = fs::File::create(&partial).await?;
        let written = async {
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }

        fs::rename(&partial, &path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key).await?;
        fs::remove_file(&path).await.map_err(|e| io_error(e, key))
    }

    fn provider(&self) -> Provider {
        Provider::Filesystem
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Config(format!(
                "storage root {} is not a directory",
                self.root.display()
            )))
        }
    }
}
