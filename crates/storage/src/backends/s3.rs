//! S3-compatible storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{FileMover, ObjectStore};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use lineage_core::Provider;
use lineage_core::config::StorageConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tracing::instrument;

const DEFAULT_REGION: &str = "us-east-1";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Key characters left as-is in a `CopySource` header.
const COPY_SOURCE_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

fn sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if status_of(&err) == Some(404) {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::S3(Box::new(err))
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Accept bare `host:port` endpoints by assuming plain HTTP.
fn endpoint_url(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

/// Object store over one S3 bucket, optionally below a key prefix.
#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    /// Empty, or ends with `/`.
    prefix: String,
}

impl S3Backend {
    /// Build a client from an `s3` storage config.
    ///
    /// Without static keys the ambient AWS credential chain is used.
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;
        let StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } = config
        else {
            return Err(StorageError::Config("not an s3 storage config".to_string()));
        };

        let region = region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let (Some(id), Some(secret)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "lineage-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(*force_path_style);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint_url(endpoint));
        }

        let prefix = match prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("{p}/"),
            _ => String::new(),
        };

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.clone(),
            prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// `bucket/key` with the key percent-encoded, as `CopyObject` expects.
    fn copy_source(&self, key: &str) -> String {
        let key = self.object_key(key);
        format!("{}/{}", self.bucket, utf8_percent_encode(&key, COPY_SOURCE_KEEP))
    }
}

#[async_trait]
impl FileMover for S3Backend {
    /// Copy then delete the source, refusing an occupied destination.
    ///
    /// The destination check and the copy are two requests; a writer racing
    /// between them is not detected.
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn move_file(&self, from: &str, to: &str) -> StorageResult<()> {
        if self.exists(to).await? {
            return Err(StorageError::AlreadyExists(to.to_string()));
        }

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(from))
            .key(self.object_key(to))
            .send()
            .await
            .map_err(|e| sdk_error(e, from))?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(from))
            .send()
            .await
            .map_err(|e| sdk_error(e, from))?;

        tracing::debug!(%from, %to, "Moved object");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;
        match head {
            Ok(_) => Ok(true),
            Err(err) => match sdk_error(err, key) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(body.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", bucket = %self.bucket, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;
        Ok(())
    }

    /// `DeleteObject` succeeds on missing keys, so existence is checked first.
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;
        Ok(())
    }

    fn provider(&self) -> Provider {
        Provider::S3
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn health_check(&self) -> StorageResult<()> {
        let head = self.client.head_bucket().bucket(&self.bucket).send();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, head).await {
            Ok(result) => result
                .map(|_| ())
                .map_err(|e| sdk_error(e, &self.bucket)),
            Err(_) => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("bucket {} did not answer within {HEALTH_CHECK_TIMEOUT:?}", self.bucket),
            ))),
        }
    }
}
