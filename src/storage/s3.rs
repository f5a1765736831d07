// S3 storage provider
// Also serves Google Cloud Storage through its S3-interoperable XML endpoint (HMAC keys).

use super::{validate_artifact_path, ArtifactStat, StorageError, StorageProvider};
use crate::error::{BackupError, ErrorCode, Result, Stage};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Options for the `s3` provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub key_prefix: String,
    pub enable_encryption: bool,
    pub multipart_threshold_mb: u64,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub create_bucket: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket_name: "platform-backups".to_string(),
            region: "us-east-1".to_string(),
            key_prefix: "backups/".to_string(),
            enable_encryption: true,
            multipart_threshold_mb: 64,
            endpoint_url: None,
            force_path_style: false,
            create_bucket: false,
        }
    }
}

/// Options for the `gcs` provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub bucket_name: String,
    pub key_prefix: String,
    pub endpoint_url: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            bucket_name: "platform-backups".to_string(),
            key_prefix: "backups/".to_string(),
            endpoint_url: GCS_ENDPOINT.to_string(),
        }
    }
}

impl From<GcsConfig> for S3Config {
    fn from(gcs: GcsConfig) -> Self {
        Self {
            bucket_name: gcs.bucket_name,
            region: "auto".to_string(),
            key_prefix: gcs.key_prefix,
            // GCS encrypts at rest and rejects the SSE header
            enable_encryption: false,
            multipart_threshold_mb: u64::MAX,
            endpoint_url: Some(gcs.endpoint_url),
            force_path_style: true,
            create_bucket: false,
        }
    }
}

pub struct S3StorageProvider {
    client: Client,
    config: S3Config,
    kind: &'static str,
}

impl S3StorageProvider {
    pub async fn new(config: S3Config) -> Result<Self> {
        Self::build(config, "s3").await
    }

    pub async fn gcs(config: GcsConfig) -> Result<Self> {
        Self::build(config.into(), "gcs").await
    }

    async fn build(config: S3Config, kind: &'static str) -> Result<Self> {
        if config.bucket_name.is_empty() {
            return Err(BackupError::new(
                ErrorCode::ConfigurationInvalid,
                format!("{} provider requires a bucket_name", kind),
            )
            .with_stage(Stage::Config));
        }

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // LocalStack/MinIO/GCS interop endpoints
        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self { client, config, kind })
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        validate_artifact_path(path)?;
        Ok(format!("{}{}", self.config.key_prefix, path))
    }

    fn backend_error(context: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::Backend(format!("{}: {}", context, err))
    }

    async fn upload_multipart(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let multipart_upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::backend_error("Failed to create multipart upload", e))?;

        let upload_id = multipart_upload
            .upload_id()
            .ok_or_else(|| StorageError::Backend("No upload ID returned".to_string()))?;

        let mut parts = Vec::new();
        for (index, chunk) in data.chunks(PART_SIZE).enumerate() {
            let part_number = (index + 1) as i32;
            let part_response = self
                .client
                .upload_part()
                .bucket(&self.config.bucket_name)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| Self::backend_error("Failed to upload part", e))?;

            parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| Self::backend_error("Failed to complete multipart upload", e))?;

        Ok(())
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    fn kind(&self) -> &str {
        self.kind
    }

    async fn ensure_ready(&self) -> Result<(), StorageError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if self.config.create_bucket => {
                debug!(bucket = %self.config.bucket_name, error = %e, "Bucket not reachable, creating");
                let mut create_bucket = self.client.create_bucket().bucket(&self.config.bucket_name);

                if self.config.region != "us-east-1" {
                    use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
                    let location = BucketLocationConstraint::from(self.config.region.as_str());
                    let bucket_config = CreateBucketConfiguration::builder()
                        .location_constraint(location)
                        .build();
                    create_bucket = create_bucket.create_bucket_configuration(bucket_config);
                }

                create_bucket
                    .send()
                    .await
                    .map_err(|e| Self::backend_error("Failed to create bucket", e))?;
                info!(bucket = %self.config.bucket_name, "Created backup bucket");
                Ok(())
            }
            Err(e) => Err(Self::backend_error("Bucket is not accessible", e)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = self.key(path)?;
        let threshold = self
            .config
            .multipart_threshold_mb
            .saturating_mul(1024 * 1024);

        if (data.len() as u64) >= threshold {
            return self.upload_multipart(&key, data).await;
        }

        let mut put_request = self
            .client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .body(ByteStream::from(data.to_vec()));

        if self.config.enable_encryption {
            put_request = put_request
                .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
        }

        put_request
            .send()
            .await
            .map_err(|e| Self::backend_error("Failed to write artifact", e))?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let key = self.key(path)?;
        let response = match self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StorageError::NotFound(path.to_string()));
                }
                return Err(Self::backend_error("Failed to read artifact", service_error));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| Self::backend_error("Failed to read body", e))?
            .into_bytes();

        Ok(body.to_vec())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut paths = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket_name)
                .prefix(&self.config.key_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| Self::backend_error("Failed to list artifacts", e))?;

            paths.extend(response.contents().iter().filter_map(|object| {
                object
                    .key()
                    .and_then(|key| key.strip_prefix(&self.config.key_prefix))
                    .map(|path| path.to_string())
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        paths.sort();
        Ok(paths)
    }

    async fn stat(&self, path: &str) -> Result<ArtifactStat, StorageError> {
        let key = self.key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => Ok(ArtifactStat {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                modified: response
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
            }),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Err(StorageError::NotFound(path.to_string()))
                } else {
                    Err(Self::backend_error("Failed to stat artifact", service_error))
                }
            }
        }
    }

    async fn remove_file(&self, path: &str) -> Result<(), StorageError> {
        let key = self.key(path)?;
        self.client
            .delete_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::backend_error("Failed to delete artifact", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcs_maps_to_interop_endpoint() {
        let s3: S3Config = GcsConfig {
            bucket_name: "bk".into(),
            ..GcsConfig::default()
        }
        .into();
        assert_eq!(s3.endpoint_url.as_deref(), Some(GCS_ENDPOINT));
        assert!(s3.force_path_style);
        assert!(!s3.enable_encryption);
    }

    #[tokio::test]
    #[ignore = "requires S3 or an S3-compatible endpoint (S3_ENDPOINT_URL)"]
    async fn test_s3_roundtrip() {
        let config = S3Config {
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            force_path_style: true,
            create_bucket: true,
            ..S3Config::default()
        };
        let provider = S3StorageProvider::new(config).await.unwrap();
        provider.ensure_ready().await.unwrap();
        provider.write_file("itest_config.json", b"{}").await.unwrap();
        assert!(provider.exists("itest_config.json").await.unwrap());
        assert_eq!(provider.read_file("itest_config.json").await.unwrap(), b"{}");
        provider.remove_file("itest_config.json").await.unwrap();
        assert!(!provider.exists("itest_config.json").await.unwrap());
    }
}
