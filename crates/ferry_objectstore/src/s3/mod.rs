use serde::Deserialize;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::future::join_all;
use http::Uri;
use sha2::{Digest, Sha256};

use ferry_core::{BlockClient, BlockError, BlockId};

pub(crate) mod logging;
use crate::{
    errors::{Error, Result},
    s3::logging::RequestTracing,
    Key,
};

/// Smallest part `UploadPartCopy` accepts, the last part excepted.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Most parts a single multipart upload may have.
pub const MAX_PARTS: usize = 10_000;

fn default_staging_prefix() -> String {
    String::from(".ferry-staging")
}

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
    /// Key prefix under which blocks wait for their commit.
    #[serde(default = "default_staging_prefix")]
    staging_prefix: String,
}

impl S3Config {
    /// Reject configurations that could never authenticate or address a bucket.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
            ("hostname", &self.hostname),
            ("bucket_name", &self.bucket_name),
            ("region", &self.region),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("s3 {name} is missing")));
            }
        }
        Key::try_from(self.staging_prefix.as_str())?;
        Ok(())
    }

    pub async fn new_objects(&self) -> Result<S3> {
        self.validate()?;

        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "ferry",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme("https")
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .interceptor(RequestTracing)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            staging_prefix: self.staging_prefix.clone(),
            client: s3_client,
        })
    }
}

/// Stages blocks as temporary objects and composes them into the final object with a multipart
/// upload made of `UploadPartCopy` requests.
#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    staging_prefix: String,
    client: Client,
}

impl S3 {
    fn staging_key(&self, object_name: &str, block_id: &BlockId) -> String {
        staging_key(&self.staging_prefix, object_name, block_id)
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let _put_object_output = self
            .client
            .put_object()
            .key(key)
            .content_length(bytes.len() as i64)
            .body(ByteStream::from(bytes))
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn compose(&self, key: &Key, object_name: &str, block_ids: &[BlockId]) -> Result<()> {
        let key = String::from(key);
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(&key)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output
            .upload_id()
            .ok_or(Error::ObjectsFailedToInitiateMultipartUpload(
                "missing upload id",
            ))?
            .to_string();

        let result = self
            .copy_and_complete(&upload_id, &key, object_name, block_ids)
            .await;
        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .upload_id(&upload_id)
                .key(&key)
                .bucket(&self.bucket_name)
                .send()
                .await
            {
                tracing::warn!(key = %key, upload_id = %upload_id, "failed to abort multipart upload: {e}");
            }
        }
        result
    }

    async fn copy_and_complete(
        &self,
        upload_id: &str,
        key: &str,
        object_name: &str,
        block_ids: &[BlockId],
    ) -> Result<()> {
        let mut mpu = CompletedMultipartUpload::builder();
        for (i, block_id) in block_ids.iter().enumerate() {
            let part_number = i as i32 + 1;
            let copy_source = format!(
                "{}/{}",
                self.bucket_name,
                self.staging_key(object_name, block_id)
            );
            let upload_part_copy_output = self
                .client
                .upload_part_copy()
                .upload_id(upload_id)
                .part_number(part_number)
                .copy_source(copy_source)
                .key(key)
                .bucket(&self.bucket_name)
                .send()
                .await?;

            let mut pb = CompletedPart::builder();
            if let Some(e_tag) = upload_part_copy_output
                .copy_part_result()
                .and_then(|r| r.e_tag())
            {
                pb = pb.e_tag(e_tag);
            }
            mpu = mpu.parts(pb.part_number(part_number).build());
        }

        let _complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key)
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    /// Remove the staging objects of a committed upload. Failures only leave garbage behind.
    async fn delete_staged(&self, object_name: &str, block_ids: &[BlockId]) {
        let deletes = block_ids.iter().map(|block_id| {
            let key = self.staging_key(object_name, block_id);
            async move {
                let result = self
                    .client
                    .delete_object()
                    .key(&key)
                    .bucket(&self.bucket_name)
                    .send()
                    .await;
                (key, result)
            }
        });
        for (key, result) in join_all(deletes).await {
            if let Err(e) = result {
                tracing::warn!(key = %key, "failed to delete staged block: {}", Error::from(e));
            }
        }
    }
}

#[async_trait]
impl BlockClient for S3 {
    async fn stage_block(
        &self,
        object_name: &str,
        block_id: &BlockId,
        bytes: Bytes,
    ) -> std::result::Result<(), BlockError> {
        let key = self.staging_key(object_name, block_id);
        tracing::debug!(object = %object_name, block = %block_id, key = %key, len = bytes.len(), "staging block");
        self.put(&key, bytes).await?;
        Ok(())
    }

    async fn commit_block_list(
        &self,
        object_name: &str,
        block_ids: &[BlockId],
    ) -> std::result::Result<(), BlockError> {
        let key = Key::try_from(object_name).map_err(Error::from)?;
        if block_ids.len() > MAX_PARTS {
            return Err(Error::TooManyBlocks {
                blocks: block_ids.len(),
                max: MAX_PARTS,
            }
            .into());
        }

        if block_ids.is_empty() {
            self.put(&String::from(&key), Bytes::new()).await?;
            return Ok(());
        }

        self.compose(&key, object_name, block_ids).await?;
        tracing::debug!(object = %object_name, blocks = block_ids.len(), "composed object from staged blocks");

        self.delete_staged(object_name, block_ids).await;
        Ok(())
    }

    fn min_block_size(&self) -> u64 {
        MIN_PART_SIZE
    }

    fn check_object_name(&self, object_name: &str) -> std::result::Result<(), String> {
        Key::try_from(object_name)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Staging objects live under a digest of the object name so that any object name maps to a
/// key made of safe characters only.
fn staging_key(prefix: &str, object_name: &str, block_id: &BlockId) -> String {
    let digest = Sha256::digest(object_name.as_bytes());
    format!("{}/{:x}/{}", prefix.trim_end_matches('/'), digest, block_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyError;

    fn config(access_key: &str, bucket_name: &str, staging_prefix: &str) -> S3Config {
        S3Config {
            secret_key: String::from("secret"),
            access_key: String::from(access_key),
            hostname: String::from("s3.example.com"),
            bucket_name: String::from(bucket_name),
            region: String::from("us-east-1"),
            staging_prefix: String::from(staging_prefix),
        }
    }

    #[test]
    fn validate_config() {
        assert!(config("key", "bucket", ".ferry-staging").validate().is_ok());
        assert!(matches!(
            config("", "bucket", ".ferry-staging").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            config("key", "  ", ".ferry-staging").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            config("key", "bucket", "../up").validate(),
            Err(Error::KeyError(KeyError::ParentDirNotAllowed))
        ));
    }

    #[test]
    fn staging_keys_are_safe_and_scoped_per_object() {
        let block = BlockId::from(String::from("4b0c6c1e-4d4e-4a57-9f0e-0d1f1f7f1a2b"));
        let a = staging_key(".ferry-staging/", "videos/my movie.mp4", &block);
        let b = staging_key(".ferry-staging", "videos/other.mp4", &block);

        assert!(a.starts_with(".ferry-staging/"));
        assert!(a.ends_with("/4b0c6c1e-4d4e-4a57-9f0e-0d1f1f7f1a2b"));
        assert_ne!(a, b);
        assert!(Key::try_from(a.as_str()).is_ok());
    }

    #[test]
    fn deserialize_with_default_prefix() {
        let cfg: S3Config = serde_yaml::from_str(
            "secret_key: s\naccess_key: a\nhostname: h\nbucket_name: b\nregion: r\n",
        )
        .unwrap();
        assert_eq!(cfg.staging_prefix, ".ferry-staging");
    }
}
