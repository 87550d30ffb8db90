//! S3 object store (also S3-compatible services via a custom endpoint).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bulk_core::{BulkError, ErrorContext, Result};
use tracing::debug;

use crate::credentials::KeyFile;
use crate::store::{ObjectMeta, ObjectStore};

pub const S3_STORE_TYPE: &str = "s3";

/// Client settings for [`S3Store::connect`].
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub bucket: String,
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service, e.g. `http://localhost:9000`.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub key_file: Option<KeyFile>,
}

/// Object store over one S3 bucket.
///
/// Creating an S3 client is relatively expensive, so one store is shared by
/// every stream of a destination.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(options: S3Options) -> Result<Self> {
        if options.bucket.trim().is_empty() {
            return Err(BulkError::config("s3: bucket is required"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &options.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        match &options.key_file {
            Some(KeyFile::Static(key)) => {
                debug!("Using explicit S3 credentials");
                loader = loader.credentials_provider(Credentials::new(
                    &key.access_key_id,
                    &key.secret_access_key,
                    key.session_token.clone(),
                    None,
                    "bulkload-access-key",
                ));
            }
            Some(KeyFile::WorkloadIdentity) | None => {
                debug!("Using default AWS credential chain");
            }
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(options.force_path_style)
            .build();
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: options.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn context(&self, key: &str) -> ErrorContext {
        ErrorContext::new(&self.bucket).with_statement(format!("file: {key}"))
    }
}

fn sdk_cause<E: std::error::Error>(err: E) -> String {
    DisplayErrorContext(err).to_string()
}

#[async_trait]
impl ObjectStore for S3Store {
    fn type_id(&self) -> &'static str {
        S3_STORE_TYPE
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn put(&self, key: &str, body: Vec<u8>, meta: &ObjectMeta) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(meta.content_type.clone())
            .set_content_encoding(meta.content_encoding.clone())
            .send()
            .await
            .map_err(|e| {
                BulkError::stage_io("failed to write file to s3", self.context(key), sdk_cause(e))
            })?;
        debug!("Uploaded {size} bytes to s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                BulkError::stage_io("failed to fetch object from s3", self.context(key), sdk_cause(e))
            })?;
        let body = response.body.collect().await.map_err(|e| {
            BulkError::stage_io("failed to read object body", self.context(key), e)
        })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                content_type: output.content_type().map(str::to_string),
                content_encoding: output.content_encoding().map(str::to_string),
            })),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(None),
            Err(e) => Err(BulkError::stage_io(
                "failed to read object metadata",
                self.context(key),
                sdk_cause(e),
            )),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                BulkError::stage_io("failed to delete from s3", self.context(key), sdk_cause(e))
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                BulkError::stage_io("failed to list s3 prefix", self.context(prefix), sdk_cause(e))
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        keys.sort();
        debug!("Listed {} objects in s3://{}/{}", keys.len(), self.bucket, prefix);
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_bucket() {
        let result = S3Store::connect(S3Options::default()).await;
        assert!(matches!(result, Err(BulkError::Config(_))));
    }

    #[tokio::test]
    async fn test_describe() {
        let store = S3Store::connect(S3Options {
            bucket: "events".to_string(),
            region: Some("us-east-1".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            key_file: None,
        })
        .await
        .unwrap();
        assert_eq!(store.describe(), "s3://events");
        assert_eq!(store.type_id(), "s3");
    }
}
