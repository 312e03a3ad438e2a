// src/storage/s3.rs

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials as S3Credentials},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use tracing::{debug, info};

use super::{ObjectInfo, ObjectStore};
use crate::config::{AwsSettings, Credentials};
use crate::error::{PipelineError, Result};

const FALLBACK_REGION: &str = "us-east-1";
const CREDENTIALS_PROVIDER: &str = "impression-agg-config";

const ACCESS_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];
const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchKey", "NotFound"];

/// S3 client built from explicit credentials; nothing is read from or written to the environment.
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub async fn connect(credentials: &Credentials, settings: &AwsSettings) -> Result<Self> {
        if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
            return Err(PipelineError::Access("empty access key or secret key".into()));
        }

        let static_creds = S3Credentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let region = match &settings.region {
            Some(r) => RegionProviderChain::first_try(Region::new(r.clone())),
            None => RegionProviderChain::default_provider().or_else(FALLBACK_REGION),
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(static_creds);
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint.is_some())
            .build();
        debug!(endpoint = ?settings.endpoint, "built S3 client");

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn authenticate(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            // HeadBucket has no body, so a refused signature is a bare 403 with no code
            .map_err(|e| classify("head bucket", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| classify("list objects", e))?;

            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }
                out.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                });
            }

            if resp.is_truncated() == Some(true) {
                continuation = resp.next_continuation_token().map(str::to_string);
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(count = out.len(), "listed objects");
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("get object", e))?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Network(format!("reading body of {}: {}", key, e)))?;
        Ok(bytes.into_bytes().to_vec())
    }

    #[tracing::instrument(level = "info", skip(self, local), fields(local = %local.display()))]
    async fn put_file(&self, local: &Path, bucket: &str, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| PipelineError::Write(format!("opening {}: {}", local.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("text/csv")
            .body(body)
            .send()
            .await
            .map_err(|e| classify("put object", e))?;

        info!("uploaded to s3://{}/{}", bucket, key);
        Ok(())
    }
}

/// Map an SDK failure onto the job's error taxonomy.
fn classify<E>(op: &str, err: SdkError<E, HttpResponse>) -> PipelineError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let detail = format!("{} failed: {}", op, DisplayErrorContext(&err));

    match (&err, status, code.as_deref()) {
        (_, _, Some(c)) if ACCESS_CODES.contains(&c) => PipelineError::Access(detail),
        (SdkError::ServiceError(_), Some(401 | 403), _) => PipelineError::Access(detail),
        (_, _, Some(c)) if NOT_FOUND_CODES.contains(&c) => PipelineError::NotFound(detail),
        (SdkError::ServiceError(_), Some(404), _) => PipelineError::NotFound(detail),
        _ => PipelineError::Network(detail),
    }
}
