//! Read access to the bucket the log shipper writes to.
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::Object;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("region is empty: please set AWS_DEFAULT_REGION")]
    MissingRegion,
    #[error("error listing objects in s3://{bucket}/{prefix}: {err}")]
    List {
        bucket: String,
        prefix: String,
        /// HTTP status of the answer, `None` when the request never got one.
        status: Option<u16>,
        err: String,
    },
}

impl ObjectStoreError {
    /// Denied requests do not fix themselves by retrying.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ObjectStoreError::List {
                status: Some(401 | 403),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
}

impl From<&Object> for StoredObject {
    fn from(obj: &Object) -> Self {
        Self {
            key: obj.key().unwrap_or_default().to_string(),
            last_modified: obj
                .last_modified()
                .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
            size: obj.size().unwrap_or_default(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ObjectStore: Send + Sync {
    /// Every object under `prefix`, following pagination.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>, ObjectStoreError>;
}

/// [ObjectStore] backed by the AWS SDK with the default credential and region chain.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    runtime: Arc<Runtime>,
}

impl S3ObjectStore {
    pub fn try_new(runtime: Arc<Runtime>) -> Result<Self, ObjectStoreError> {
        let config = runtime.block_on(aws_config::load_defaults(BehaviorVersion::latest()));
        if config.region().is_none_or(|region| region.as_ref().is_empty()) {
            return Err(ObjectStoreError::MissingRegion);
        }
        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            runtime,
        })
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>, ObjectStoreError> {
        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation_token = None;
            loop {
                let output = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await
                    .map_err(|err| ObjectStoreError::List {
                        bucket: bucket.to_string(),
                        prefix: prefix.to_string(),
                        status: err.raw_response().map(|resp| resp.status().as_u16()),
                        err: DisplayErrorContext(&err).to_string(),
                    })?;

                objects.extend(output.contents().iter().map(StoredObject::from));
                match output.next_continuation_token() {
                    Some(token) if output.is_truncated().unwrap_or_default() => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            debug!(bucket, prefix, count = objects.len(), "Listed objects");
            Ok(objects)
        })
    }
}
