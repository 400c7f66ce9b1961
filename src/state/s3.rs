//! S3-based state storage backend.
//!
//! Shared state for teams: the state document and its lock record are two
//! JSON objects under a common key prefix. The lock object is only ever
//! written with a precondition (`If-None-Match: *` to create it, `If-Match`
//! on its `ETag` to take over or refresh it), so S3 itself arbitrates
//! between concurrent runs.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use tracing::{debug, info};

use crate::error::{ConvoyError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::DeploymentState;

const STATE_KEY: &str = "state.json";
const LOCK_KEY: &str = "state.lock";

/// Conditional-write rounds before giving up on a contended lock.
const LOCK_ATTEMPTS: usize = 3;

/// Precondition for writing the lock object.
#[derive(Debug, Clone, Copy)]
enum LockWrite<'a> {
    /// Only if no lock object exists.
    Absent,
    /// Only if the lock object still has this `ETag`.
    Matches(&'a str),
}

/// S3-based state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Normalizes a key prefix to either `""` or `"segment/.../"`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, content: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| {
        ConvoyError::State(StateError::Corrupted {
            message: format!("Failed to parse {what}: {e}"),
        })
    })
}

/// Whether a write lost its precondition race.
fn lost_precondition<E>(err: &SdkError<E>) -> bool {
    err.raw_response()
        .is_some_and(|response| matches!(response.status().as_u16(), 409 | 412))
}

fn locked_by(existing: LockInfo) -> ConvoyError {
    ConvoyError::State(StateError::LockedByOther {
        holder: existing.holder,
        since: existing.acquired_at.to_rfc3339(),
    })
}

fn serialize_lock(info: &LockInfo) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(info)
        .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")).into())
}

impl S3StateStore {
    /// Creates a new S3 state store using the ambient AWS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: String, prefix: String, region: Option<String>) -> Result<Self> {
        let loader = aws_config::from_env();
        let loader = match region {
            Some(region) => loader.region(aws_config::Region::new(region)),
            None => loader,
        };
        let config = loader.load().await;

        Ok(Self::with_client(Client::new(&config), bucket, &prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: String, prefix: &str) -> Self {
        Self {
            client,
            bucket,
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_object_with_etag(key).await?.map(|(content, _)| content))
    }

    async fn get_object_with_etag(&self, key: &str) -> Result<Option<(String, Option<String>)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let etag = response.e_tag().map(ToString::to_string);
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read s3://{}/{key}: {e}", self.bucket)))?;
                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ConvoyError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;
                Ok(Some((content, etag)))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;
        Ok(())
    }

    /// Writes the lock object under a precondition.
    ///
    /// Returns `false` when the precondition did not hold.
    async fn put_lock(&self, content: Vec<u8>, condition: LockWrite<'_>) -> Result<bool> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(LOCK_KEY))
            .body(content.into())
            .content_type("application/json");

        let request = match condition {
            LockWrite::Absent => request.if_none_match("*"),
            LockWrite::Matches(etag) => request.if_match(etag),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) if lost_precondition(&e) => Ok(false),
            Err(e) => Err(StateError::s3(format!("S3 lock put error: {e}")).into()),
        }
    }

    /// Reads the lock record together with its `ETag`.
    async fn read_lock(&self) -> Result<Option<(LockInfo, Option<String>)>> {
        match self.get_object_with_etag(&self.key(LOCK_KEY)).await? {
            Some((content, etag)) => Ok(Some((parse_json("lock", &content)?, etag))),
            None => Ok(None),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(json) => {
                let state: DeploymentState = parse_json("state", &json)?;
                info!("Loaded state for {}/{}", state.project, state.environment);
                Ok(Some(state))
            }
            None => {
                debug!("No state found in S3");
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        let key = self.key(STATE_KEY);
        info!("Saving state to s3://{}/{key}", self.bucket);

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;
        self.put_object(&key, content).await
    }

    async fn exists(&self) -> Result<bool> {
        let key = self.key(STATE_KEY);
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let info = LockInfo::new(holder, operation);
        let content = serialize_lock(&info)?;

        for _ in 0..LOCK_ATTEMPTS {
            if self.put_lock(content.clone(), LockWrite::Absent).await? {
                info!("Acquired state lock {} for {operation}", info.lock_id);
                return Ok(info);
            }

            match self.read_lock().await? {
                Some((existing, _)) if !existing.is_expired() => return Err(locked_by(existing)),
                Some((existing, Some(etag))) => {
                    debug!("Taking over expired lock held by {}", existing.holder);
                    if self.put_lock(content.clone(), LockWrite::Matches(&etag)).await? {
                        info!("Acquired state lock {} for {operation}", info.lock_id);
                        return Ok(info);
                    }
                }
                Some((existing, None)) => {
                    return Err(StateError::s3(format!(
                        "Expired lock held by {} has no ETag; use `state unlock --force`",
                        existing.holder
                    ))
                    .into());
                }
                None => {}
            }
        }

        Err(ConvoyError::State(StateError::LockFailed {
            message: String::from("Failed to acquire state lock: lock is contended"),
        }))
    }

    async fn refresh_lock(&self, lock: &LockInfo) -> Result<LockInfo> {
        match self.read_lock().await? {
            Some((existing, etag)) if existing.lock_id == lock.lock_id => {
                let mut refreshed = existing;
                refreshed.refresh();
                let content = serialize_lock(&refreshed)?;
                let written = match etag.as_deref() {
                    Some(etag) => self.put_lock(content, LockWrite::Matches(etag)).await?,
                    None => false,
                };
                if !written {
                    return Err(ConvoyError::State(StateError::LockFailed {
                        message: format!("Lock {} changed while refreshing", lock.lock_id),
                    }));
                }
                debug!("Refreshed state lock {} until {}", lock.lock_id, refreshed.expires_at);
                Ok(refreshed)
            }
            Some((existing, _)) => Err(locked_by(existing)),
            None => Err(ConvoyError::State(StateError::LockFailed {
                message: format!("Lock {} no longer exists", lock.lock_id),
            })),
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.get_lock_info().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.get_lock_info().await?;
        if existing.is_some() {
            self.delete_object(&self.key(LOCK_KEY)).await?;
        }
        Ok(existing)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.read_lock().await?.map(|(info, _)| info))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
