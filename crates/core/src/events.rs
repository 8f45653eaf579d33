//! Event type definitions for the pipeline.
//!
//! `StorageNotification` is the loosely-typed body posted by the object
//! store; everything downstream of the ingress works with the validated
//! `UploadEvent` and `RawDataEvent` records.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result, ValidationErrorCode};
use crate::metadata::RasterMetadata;

/// Notification name emitted when an object is written with a single PUT.
pub const OBJECT_CREATED_PUT: &str = "s3:ObjectCreated:Put";

/// Bucket reference inside a notification record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketRef {
    #[serde(default)]
    pub name: Option<String>,
}

/// Object reference inside a notification record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// S3 section of a notification record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: Option<BucketRef>,
    #[serde(default)]
    pub object: Option<ObjectRef>,
}

/// One record of a notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(default)]
    pub s3: Option<S3Entity>,
}

/// Storage event notification as posted by the object store webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageNotification {
    #[serde(rename = "EventName", default)]
    pub event_name: Option<String>,
    #[serde(rename = "Key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "Records", default)]
    pub records: Option<Vec<NotificationRecord>>,
}

impl StorageNotification {
    /// Parses a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!("invalid notification body: {e}"),
            )
        })
    }

    /// Returns the event name, which every notification must carry.
    pub fn event_name(&self) -> Result<&str> {
        self.event_name.as_deref().ok_or_else(|| {
            Error::validation(ValidationErrorCode::MissingEventName, "EventName is required")
        })
    }

    /// Whether this notification announces a newly created object.
    pub fn is_object_created(&self) -> Result<bool> {
        Ok(self.event_name()? == OBJECT_CREATED_PUT)
    }

    /// Extracts bucket and key from the first record.
    pub fn object_location(&self) -> Result<(String, String)> {
        let missing = |what: &str| {
            Error::validation(
                ValidationErrorCode::MissingObject,
                format!("{what} is missing from the notification"),
            )
        };

        let record = self
            .records
            .as_deref()
            .and_then(|records| records.first())
            .ok_or_else(|| missing("Records[0]"))?;
        let s3 = record.s3.as_ref().ok_or_else(|| missing("Records[0].s3"))?;
        let bucket = s3
            .bucket
            .as_ref()
            .and_then(|b| b.name.clone())
            .ok_or_else(|| missing("Records[0].s3.bucket.name"))?;
        let key = s3
            .object
            .as_ref()
            .and_then(|o| o.key.clone())
            .ok_or_else(|| missing("Records[0].s3.object.key"))?;

        Ok((bucket, key))
    }

    /// Builds a validated upload event from the first record, regardless of
    /// the event name.
    pub fn to_upload_event(&self) -> Result<UploadEvent> {
        let (bucket, key) = self.object_location()?;
        let event = UploadEvent::new(
            bucket,
            key,
            self.event_name.clone().unwrap_or_default(),
        );
        event.check()?;
        Ok(event)
    }

    /// Builds an upload event for object-created notifications.
    ///
    /// Returns `Ok(None)` for any other event name; those are accepted and
    /// dropped by the ingress.
    pub fn upload_event(&self) -> Result<Option<UploadEvent>> {
        if !self.is_object_created()? {
            return Ok(None);
        }
        self.to_upload_event().map(Some)
    }
}

/// JSON encoding for queue payloads.
pub trait QueuePayload: Serialize + DeserializeOwned {
    fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_payload(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A newly uploaded object waiting for metadata extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UploadEvent {
    #[validate(length(min = 1, max = 255))]
    pub bucket: String,
    #[validate(length(min = 1, max = 1024))]
    pub object_key: String,
    pub event_name: String,
    pub received_at: DateTime<Utc>,
}

impl UploadEvent {
    pub fn new(
        bucket: impl Into<String>,
        object_key: impl Into<String>,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            object_key: object_key.into(),
            event_name: event_name.into(),
            received_at: Utc::now(),
        }
    }

    /// Runs field validation, mapping failures to `VALID_003`.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| {
            Error::validation(
                ValidationErrorCode::MissingObject,
                format!("invalid upload event: {e}"),
            )
        })
    }

    /// Last path segment of the object key.
    pub fn file_name(&self) -> &str {
        self.object_key
            .rsplit('/')
            .next()
            .unwrap_or(&self.object_key)
    }
}

impl QueuePayload for UploadEvent {}

/// Extracted metadata handed to the report stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataEvent {
    pub bucket: String,
    pub object_key: String,
    pub metadata: RasterMetadata,
    pub extracted_at: DateTime<Utc>,
}

impl RawDataEvent {
    pub fn new(upload: &UploadEvent, metadata: RasterMetadata) -> Self {
        Self {
            bucket: upload.bucket.clone(),
            object_key: upload.object_key.clone(),
            metadata,
            extracted_at: Utc::now(),
        }
    }
}

impl QueuePayload for RawDataEvent {}

/// Body posted to an action's `/run` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub event: serde_json::Value,
}
