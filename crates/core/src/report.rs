//! Report payload and prompt construction.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::events::RawDataEvent;
use crate::metadata::RasterMetadata;

/// Fixed instruction placed before the serialized metadata.
pub const REPORT_PROMPT: &str = concat!(
    "can you give me a description of the below raster data? ",
    "what does this mean for this .tiff file?"
);

/// Narrative used when the text-generation service gives no usable answer.
pub const PLACEHOLDER_NARRATIVE: &str = "Failed to extract content from OpenAI response";

/// Subject line of report emails.
pub const REPORT_SUBJECT: &str = "Georeport";

/// Metadata plus generated narrative, as delivered to the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub metadata: RasterMetadata,
    pub narrative: String,
}

/// Builds the text-generation prompt for an event.
pub fn build_prompt(event: &RawDataEvent) -> Result<String> {
    let metadata = serde_json::to_string(&event.metadata)?;
    Ok(format!("{REPORT_PROMPT}{metadata}"))
}

/// Idempotency key for report delivery.
///
/// Two deliveries of the same object with identical statistics produce the
/// same key; a re-upload with different content does not. The extraction
/// timestamp is not part of the key.
pub fn delivery_key(event: &RawDataEvent) -> Result<String> {
    let metadata = serde_json::to_vec(&event.metadata)?;

    let mut hasher = Sha256::new();
    hasher.update(event.bucket.as_bytes());
    hasher.update([0u8]);
    hasher.update(event.object_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(&metadata);
    Ok(hex::encode(hasher.finalize()))
}
