//! Object metadata wire format.
//!
//! Raster metadata is attached to the stored object as user-defined
//! key/value pairs. Every key carries [`USER_METADATA_PREFIX`]; nested values
//! are written as canonical JSON (object keys sorted), strings verbatim, and
//! other scalars through their display form. An absent geotransform is
//! written as `{}`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result, ValidationErrorCode};
use crate::metadata::RasterMetadata;

/// Provider-specific prefix for user-defined object metadata.
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Top-level fields of the persisted record.
pub mod field {
    pub const DRIVER: &str = "driver";
    pub const SIZE: &str = "size";
    pub const PROJECTION: &str = "projection";
    pub const GEOTRANSFORM: &str = "geotransform";
    pub const BANDS: &str = "bands";

    pub const ALL: &[&str] = &[DRIVER, SIZE, PROJECTION, GEOTRANSFORM, BANDS];
}

/// Ordered metadata map as attached to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Prefixes a bare field name.
pub fn prefixed(name: &str) -> String {
    format!("{USER_METADATA_PREFIX}{name}")
}

/// Strips the user-metadata prefix, if present.
pub fn unprefixed(key: &str) -> &str {
    key.strip_prefix(USER_METADATA_PREFIX).unwrap_or(key)
}

/// Rebuilds objects with their keys in sorted order at every depth.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn stringify(value: Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s,
        Value::Null => "{}".to_string(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(&canonicalize(value))?,
        other => other.to_string(),
    })
}

impl RasterMetadata {
    /// Encodes the record as prefixed object metadata.
    pub fn to_object_metadata(&self) -> Result<ObjectMetadata> {
        let Value::Object(fields) = serde_json::to_value(self)? else {
            return Err(Error::internal("raster metadata did not serialize to an object"));
        };

        fields
            .into_iter()
            .map(|(name, value)| Ok((prefixed(&name), stringify(value)?)))
            .collect()
    }

    /// Decodes a record from object metadata written by [`to_object_metadata`].
    ///
    /// Keys are matched with or without the prefix and case-insensitively,
    /// since object stores normalise user metadata keys to lower case.
    ///
    /// [`to_object_metadata`]: RasterMetadata::to_object_metadata
    pub fn from_object_metadata(metadata: &ObjectMetadata) -> Result<Self> {
        let lookup: BTreeMap<String, &String> = metadata
            .iter()
            .map(|(k, v)| (unprefixed(&k.to_ascii_lowercase()).to_string(), v))
            .collect();

        let mut fields = serde_json::Map::new();
        for name in field::ALL {
            let raw = lookup.get(*name).ok_or_else(|| {
                Error::validation(
                    ValidationErrorCode::InvalidFormat,
                    format!("object metadata is missing {}", prefixed(name)),
                )
            })?;

            let value = match *name {
                field::PROJECTION => Value::String(raw.to_string()),
                _ => serde_json::from_str(raw)?,
            };

            let value = match (*name, value) {
                (field::GEOTRANSFORM, Value::Object(map)) if map.is_empty() => Value::Null,
                (_, value) => value,
            };

            fields.insert(name.to_string(), value);
        }

        let decoded: RasterMetadata = serde_json::from_value(Value::Object(fields))?;
        decoded.validate()?;
        Ok(decoded)
    }
}
