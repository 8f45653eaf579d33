//! Test fixtures: storage notifications and synthetic GeoTIFFs.

use pipeline_core::OBJECT_CREATED_PUT;
use raster::geokeys::tag;
use serde_json::{json, Value};
use std::io::Cursor;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

pub const BUCKET: &str = "rasters";

/// Object key of the reference soil raster.
pub const SEN_SOC: &str = "SEN_soc.tif";

pub const OBJECT_REMOVED_DELETE: &str = "s3:ObjectRemoved:Delete";

/// Storage notification as posted by the object store webhook.
pub fn notification(event_name: &str, bucket: &str, key: &str) -> Value {
    json!({
        "EventName": event_name,
        "Key": format!("{bucket}/{key}"),
        "Records": [{
            "eventVersion": "2.0",
            "eventSource": "minio:s3",
            "eventName": event_name,
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key, "size": 1024 }
            }
        }]
    })
}

pub fn put_notification(key: &str) -> Value {
    notification(OBJECT_CREATED_PUT, BUCKET, key)
}

pub fn delete_notification(key: &str) -> Value {
    notification(OBJECT_REMOVED_DELETE, BUCKET, key)
}

/// Single-band 8-bit GeoTIFF with every pixel set to `value`, georeferenced
/// in WGS 84.
pub fn gray8_geotiff(width: u32, height: u32, value: u8) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
        let mut image = encoder.new_image::<colortype::Gray8>(width, height).unwrap();
        let dir = image.encoder();
        dir.write_tag(
            Tag::Unknown(tag::MODEL_TIEPOINT),
            &[0.0, 0.0, 0.0, -17.5, 16.7, 0.0][..],
        )
        .unwrap();
        dir.write_tag(Tag::Unknown(tag::MODEL_PIXEL_SCALE), &[0.01, 0.01, 0.0][..])
            .unwrap();
        let keys: [u16; 8] = [1, 1, 0, 1, 2048, 0, 1, 4326];
        dir.write_tag(Tag::Unknown(tag::GEO_KEY_DIRECTORY), &keys[..])
            .unwrap();
        image
            .write_data(&vec![value; (width * height) as usize])
            .unwrap();
    }
    cursor.into_inner()
}

/// The reference soil raster: one band, all zero.
pub fn sen_soc() -> Vec<u8> {
    gray8_geotiff(16, 12, 0)
}

/// Bytes that are not a TIFF.
pub fn corrupt_raster() -> Vec<u8> {
    b"II*\0definitely not a raster".to_vec()
}
