//! Raster metadata extraction.
//!
//! Reads a GeoTIFF from local disk and produces a [`RasterMetadata`] record:
//! driver identity, dimensions, spatial reference, geotransform, and exact
//! per-band statistics over every valid pixel. Samples are decoded one
//! strip or tile at a time.
//!
//! [`RasterMetadata`]: pipeline_core::RasterMetadata

pub mod chunks;
pub mod computer;
pub mod geokeys;
pub mod reader;
pub mod stats;

pub use computer::{GeoTiffComputer, MetadataComputer};
pub use reader::{read_metadata, read_metadata_with_abort};
pub use stats::BandAccumulator;
