//! Raster metadata record computed by the extraction stage.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raster format driver identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub short_name: String,
    pub long_name: String,
}

/// Pixel dimensions and band count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterSize {
    pub x_size: u32,
    pub y_size: u32,
    pub band_count: u32,
}

/// A pair of values on the principal axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisPair {
    pub x: f64,
    pub y: f64,
}

/// Affine geotransform reduced to origin and pixel size.
///
/// Rotation terms are not carried. Pixel size on the y axis is negative for
/// north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin: AxisPair,
    pub pixel_size: AxisPair,
}

impl GeoTransform {
    /// Builds from the six-element GDAL-ordered coefficient array.
    pub fn from_coefficients(coefficients: [f64; 6]) -> Self {
        Self {
            origin: AxisPair {
                x: coefficients[0],
                y: coefficients[3],
            },
            pixel_size: AxisPair {
                x: coefficients[1],
                y: coefficients[5],
            },
        }
    }
}

/// Exact descriptive statistics over all valid pixels of a band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

/// Per-band metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMetadata {
    /// 1-based band index
    pub band_number: u32,
    /// Sample type name (Byte, UInt16, Float32, ...)
    pub data_type: String,
    pub statistics: BandStatistics,
}

/// Descriptive metadata for one raster file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub driver: DriverInfo,
    pub size: RasterSize,
    /// Spatial reference string, empty when the raster has none
    #[serde(default)]
    pub projection: String,
    /// `None` when the raster defines no geotransform
    #[serde(default)]
    pub geotransform: Option<GeoTransform>,
    pub bands: Vec<BandMetadata>,
}

impl RasterMetadata {
    /// Checks the band list against the declared band count and numbering.
    pub fn validate(&self) -> Result<()> {
        if self.bands.len() != self.size.band_count as usize {
            return Err(Error::processing(format!(
                "band_count is {} but {} bands were described",
                self.size.band_count,
                self.bands.len()
            )));
        }

        for (index, band) in self.bands.iter().enumerate() {
            let expected = index as u32 + 1;
            if band.band_number != expected {
                return Err(Error::processing(format!(
                    "band at position {} is numbered {}",
                    expected, band.band_number
                )));
            }
        }

        Ok(())
    }
}
