//! Synchronous GeoTIFF reading.

use crate::chunks::{ByteOrder, ChunkLayout};
use crate::geokeys::{tag, GeoKeyDirectory};
use crate::stats::BandAccumulator;
use pipeline_core::{
    BandMetadata, DriverInfo, Error, GeoTransform, RasterMetadata, RasterSize, Result,
};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::debug;

const DRIVER_SHORT_NAME: &str = "GTiff";
const DRIVER_LONG_NAME: &str = "GeoTIFF";

fn processing(err: TiffError) -> Error {
    Error::processing(format!("failed to read raster: {err}"))
}

/// Resolves a numeric tag to the decoder's own variant for it.
fn tag_of(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(tag_of(code))
        .and_then(|value| value.map(|v| v.into_f64_vec()).transpose())
        .map_err(processing)
}

fn ascii_tag<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<String>> {
    decoder
        .find_tag(tag_of(code))
        .and_then(|value| value.map(|v| v.into_string()).transpose())
        .map_err(processing)
}

/// Six-coefficient affine transform from the model tags, if any.
///
/// A full ModelTransformation matrix takes precedence over a
/// tiepoint/pixel-scale pair.
fn geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<GeoTransform>> {
    if let Some(m) = f64_tag(decoder, tag::MODEL_TRANSFORMATION)? {
        if m.len() >= 8 {
            return Ok(Some(GeoTransform::from_coefficients([
                m[3], m[0], m[1], m[7], m[4], m[5],
            ])));
        }
    }

    let tiepoint = f64_tag(decoder, tag::MODEL_TIEPOINT)?;
    let scale = f64_tag(decoder, tag::MODEL_PIXEL_SCALE)?;
    match (tiepoint, scale) {
        (Some(tp), Some(sc)) if tp.len() >= 6 && sc.len() >= 2 => {
            let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
            let (sx, sy) = (sc[0], sc[1]);
            Ok(Some(GeoTransform::from_coefficients([
                x - i * sx,
                sx,
                0.0,
                y + j * sy,
                0.0,
                -sy,
            ])))
        }
        _ => Ok(None),
    }
}

fn projection<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<String> {
    let directory = decoder
        .find_tag(tag_of(tag::GEO_KEY_DIRECTORY))
        .and_then(|value| value.map(|v| v.into_u16_vec()).transpose())
        .map_err(processing)?;
    let Some(directory) = directory.as_deref().and_then(GeoKeyDirectory::parse) else {
        return Ok(String::new());
    };

    let params = ascii_tag(decoder, tag::GEO_ASCII_PARAMS)?;
    Ok(directory.projection(params.as_deref()))
}

fn nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    Ok(ascii_tag(decoder, tag::GDAL_NODATA)?
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok()))
}

/// Reads metadata and exact statistics from a GeoTIFF on disk.
///
/// Fails with a processing error when the file is not a readable TIFF or a
/// band has no valid pixels.
pub fn read_metadata(path: &Path) -> Result<RasterMetadata> {
    read_metadata_with_abort(path, &AtomicBool::new(false))
}

/// [`read_metadata`], giving up with a timeout error at the next chunk once
/// `abort` is set.
pub fn read_metadata_with_abort(path: &Path, abort: &AtomicBool) -> Result<RasterMetadata> {
    let open = || {
        File::open(path)
            .map_err(|e| Error::processing(format!("failed to open {}: {e}", path.display())))
    };

    let mut samples = open()?;
    let mut header = [0u8; 2];
    samples
        .read_exact(&mut header)
        .map_err(|e| Error::processing(format!("failed to read raster: {e}")))?;
    let order = ByteOrder::from_header(header)?;

    let mut decoder = Decoder::new(BufReader::new(open()?)).map_err(processing)?;
    let (width, height) = decoder.dimensions().map_err(processing)?;
    let layout = ChunkLayout::read(&mut decoder, order)?;

    let projection = projection(&mut decoder)?;
    let geotransform = geotransform(&mut decoder)?;
    let nodata = nodata(&mut decoder)?;

    let mut accumulators = vec![BandAccumulator::new(nodata); layout.bands()];
    layout.accumulate(&mut samples, &mut accumulators, abort)?;

    let data_type = layout.data_type();
    let bands = accumulators
        .iter()
        .zip(1u32..)
        .map(|(acc, band_number)| {
            Ok(BandMetadata {
                band_number,
                data_type: data_type.to_string(),
                statistics: acc.finish(band_number)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let band_count = bands.len() as u32;

    let metadata = RasterMetadata {
        driver: DriverInfo {
            short_name: DRIVER_SHORT_NAME.to_string(),
            long_name: DRIVER_LONG_NAME.to_string(),
        },
        size: RasterSize {
            x_size: width,
            y_size: height,
            band_count,
        },
        projection,
        geotransform,
        bands,
    };
    metadata.validate()?;

    debug!(
        path = %path.display(),
        width = width,
        height = height,
        bands = band_count,
        chunks = layout.chunk_count(),
        data_type = data_type,
        "Computed raster metadata"
    );
    Ok(metadata)
}
