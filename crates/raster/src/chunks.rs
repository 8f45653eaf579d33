//! Strip and tile decoding, one chunk at a time.
//!
//! The IFD is parsed by the `tiff` crate; sample data is read here so any
//! number of bands in either planar configuration can be summarised without
//! holding the image in memory. Supported: 8/16/32/64-bit samples, no
//! compression, LZW, Deflate and PackBits, horizontal and floating-point
//! predictors.

use crate::stats::BandAccumulator;
use flate2::read::ZlibDecoder;
use pipeline_core::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use tiff::decoder::{ChunkType, Decoder};
use tiff::tags::Tag;
use tiff::TiffError;

fn tag_error(err: TiffError) -> Error {
    Error::processing(format!("failed to read raster: {err}"))
}

/// Single unsigned tag value.
fn uint<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<u64>> {
    decoder.find_tag_unsigned(tag).map_err(tag_error)
}

/// Unsigned tag values, whether stored as one value or a list.
fn uint_list<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<Vec<u64>>> {
    let Some(value) = decoder.find_tag(tag).map_err(tag_error)? else {
        return Ok(None);
    };
    value
        .clone()
        .into_u64()
        .map(|single| vec![single])
        .or_else(|_| value.into_u64_vec())
        .map(Some)
        .map_err(tag_error)
}

/// Byte order of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Reads the order mark at the start of the file.
    pub fn from_header(header: [u8; 2]) -> Result<Self> {
        match &header {
            b"II" => Ok(Self::Little),
            b"MM" => Ok(Self::Big),
            _ => Err(Error::processing("failed to read raster: not a TIFF file")),
        }
    }

    fn read_uint(self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self {
            Self::Big => bytes.iter().fold(0, fold),
            Self::Little => bytes.iter().rev().fold(0, fold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    None,
    Lzw,
    Deflate,
    PackBits,
}

impl Codec {
    fn from_tag(code: u64) -> Result<Self> {
        match code {
            1 => Ok(Self::None),
            5 => Ok(Self::Lzw),
            8 | 32946 => Ok(Self::Deflate),
            32773 => Ok(Self::PackBits),
            other => Err(Error::processing(format!(
                "unsupported raster compression {other}"
            ))),
        }
    }

    /// Decompresses one chunk, producing at most `expected` bytes where the
    /// codec allows bounding the output.
    fn decompress(self, raw: Vec<u8>, expected: usize) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(raw),
            Self::Lzw => {
                let mut out = Vec::with_capacity(expected);
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                    .into_vec(&mut out)
                    .decode(&raw)
                    .status
                    .map_err(|e| Error::processing(format!("corrupt LZW chunk: {e}")))?;
                Ok(out)
            }
            Self::Deflate => {
                let mut out = Vec::with_capacity(expected);
                ZlibDecoder::new(raw.as_slice())
                    .take(expected as u64)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::processing(format!("corrupt Deflate chunk: {e}")))?;
                Ok(out)
            }
            Self::PackBits => unpack_bits(&raw, expected),
        }
    }
}

fn unpack_bits(raw: &[u8], expected: usize) -> Result<Vec<u8>> {
    let truncated = || Error::processing("truncated PackBits chunk");
    let mut out = Vec::with_capacity(expected);
    let mut i = 0;

    while i < raw.len() && out.len() < expected {
        let header = raw[i] as i8;
        i += 1;
        match header {
            0..=127 => {
                let end = i + header as usize + 1;
                out.extend_from_slice(raw.get(i..end).ok_or_else(truncated)?);
                i = end;
            }
            -127..=-1 => {
                let byte = *raw.get(i).ok_or_else(truncated)?;
                let run = (1 - i16::from(header)) as usize;
                out.resize(out.len() + run, byte);
                i += 1;
            }
            -128 => {}
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Unsigned,
    Signed,
    Float,
}

/// Part of the image a chunk covers.
#[derive(Debug, Clone, Copy)]
struct ChunkGeometry {
    /// Band of a planar chunk
    plane: usize,
    /// Pixel columns with data
    cols: usize,
    /// Rows with data
    rows: usize,
    /// Rows stored, padding included
    stored_rows: usize,
}

/// Where the samples of an image live and how they are encoded.
#[derive(Debug)]
pub struct ChunkLayout {
    width: usize,
    height: usize,
    bands: usize,
    planar: bool,
    tiled: bool,
    chunk_width: usize,
    chunk_height: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    codec: Codec,
    predictor: u64,
    sample_bytes: usize,
    kind: SampleKind,
    order: ByteOrder,
}

impl ChunkLayout {
    /// Reads the layout of the decoder's current image.
    pub fn read<R: Read + Seek>(decoder: &mut Decoder<R>, order: ByteOrder) -> Result<Self> {
        let (width, height) = decoder.dimensions().map_err(tag_error)?;
        let bands = uint(decoder, Tag::SamplesPerPixel)?.unwrap_or(1) as usize;
        if bands == 0 {
            return Err(Error::processing("raster declares zero bands"));
        }

        let bits = uint_list(decoder, Tag::BitsPerSample)?.unwrap_or_else(|| vec![1]);
        if bits.iter().any(|&b| b != bits[0]) {
            return Err(Error::processing(format!(
                "bands with different bit depths are not supported: {bits:?}"
            )));
        }
        let sample_bytes = match bits[0] {
            8 | 16 | 32 | 64 => bits[0] as usize / 8,
            other => {
                return Err(Error::processing(format!(
                    "{other}-bit samples are not supported"
                )))
            }
        };

        let format = uint_list(decoder, Tag::SampleFormat)?
            .and_then(|formats| formats.first().copied())
            .unwrap_or(1);
        let kind = match (format, sample_bytes) {
            (1, _) => SampleKind::Unsigned,
            (2, _) => SampleKind::Signed,
            (3, 4 | 8) => SampleKind::Float,
            (other, _) => {
                return Err(Error::processing(format!(
                    "sample format {other} with {}-bit samples is not supported",
                    sample_bytes * 8
                )))
            }
        };

        let predictor = uint(decoder, Tag::Predictor)?.unwrap_or(1);
        match (predictor, kind) {
            (1, _) | (2, SampleKind::Unsigned | SampleKind::Signed) | (3, SampleKind::Float) => {}
            (other, _) => {
                return Err(Error::processing(format!(
                    "predictor {other} does not apply to {kind:?} samples"
                )))
            }
        }

        let codec = Codec::from_tag(uint(decoder, Tag::Compression)?.unwrap_or(1))?;
        let planar = uint(decoder, Tag::PlanarConfiguration)?.unwrap_or(1) == 2;
        let tiled = matches!(decoder.get_chunk_type(), ChunkType::Tile);
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();

        let (offset_tag, count_tag) = if tiled {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let offsets = uint_list(decoder, offset_tag)?.unwrap_or_default();
        let byte_counts = uint_list(decoder, count_tag)?.unwrap_or_default();

        let planes = if planar { bands } else { 1 };
        if offsets.is_empty() || offsets.len() != byte_counts.len() || offsets.len() % planes != 0
        {
            return Err(Error::processing(format!(
                "raster has {} chunk offsets and {} byte counts for {planes} planes",
                offsets.len(),
                byte_counts.len()
            )));
        }

        Ok(Self {
            width: width as usize,
            height: height as usize,
            bands,
            planar,
            tiled,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
            offsets,
            byte_counts,
            codec,
            predictor,
            sample_bytes,
            kind,
            order,
        })
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn chunk_count(&self) -> usize {
        self.offsets.len()
    }

    /// GDAL-style name of the sample type.
    pub fn data_type(&self) -> &'static str {
        match (self.kind, self.sample_bytes) {
            (SampleKind::Unsigned, 1) => "Byte",
            (SampleKind::Signed, 1) => "Int8",
            (SampleKind::Unsigned, 2) => "UInt16",
            (SampleKind::Signed, 2) => "Int16",
            (SampleKind::Unsigned, 4) => "UInt32",
            (SampleKind::Signed, 4) => "Int32",
            (SampleKind::Unsigned, _) => "UInt64",
            (SampleKind::Signed, _) => "Int64",
            (SampleKind::Float, 4) => "Float32",
            (SampleKind::Float, _) => "Float64",
        }
    }

    fn samples_per_pixel(&self) -> usize {
        if self.planar {
            1
        } else {
            self.bands
        }
    }

    fn row_bytes(&self) -> usize {
        self.chunk_width * self.samples_per_pixel() * self.sample_bytes
    }

    fn geometry(&self, index: usize) -> ChunkGeometry {
        let planes = if self.planar { self.bands } else { 1 };
        let per_plane = self.offsets.len() / planes;
        let within = index % per_plane;
        let across = if self.tiled {
            self.width.div_ceil(self.chunk_width.max(1))
        } else {
            1
        };
        let (col, row) = (within % across, within / across);

        let rows = self
            .chunk_height
            .min(self.height.saturating_sub(row * self.chunk_height));
        ChunkGeometry {
            plane: index / per_plane,
            cols: self
                .chunk_width
                .min(self.width.saturating_sub(col * self.chunk_width)),
            rows,
            stored_rows: if self.tiled { self.chunk_height } else { rows },
        }
    }

    /// Decodes every chunk in file order into `bands`, one accumulator per
    /// band. Stops with a timeout error at the first chunk boundary after
    /// `abort` is set.
    pub fn accumulate(
        &self,
        file: &mut File,
        bands: &mut [BandAccumulator],
        abort: &AtomicBool,
    ) -> Result<()> {
        if bands.len() != self.bands {
            return Err(Error::internal(format!(
                "{} accumulators for {} bands",
                bands.len(),
                self.bands
            )));
        }

        let file_len = file
            .metadata()
            .map_err(|e| Error::processing(format!("failed to stat raster: {e}")))?
            .len();

        for index in 0..self.offsets.len() {
            if abort.load(Ordering::Relaxed) {
                return Err(Error::timeout("raster read abandoned past its deadline"));
            }

            let geometry = self.geometry(index);
            let raw = self.read_raw(file, file_len, index)?;
            let data = self
                .codec
                .decompress(raw, geometry.stored_rows * self.row_bytes())?;
            self.feed(index, geometry, data, bands)?;
        }
        Ok(())
    }

    fn read_raw(&self, file: &mut File, file_len: u64, index: usize) -> Result<Vec<u8>> {
        let (offset, len) = (self.offsets[index], self.byte_counts[index]);
        if offset.checked_add(len).map_or(true, |end| end > file_len) {
            return Err(Error::processing(format!(
                "chunk {index} lies outside the file"
            )));
        }

        let io_error = |e: std::io::Error| {
            Error::processing(format!("failed to read raster chunk {index}: {e}"))
        };
        file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        let mut raw = vec![0; len as usize];
        file.read_exact(&mut raw).map_err(io_error)?;
        Ok(raw)
    }

    fn feed(
        &self,
        index: usize,
        geometry: ChunkGeometry,
        mut data: Vec<u8>,
        bands: &mut [BandAccumulator],
    ) -> Result<()> {
        let row_bytes = self.row_bytes();
        let needed = geometry.rows * row_bytes;
        if data.len() < needed {
            return Err(Error::processing(format!(
                "chunk {index} decoded to {} bytes, expected {needed}",
                data.len()
            )));
        }

        for row in data[..needed].chunks_exact_mut(row_bytes) {
            self.feed_row(row, geometry, bands);
        }
        Ok(())
    }

    fn feed_row(&self, row: &mut [u8], geometry: ChunkGeometry, bands: &mut [BandAccumulator]) {
        let spp = self.samples_per_pixel();
        let used = geometry.cols * spp;
        let band_of = |i: usize| if self.planar { geometry.plane } else { i % spp };

        if self.predictor == 3 {
            // Byte planes, most significant first, differenced across the row.
            for i in spp..row.len() {
                row[i] = row[i].wrapping_add(row[i - spp]);
            }
            let stride = row.len() / self.sample_bytes;
            for i in 0..used {
                let bits = (0..self.sample_bytes)
                    .fold(0u64, |acc, b| (acc << 8) | u64::from(row[b * stride + i]));
                bands[band_of(i)].push(self.value(bits));
            }
            return;
        }

        let mut raw: Vec<u64> = row
            .chunks_exact(self.sample_bytes)
            .map(|b| self.order.read_uint(b))
            .collect();
        if self.predictor == 2 {
            let mask = match self.sample_bytes {
                8 => u64::MAX,
                n => (1u64 << (n * 8)) - 1,
            };
            for i in spp..raw.len() {
                raw[i] = raw[i].wrapping_add(raw[i - spp]) & mask;
            }
        }
        for (i, &bits) in raw.iter().take(used).enumerate() {
            bands[band_of(i)].push(self.value(bits));
        }
    }

    fn value(&self, bits: u64) -> f64 {
        match (self.kind, self.sample_bytes) {
            (SampleKind::Unsigned, _) => bits as f64,
            (SampleKind::Signed, 1) => f64::from(bits as u8 as i8),
            (SampleKind::Signed, 2) => f64::from(bits as u16 as i16),
            (SampleKind::Signed, 4) => f64::from(bits as u32 as i32),
            (SampleKind::Signed, _) => bits as i64 as f64,
            (SampleKind::Float, 4) => f64::from(f32::from_bits(bits as u32)),
            (SampleKind::Float, _) => f64::from_bits(bits),
        }
    }
}
