//! GeoTIFF tag numbers and GeoKey directory parsing.

/// GeoTIFF and GDAL private TIFF tags.
pub mod tag {
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
    pub const GDAL_NODATA: u16 = 42113;
}

/// GeoKey ids used to name the spatial reference.
pub mod key {
    pub const GT_CITATION: u16 = 1026;
    pub const GEOGRAPHIC_TYPE: u16 = 2048;
    pub const GEOG_CITATION: u16 = 2049;
    pub const PROJECTED_CS_TYPE: u16 = 3072;
    pub const PCS_CITATION: u16 = 3073;
}

const USER_DEFINED: u16 = 32767;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GeoKeyEntry {
    id: u16,
    location: u16,
    count: u16,
    value: u16,
}

/// Parsed GeoKeyDirectoryTag.
#[derive(Debug, Clone, Default)]
pub struct GeoKeyDirectory {
    entries: Vec<GeoKeyEntry>,
}

impl GeoKeyDirectory {
    /// Parses the directory: a four-short header whose last value is the
    /// key count, followed by one four-short entry per key.
    pub fn parse(raw: &[u16]) -> Option<Self> {
        let (header, body) = raw.split_at_checked(4)?;
        let declared = usize::from(header[3]);

        let entries: Vec<_> = body
            .chunks_exact(4)
            .take(declared)
            .map(|e| GeoKeyEntry {
                id: e[0],
                location: e[1],
                count: e[2],
                value: e[3],
            })
            .collect();

        (entries.len() == declared).then_some(Self { entries })
    }

    fn entry(&self, id: u16) -> Option<&GeoKeyEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// A SHORT key stored inline in the directory.
    pub fn short(&self, id: u16) -> Option<u16> {
        self.entry(id)
            .filter(|e| e.location == 0)
            .map(|e| e.value)
    }

    /// An ASCII key stored in GeoAsciiParamsTag, without its `|` terminator.
    pub fn ascii(&self, id: u16, params: &str) -> Option<String> {
        let e = self.entry(id).filter(|e| e.location == tag::GEO_ASCII_PARAMS)?;
        let start = usize::from(e.value);
        let end = start + usize::from(e.count);

        let text = params.get(start..end.min(params.len()))?;
        let text = text.trim_end_matches(['|', '\0']).trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Spatial reference as `EPSG:<code>` when a registered code is present,
    /// otherwise the best available citation, otherwise empty.
    pub fn projection(&self, ascii_params: Option<&str>) -> String {
        let registered = |id| {
            self.short(id)
                .filter(|&code| code != 0 && code != USER_DEFINED)
                .map(|code| format!("EPSG:{code}"))
        };

        registered(key::PROJECTED_CS_TYPE)
            .or_else(|| registered(key::GEOGRAPHIC_TYPE))
            .or_else(|| {
                let params = ascii_params?;
                [key::PCS_CITATION, key::GT_CITATION, key::GEOG_CITATION]
                    .into_iter()
                    .find_map(|id| self.ascii(id, params))
            })
            .unwrap_or_default()
    }
}
