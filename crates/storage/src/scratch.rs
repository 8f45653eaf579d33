//! Local scratch files.

use pipeline_core::{Error, Result};
use std::path::Path;
use tempfile::NamedTempFile;

/// A downloaded object on local disk. The file is removed when this value
/// is dropped, whichever way processing ends.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
    size: u64,
}

impl ScratchFile {
    /// Creates an empty scratch file whose name ends with `suffix`.
    pub fn create(dir: Option<&Path>, suffix: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("georeport-").suffix(suffix);

        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::internal(format!("failed to create scratch file: {e}")))?;

        Ok(Self { file, size: 0 })
    }

    /// Creates a scratch file holding `bytes`.
    pub fn from_bytes(dir: Option<&Path>, suffix: &str, bytes: &[u8]) -> Result<Self> {
        use std::io::Write;

        let mut scratch = Self::create(dir, suffix)?;
        scratch
            .file
            .write_all(bytes)
            .and_then(|_| scratch.file.flush())
            .map_err(|e| Error::internal(format!("failed to write scratch file: {e}")))?;
        scratch.size = bytes.len() as u64;
        Ok(scratch)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Opens a second handle for async writing.
    pub(crate) fn reopen(&self) -> Result<tokio::fs::File> {
        self.file
            .reopen()
            .map(tokio::fs::File::from_std)
            .map_err(|e| Error::internal(format!("failed to open scratch file: {e}")))
    }
}

/// File-name suffix to keep for an object key, e.g. `.tif`.
pub fn suffix_for(key: &str) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 8 => {
            format!(".{ext}")
        }
        _ => String::new(),
    }
}
