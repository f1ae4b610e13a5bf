//! Source archive formats and extraction.
//!
//! The set of supported formats is closed. A file name is matched against
//! the suffixes in [`ArchiveFormat::ALL`] order; the extracted directory is
//! expected to be the file name minus that suffix (the sdist convention).

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

/// Errors that can occur while unpacking an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The file name matches none of the supported suffixes.
    #[error("could not extract {0}: unsupported archive format")]
    Unsupported(String),

    /// Failed to read a zip archive.
    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while reading or unpacking.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A supported archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zip`
    Zip,
    /// `.tar.gz`
    TarGz,
    /// `.tgz`
    Tgz,
}

impl ArchiveFormat {
    /// Every supported format, in matching order.
    pub const ALL: [ArchiveFormat; 3] = [
        ArchiveFormat::Zip,
        ArchiveFormat::TarGz,
        ArchiveFormat::Tgz,
    ];

    /// File name suffix of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::Tgz => ".tgz",
        }
    }

    /// Finds the format of `basename` by suffix.
    ///
    /// # Example
    ///
    /// ```
    /// use plugincompat::package::ArchiveFormat;
    ///
    /// assert_eq!(ArchiveFormat::detect("pytest-foo-1.0.tar.gz"), Some(ArchiveFormat::TarGz));
    /// assert_eq!(ArchiveFormat::detect("pytest-foo-1.0.tar.bz2"), None);
    /// ```
    pub fn detect(basename: &str) -> Option<ArchiveFormat> {
        Self::ALL
            .into_iter()
            .find(|format| basename.ends_with(format.extension()))
    }

    /// `basename` without this format's suffix.
    pub fn strip<'a>(&self, basename: &'a str) -> &'a str {
        basename
            .strip_suffix(self.extension())
            .unwrap_or(basename)
    }
}

/// Extracts `archive` into `dest` and returns the unpacked source directory.
///
/// The returned path is `dest` joined with the archive's file name minus its
/// suffix. This is blocking; async callers should run it on the blocking
/// pool.
///
/// # Errors
///
/// [`ArchiveError::Unsupported`] if the file name has no supported suffix,
/// otherwise any error from reading or unpacking the archive.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    let basename = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&basename)
        .ok_or_else(|| ArchiveError::Unsupported(basename.clone()))?;

    debug!("Extracting {} into {}", archive.display(), dest.display());

    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file)?;
            zip.extract(dest)?;
        }
        ArchiveFormat::TarGz | ArchiveFormat::Tgz => {
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(dest)?;
        }
    }

    Ok(dest.join(format.strip(&basename)))
}
