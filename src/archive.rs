//! Opening archive files
//!
//! Plain `.tar` files are read and mutated through their file handle.
//! Gzip-compressed archives are inflated into memory and are read-only.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{Error, Result};

/// How an archive file is stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Plain,
    Gzip,
}

impl ArchiveFormat {
    /// Detects the format from the file name, `None` if it is not an archive name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::Gzip)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Plain)
        } else {
            None
        }
    }
}

/// A seekable byte stream over an archive's uncompressed tar data
#[derive(Debug)]
pub enum ArchiveReader {
    Plain(File),
    Gzip(Cursor<Vec<u8>>),
}

impl Read for ArchiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArchiveReader::Plain(f) => f.read(buf),
            ArchiveReader::Gzip(c) => c.read(buf),
        }
    }
}

impl Seek for ArchiveReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ArchiveReader::Plain(f) => f.seek(pos),
            ArchiveReader::Gzip(c) => c.seek(pos),
        }
    }
}

/// Opens an archive for reading. Compressed archives are inflated up front.
pub fn open_read(path: &Path) -> Result<ArchiveReader> {
    match ArchiveFormat::detect(path) {
        Some(ArchiveFormat::Gzip) => {
            let file_data = fs::read(path)?;
            let mut decoder = GzDecoder::new(&file_data[..]);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(ArchiveReader::Gzip(Cursor::new(decompressed)))
        }
        _ => Ok(ArchiveReader::Plain(File::open(path)?)),
    }
}

/// Opens a plain archive for in-place mutation.
pub fn open_write(path: &Path) -> Result<File> {
    if ArchiveFormat::detect(path) == Some(ArchiveFormat::Gzip) {
        return Err(Error::ReadOnly {
            path: path.display().to_string(),
        });
    }
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}
