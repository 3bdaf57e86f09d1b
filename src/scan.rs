//! Sequential archive scanning and entry content streaming
//!
//! There is no index in a tar file: every lookup is a linear walk over the
//! header records from the start, skipping each entry's padded content.
//! A walk stops at the first all-zero block or at physical end of file.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::tar::{BLOCK, BLOCK_SIZE, TarHeader, decode_header, is_empty_block};

/// Fills `buf` from the reader, returning fewer bytes only at end of file.
pub(crate) fn read_block<R: Read>(reader: &mut R, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads the header record at the current position.
///
/// Returns `None` at the end sentinel or at end of file; the stream is then
/// left positioned at the start of that block. Otherwise the stream is left
/// at the first content block and the header's own offset is returned.
pub fn read_header<R: Read + Seek>(archive: &mut R) -> Result<Option<(TarHeader, u64)>> {
    let offset = archive.stream_position()?;
    let mut block = [0u8; BLOCK_SIZE];
    let n = read_block(archive, &mut block)?;
    if n == 0 {
        if offset > 0 {
            warn!("archive ends at {:#x} without an end sentinel", offset);
        }
        return Ok(None);
    }
    if n < BLOCK_SIZE {
        return Err(Error::corrupt(offset, format!("short header block ({} bytes)", n)));
    }
    if is_empty_block(&block) {
        archive.seek(SeekFrom::Start(offset))?;
        return Ok(None);
    }
    let header = decode_header(&block, offset)?;
    trace!("header {:?} at {:#x}, {} bytes", header.name, offset, header.size);
    Ok(Some((header, offset)))
}

/// Advances past an entry's padded content to the next header position.
///
/// Must be called with the stream on the entry's first content block. Content
/// that runs past the end of the stream is reported against the header.
pub fn skip_content<R: Seek>(archive: &mut R, header: &TarHeader) -> Result<()> {
    let start = archive.stream_position()?;
    let header_offset = start.saturating_sub(BLOCK);
    let len = archive.seek(SeekFrom::End(0))?;
    let next = start
        .checked_add(header.padded_size())
        .filter(|&next| next <= len)
        .ok_or_else(|| Error::corrupt(header_offset, "entry content extends past end of file"))?;
    archive.seek(SeekFrom::Start(next))?;
    Ok(())
}

/// Iterator over the headers of an archive, in scan order
pub struct Entries<'a, R> {
    archive: &'a mut R,
    pending: Option<TarHeader>,
    done: bool,
}

impl<R: Read + Seek> Iterator for Entries<'_, R> {
    type Item = Result<(TarHeader, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(prev) = self.pending.take() {
            if let Err(e) = skip_content(self.archive, &prev) {
                self.done = true;
                return Some(Err(e));
            }
        }
        match read_header(self.archive) {
            Ok(Some((header, offset))) => {
                self.pending = Some(header.clone());
                Some(Ok((header, offset)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Rewinds the archive and iterates over its headers.
pub fn entries<R: Read + Seek>(archive: &mut R) -> Result<Entries<'_, R>> {
    archive.seek(SeekFrom::Start(0))?;
    Ok(Entries {
        archive,
        pending: None,
        done: false,
    })
}

/// Finds the first entry named exactly `name`.
///
/// On success the stream is positioned at the entry's first content block.
pub fn find_header<R: Read + Seek>(archive: &mut R, name: &str) -> Result<(TarHeader, u64)> {
    archive.seek(SeekFrom::Start(0))?;
    while let Some((header, offset)) = read_header(archive)? {
        if header.name == name {
            return Ok((header, offset));
        }
        skip_content(archive, &header)?;
    }
    Err(Error::not_found(name))
}

/// Moves to the end sentinel (or end of file) and returns its offset,
/// which is where a new trailing entry is written.
pub fn seek_end<R: Read + Seek>(archive: &mut R) -> Result<u64> {
    archive.seek(SeekFrom::Start(0))?;
    while let Some((header, _)) = read_header(archive)? {
        skip_content(archive, &header)?;
    }
    Ok(archive.stream_position()?)
}

/// Streams exactly `header.size` content bytes into `sink`, then skips the
/// block padding so the stream sits on the next header.
pub fn copy_entry_content<R: Read + Seek, W: Write + ?Sized>(
    archive: &mut R,
    header: &TarHeader,
    sink: &mut W,
) -> Result<u64> {
    let start = archive.stream_position()?;
    let mut content = Read::take(&mut *archive, header.size);
    let copied = io::copy(&mut content, sink)?;
    if copied < header.size {
        return Err(Error::corrupt(
            start,
            format!("entry {:?} truncated: {} of {} bytes", header.name, copied, header.size),
        ));
    }
    archive.seek(SeekFrom::Start(start + header.padded_size()))?;
    Ok(copied)
}
