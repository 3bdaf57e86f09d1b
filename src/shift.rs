//! In-place byte region moves
//!
//! Growing or shrinking an entry means moving everything that follows it.
//! Both directions go through [`shift_region`], which copies through a
//! fixed-size buffer and picks the copy order so overlapping source and
//! destination ranges are never clobbered.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::debug;

use crate::error::Result;

/// Size of the intermediate buffer used for moves.
pub const SHIFT_BUFFER_SIZE: usize = 64 * 1024;

/// Direction in which a tail is shifted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards larger offsets, opening a gap
    Forward,
    /// Towards smaller offsets, closing a gap
    Backward,
}

fn copy_chunk<F: Read + Write + Seek>(file: &mut F, src: u64, dst: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(src))?;
    file.read_exact(buf)?;
    file.seek(SeekFrom::Start(dst))?;
    file.write_all(buf)
}

/// Moves `len` bytes starting at `from` so that they start at `to`.
pub fn shift_region<F: Read + Write + Seek>(file: &mut F, from: u64, len: u64, to: u64) -> Result<()> {
    shift_region_with(file, from, len, to, SHIFT_BUFFER_SIZE)
}

pub(crate) fn shift_region_with<F: Read + Write + Seek>(
    file: &mut F,
    from: u64,
    len: u64,
    to: u64,
    buf_size: usize,
) -> Result<()> {
    if from == to || len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; (buf_size as u64).min(len) as usize];
    let step = buf.len() as u64;
    if to > from {
        // largest offsets first
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(step);
            remaining -= chunk;
            copy_chunk(file, from + remaining, to + remaining, &mut buf[..chunk as usize])?;
        }
    } else {
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(step);
            copy_chunk(file, from + done, to + done, &mut buf[..chunk as usize])?;
            done += chunk;
        }
    }
    debug!("moved {} bytes from {:#x} to {:#x}", len, from, to);
    Ok(())
}

/// Shifts the bytes in `start..end` by `delta` and returns the new logical
/// end. After a backward shift the bytes past the returned end are stale;
/// the caller truncates.
pub fn shift_tail<F: Read + Write + Seek>(
    file: &mut F,
    start: u64,
    end: u64,
    direction: Direction,
    delta: u64,
) -> Result<u64> {
    let len = end.saturating_sub(start);
    let (to, new_end) = match direction {
        Direction::Forward => (start + delta, start + delta + len),
        Direction::Backward => {
            let to = start.checked_sub(delta).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "shift before start of file")
            })?;
            (to, to + len)
        }
    };
    shift_region(file, start, len, to)?;
    Ok(new_end)
}
