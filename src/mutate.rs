//! In-place archive mutation
//!
//! New entries go where the end sentinel was, followed by a fresh sentinel.
//! Growing or removing an entry shifts everything after it by whole blocks
//! through [`shift_tail`], so every other entry stays byte-identical.
//!
//! Nothing here is transactional. An I/O error part way through aborts the
//! call and leaves the archive as far as it got.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::locate::{EntryKind, Probe, is_dir_name, locate};
use crate::scan::{entries, find_header, read_block, seek_end};
use crate::shift::{Direction, shift_tail};
use crate::tar::{BLOCK, BLOCK_SIZE, EntryType, TarHeader, padded};

/// Storage that can be cut down to a given length
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

fn check_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('/') {
        return Err(Error::InvalidPath {
            path: name.to_string(),
        });
    }
    Ok(())
}

/// Writes `header` and `header.size` bytes of `content` as a new trailing
/// entry, then a new end sentinel. Returns the header offset.
pub fn add_entry<F, R>(archive: &mut F, header: &TarHeader, content: &mut R) -> Result<u64>
where
    F: Read + Write + Seek,
    R: Read,
{
    check_entry_name(&header.name)?;
    let block = header.to_bytes()?;
    let offset = seek_end(archive)?;
    archive.seek(SeekFrom::Start(offset))?;
    archive.write_all(&block)?;

    let mut source = content.take(header.size);
    let mut buf = [0u8; BLOCK_SIZE];
    let mut written = 0u64;
    loop {
        let n = read_block(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }
        buf[n..].fill(0);
        archive.write_all(&buf)?;
        written += n as u64;
        if n < BLOCK_SIZE {
            break;
        }
    }
    if written != header.size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source for {:?} ended after {} of {} bytes", header.name, written, header.size),
        )
        .into());
    }
    archive.write_all(&[0u8; 2 * BLOCK_SIZE])?;
    archive.flush()?;
    debug!("added {:?} at {:#x}, {} bytes", header.name, offset, header.size);
    Ok(offset)
}

/// Appends the file at `source` to the archive as `entry_name`.
///
/// Symlinks are stored as links and are not followed. Only regular files
/// carry content.
pub fn add_file<F>(archive: &mut F, source: &Path, entry_name: &str) -> Result<u64>
where
    F: Read + Write + Seek,
{
    let meta = fs::symlink_metadata(source)?;
    let mut header = TarHeader::from_metadata(entry_name, &meta);
    match header.typeflag {
        EntryType::Regular => {
            let mut file = File::open(source)?;
            add_entry(archive, &header, &mut file)
        }
        EntryType::Symlink => {
            header.linkname = fs::read_link(source)?.to_string_lossy().into_owned();
            add_entry(archive, &header, &mut io::empty())
        }
        _ => add_entry(archive, &header, &mut io::empty()),
    }
}

/// Appends everything from the current position of `source` to the end of
/// the regular entry `name`, shifting all following entries by whole blocks.
/// Returns the entry's new size.
pub fn append_to_file<F, S>(archive: &mut F, name: &str, source: &mut S) -> Result<u64>
where
    F: Read + Write + Seek,
    S: Read + Seek,
{
    if name.is_empty() || is_dir_name(name) {
        return Err(Error::IsADirectory {
            path: name.to_string(),
        });
    }
    let (mut header, offset) = match find_header(archive, name) {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            // only `name/` or entries below it may exist
            return Err(match locate(archive, name, Probe::DirectoryFirst) {
                Ok(located) if located.kind == EntryKind::Directory => Error::IsADirectory {
                    path: name.to_string(),
                },
                Ok(_) => e,
                Err(other) if other.is_not_found() => e,
                Err(other) => other,
            });
        }
        Err(e) => return Err(e),
    };
    if header.typeflag.is_dir() {
        return Err(Error::IsADirectory {
            path: name.to_string(),
        });
    }
    if !header.typeflag.is_regular() {
        return Err(Error::NotARegularFile {
            path: name.to_string(),
        });
    }

    let src_start = source.stream_position()?;
    let src_end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(src_start))?;
    let extra = src_end.saturating_sub(src_start);

    let content = offset + BLOCK;
    let old_size = header.size;
    let new_size = old_size + extra;
    let old_end = content + padded(old_size);
    let new_end = content + padded(new_size);

    header.size = new_size;
    header.touch();
    // encode first: a size that does not fit must fail before anything moves
    let block = header.to_bytes()?;

    if new_end > old_end {
        let file_end = archive.seek(SeekFrom::End(0))?;
        debug!(
            "growing {:?} from {} to {} bytes, shifting {:#x}..{:#x} by {}",
            name,
            old_size,
            new_size,
            old_end,
            file_end,
            new_end - old_end
        );
        shift_tail(archive, old_end, file_end, Direction::Forward, new_end - old_end)?;
    }

    archive.seek(SeekFrom::Start(content + old_size))?;
    let copied = io::copy(&mut source.take(extra), archive)?;
    if copied != extra {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source ended after {} of {} bytes", copied, extra),
        )
        .into());
    }
    let pad = (new_end - content - new_size) as usize;
    archive.write_all(&vec![0u8; pad])?;

    archive.seek(SeekFrom::Start(offset))?;
    archive.write_all(&block)?;
    archive.flush()?;
    Ok(new_size)
}

/// Byte range of one or more adjacent entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u64,
    len: u64,
}

fn push_span(spans: &mut Vec<Span>, header: &TarHeader, offset: u64) {
    let len = BLOCK + header.padded_size();
    match spans.last_mut() {
        Some(last) if last.start + last.len == offset => last.len += len,
        _ => spans.push(Span { start: offset, len }),
    }
}

/// Removes the entry `name`. A directory needs `recursive`, which removes
/// the directory entry and every entry below it. Returns the removed names
/// in archive order.
pub fn remove_entry<F>(archive: &mut F, name: &str, recursive: bool) -> Result<Vec<String>>
where
    F: Read + Write + Seek + Truncate,
{
    if name.is_empty() {
        return Err(Error::IsADirectory {
            path: name.to_string(),
        });
    }
    let located = locate(archive, name, Probe::DirectoryFirst)?;
    let mut spans = Vec::new();
    let mut removed = Vec::new();
    match (located.kind, located.header) {
        (EntryKind::Regular, Some((header, offset))) => {
            push_span(&mut spans, &header, offset);
            removed.push(header.name);
        }
        (EntryKind::Directory, _) if !recursive => {
            return Err(Error::IsADirectory {
                path: name.to_string(),
            });
        }
        _ => {
            let dir = format!("{}/", name.trim_end_matches('/'));
            let bare = &dir[..dir.len() - 1];
            for item in entries(archive)? {
                let (header, offset) = item?;
                let is_dir_entry = header.typeflag.is_dir() && header.name == bare;
                if is_dir_entry || header.name.starts_with(&dir) {
                    push_span(&mut spans, &header, offset);
                    removed.push(header.name);
                }
            }
        }
    }

    let mut end = archive.seek(SeekFrom::End(0))?;
    for span in spans.iter().rev() {
        let tail = span.start + span.len;
        debug!("removing {:#x}..{:#x}", span.start, tail);
        end = shift_tail(archive, tail, end, Direction::Backward, span.len)?;
    }
    archive.truncate(end)?;
    archive.flush()?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::copy_entry_content;
    use crate::tar::is_empty_block;

    fn empty_archive() -> Cursor<Vec<u8>> {
        Cursor::new(vec![0u8; 2 * BLOCK_SIZE])
    }

    fn add_bytes(archive: &mut Cursor<Vec<u8>>, name: &str, content: &[u8]) -> u64 {
        let header = TarHeader::new(name.to_string(), 0o644, content.len() as u64);
        add_entry(archive, &header, &mut &content[..]).unwrap()
    }

    fn add_bytes_result(archive: &mut Cursor<Vec<u8>>, name: &str, content: &[u8]) -> Result<u64> {
        let header = TarHeader::new(name.to_string(), 0o644, content.len() as u64);
        add_entry(archive, &header, &mut &content[..])
    }

    fn read_entry(archive: &mut Cursor<Vec<u8>>, name: &str) -> Vec<u8> {
        let (header, _) = find_header(archive, name).unwrap();
        let mut out = Vec::new();
        copy_entry_content(archive, &header, &mut out).unwrap();
        out
    }

    fn names(archive: &mut Cursor<Vec<u8>>) -> Vec<String> {
        entries(archive)
            .unwrap()
            .map(|r| r.unwrap().0.name)
            .collect()
    }

    fn assert_terminated(archive: &mut Cursor<Vec<u8>>) {
        let end = seek_end(archive).unwrap() as usize;
        let data = archive.get_ref();
        assert!(data.len() >= end + 2 * BLOCK_SIZE);
        assert!(is_empty_block(&data[end..]));
    }

    #[test]
    fn add_writes_sentinel() {
        let mut a = empty_archive();
        assert_eq!(add_bytes(&mut a, "one.txt", b"hello"), 0);
        assert_eq!(add_bytes(&mut a, "two.txt", &[9u8; 700]), 2 * BLOCK);
        assert_eq!(a.get_ref().len(), 7 * BLOCK_SIZE);
        assert_eq!(read_entry(&mut a, "two.txt"), vec![9u8; 700]);
        assert_terminated(&mut a);
    }

    #[test]
    fn add_to_zero_length_file() {
        let mut a = Cursor::new(Vec::new());
        add_bytes(&mut a, "first", b"abc");
        assert_eq!(read_entry(&mut a, "first"), b"abc");
        assert_terminated(&mut a);
    }

    #[test]
    fn add_rejects_short_source() {
        let mut a = empty_archive();
        let header = TarHeader::new("liar".to_string(), 0o644, 100);
        let err = add_entry(&mut a, &header, &mut &b"tiny"[..]).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn append_shifts_following_entries() {
        let mut a = empty_archive();
        add_bytes(&mut a, "docs/readme.txt", b"hello world!");
        add_bytes(&mut a, "next.txt", b"after");
        let before = a.get_ref()[2 * BLOCK_SIZE..4 * BLOCK_SIZE].to_vec();

        let new_size = append_to_file(&mut a, "docs/readme.txt", &mut Cursor::new(vec![b'!'; 508])).unwrap();
        assert_eq!(new_size, 520);
        let (_, offset) = find_header(&mut a, "next.txt").unwrap();
        assert_eq!(offset, 3 * BLOCK);
        assert_eq!(&a.get_ref()[3 * BLOCK_SIZE..5 * BLOCK_SIZE], &before[..]);

        let mut expected = b"hello world!".to_vec();
        expected.extend_from_slice(&[b'!'; 508]);
        assert_eq!(read_entry(&mut a, "docs/readme.txt"), expected);
        assert_terminated(&mut a);
    }

    #[test]
    fn append_within_padding_moves_nothing() {
        let mut a = empty_archive();
        add_bytes(&mut a, "a", b"12345");
        add_bytes(&mut a, "b", b"x");
        let len = a.get_ref().len();
        append_to_file(&mut a, "a", &mut Cursor::new(b"678".to_vec())).unwrap();
        assert_eq!(a.get_ref().len(), len);
        assert_eq!(read_entry(&mut a, "a"), b"12345678");
        assert_eq!(read_entry(&mut a, "b"), b"x");
    }

    #[test]
    fn append_reads_from_current_source_position() {
        let mut a = empty_archive();
        add_bytes(&mut a, "log", b"");
        let mut src = Cursor::new(b"skip:keep".to_vec());
        src.set_position(5);
        assert_eq!(append_to_file(&mut a, "log", &mut src).unwrap(), 4);
        assert_eq!(read_entry(&mut a, "log"), b"keep");
    }

    #[test]
    fn append_to_directory_fails() {
        let mut a = empty_archive();
        let mut header = TarHeader::new("dir/".to_string(), 0o755, 0);
        header.typeflag = EntryType::Directory;
        add_entry(&mut a, &header, &mut io::empty()).unwrap();
        let mut src = Cursor::new(b"x".to_vec());
        assert!(matches!(append_to_file(&mut a, "dir/", &mut src), Err(Error::IsADirectory { .. })));
        assert!(append_to_file(&mut a, "missing", &mut src).unwrap_err().is_not_found());
    }

    #[test]
    fn append_to_implied_or_slashed_directory_fails() {
        let mut a = empty_archive();
        let mut header = TarHeader::new("docs/".to_string(), 0o755, 0);
        header.typeflag = EntryType::Directory;
        add_entry(&mut a, &header, &mut io::empty()).unwrap();
        add_bytes(&mut a, "src/lib.rs", b"fn");
        let before = a.get_ref().clone();

        let mut src = Cursor::new(b"x".to_vec());
        assert!(matches!(append_to_file(&mut a, "docs", &mut src), Err(Error::IsADirectory { .. })));
        assert!(matches!(append_to_file(&mut a, "src", &mut src), Err(Error::IsADirectory { .. })));
        assert!(append_to_file(&mut a, "sr", &mut src).unwrap_err().is_not_found());
        assert_eq!(a.get_ref(), &before);
    }

    #[test]
    fn append_to_symlink_fails() {
        let mut a = empty_archive();
        let mut header = TarHeader::new("link".to_string(), 0o777, 0);
        header.typeflag = EntryType::Symlink;
        header.linkname = "target".to_string();
        add_entry(&mut a, &header, &mut io::empty()).unwrap();
        let mut src = Cursor::new(b"x".to_vec());
        match append_to_file(&mut a, "link", &mut src) {
            Err(Error::NotARegularFile { path }) => assert_eq!(path, "link"),
            other => panic!("expected NotARegularFile, got {:?}", other),
        }
    }

    #[test]
    fn add_refuses_truncated_archive() {
        let header = TarHeader::new("cut.bin".to_string(), 0o644, 1000);
        let mut data = header.to_bytes().unwrap().to_vec();
        data.extend_from_slice(&[1u8; 100]);
        let mut a = Cursor::new(data);

        let err = add_bytes_result(&mut a, "new.txt", b"new");
        assert!(matches!(err, Err(Error::Corrupt { offset: 0, .. })));
        assert_eq!(a.get_ref().len(), BLOCK_SIZE + 100);
    }

    #[test]
    fn remove_collapses_entry() {
        let mut a = empty_archive();
        add_bytes(&mut a, "a", b"first");
        add_bytes(&mut a, "b", &[2u8; 1000]);
        add_bytes(&mut a, "c", b"third");
        let removed = remove_entry(&mut a, "b", false).unwrap();
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(names(&mut a), vec!["a", "c"]);
        assert_eq!(read_entry(&mut a, "c"), b"third");
        assert_eq!(a.get_ref().len(), 6 * BLOCK_SIZE);
        assert_terminated(&mut a);
    }

    #[test]
    fn remove_directory_needs_recursive() {
        let mut a = empty_archive();
        let mut header = TarHeader::new("d/".to_string(), 0o755, 0);
        header.typeflag = EntryType::Directory;
        add_entry(&mut a, &header, &mut io::empty()).unwrap();
        add_bytes(&mut a, "d/x", b"x");
        add_bytes(&mut a, "keep", b"k");
        add_bytes(&mut a, "d/y", b"y");
        add_bytes(&mut a, "dz", b"z");

        assert!(matches!(remove_entry(&mut a, "d", false), Err(Error::IsADirectory { .. })));
        let removed = remove_entry(&mut a, "d", true).unwrap();
        assert_eq!(removed, vec!["d/", "d/x", "d/y"]);
        assert_eq!(names(&mut a), vec!["keep", "dz"]);
        assert_eq!(read_entry(&mut a, "dz"), b"z");
        assert_terminated(&mut a);
    }

    #[test]
    fn remove_implied_directory() {
        let mut a = empty_archive();
        add_bytes(&mut a, "src/a.rs", b"a");
        add_bytes(&mut a, "src/b.rs", b"b");
        assert_eq!(remove_entry(&mut a, "src/", true).unwrap().len(), 2);
        assert!(names(&mut a).is_empty());
        assert_eq!(a.get_ref().len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn remove_missing_entry() {
        let mut a = empty_archive();
        assert!(remove_entry(&mut a, "ghost", true).unwrap_err().is_not_found());
        assert!(matches!(remove_entry(&mut a, "", true), Err(Error::IsADirectory { .. })));
    }
}
