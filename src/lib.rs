//! Transparent path access into tar archives
//!
//! Ordinary absolute paths may cross into a tar archive as if the archive
//! were a directory: `/home/user/a.tar/docs/readme.txt` names the entry
//! `docs/readme.txt` inside `/home/user/a.tar`. Entries can be read, added,
//! appended to and removed in place, without rewriting the whole archive.
//!
//! # Usage
//!
//! ## Resolving a path
//!
//! ```rust,no_run
//! use tar_overlay::resolve;
//!
//! let resolved = resolve("a.tar/docs/./readme.txt").unwrap();
//! if let (Some(archive), Some(entry)) = (resolved.archive(), resolved.in_archive()) {
//!     println!("{} inside {}", entry, archive);
//! }
//! ```
//!
//! ## Reading and mutating entries
//!
//! ```rust,no_run
//! use tar_overlay::{add_as, append, remove, stream_out, type_of, EntryKind, Probe};
//! use std::io::Cursor;
//!
//! add_as("archive.tar", "notes.txt", "docs/notes.txt").unwrap();
//! append("archive.tar", "docs/notes.txt", &mut Cursor::new(b"more\n".to_vec())).unwrap();
//!
//! assert_eq!(type_of("archive.tar", "docs", Probe::DirectoryFirst).unwrap(), EntryKind::Directory);
//! stream_out("archive.tar", "docs/notes.txt", &mut std::io::stdout()).unwrap();
//!
//! remove("archive.tar", "docs", true).unwrap();
//! ```
//!
//! ## Listing entries
//!
//! ```rust,no_run
//! use tar_overlay::list;
//!
//! match list("archive.tar") {
//!     Ok(headers) => {
//!         for header in headers {
//!             println!("  {} ({} bytes)", header.name, header.size);
//!         }
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

pub mod archive;
pub mod error;
pub mod locate;
pub mod mutate;
pub mod path;
pub mod scan;
pub mod shift;
pub mod tar;

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub use error::{Error, Result};
pub use locate::{EntryKind, Probe};
pub use path::{ResolveContext, ResolvedPath};
pub use tar::{EntryType, TarHeader};

use crate::archive::{open_read, open_write};
use crate::tar::BLOCK;

/// Resolves `path` against the process working directory.
pub fn resolve(path: &str) -> Result<ResolvedPath> {
    ResolveContext::from_env()?.resolve(path)
}

/// Classifies `entry` inside the archive at `archive_path`.
pub fn type_of(archive_path: &str, entry: &str, probe: Probe) -> Result<EntryKind> {
    let mut reader = open_read(Path::new(archive_path))?;
    locate::type_of(&mut reader, entry, probe)
}

/// Adds the file at `source_path` under its own file name.
pub fn add(archive_path: &str, source_path: &str) -> Result<()> {
    let name = Path::new(source_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath {
            path: source_path.to_string(),
        })?;
    add_as(archive_path, source_path, &name)
}

/// Adds the file at `source_path` as `entry`.
pub fn add_as(archive_path: &str, source_path: &str, entry: &str) -> Result<()> {
    let mut file = open_write(Path::new(archive_path))?;
    mutate::add_file(&mut file, Path::new(source_path), entry)?;
    Ok(())
}

/// Appends the rest of `source` to the regular entry `entry`. Returns the
/// entry's new size.
pub fn append<S: Read + Seek>(archive_path: &str, entry: &str, source: &mut S) -> Result<u64> {
    let mut file = open_write(Path::new(archive_path))?;
    mutate::append_to_file(&mut file, entry, source)
}

/// Removes `entry`; directories need `recursive`. Returns the removed names.
pub fn remove(archive_path: &str, entry: &str, recursive: bool) -> Result<Vec<String>> {
    let mut file = open_write(Path::new(archive_path))?;
    mutate::remove_entry(&mut file, entry, recursive)
}

/// Copies the content of the regular entry `entry` into `sink`.
pub fn stream_out<W: Write + ?Sized>(archive_path: &str, entry: &str, sink: &mut W) -> Result<u64> {
    let mut reader = open_read(Path::new(archive_path))?;
    let located = locate::locate(&mut reader, entry, Probe::RegularFirst)?;
    match (located.kind, located.header) {
        (EntryKind::Regular, Some((header, offset))) => {
            reader.seek(SeekFrom::Start(offset + BLOCK))?;
            scan::copy_entry_content(&mut reader, &header, sink)
        }
        _ => Err(Error::IsADirectory {
            path: entry.to_string(),
        }),
    }
}

/// Checks `mask` (`libc::F_OK` or a combination of `R_OK`, `W_OK`,
/// `X_OK`) for `entry`.
pub fn access(archive_path: &str, entry: &str, mask: libc::c_int) -> Result<()> {
    let mut reader = open_read(Path::new(archive_path))?;
    locate::access(&mut reader, entry, mask)
}

/// Lists every header in scan order
pub fn list(archive_path: &str) -> Result<Vec<TarHeader>> {
    let mut reader = open_read(Path::new(archive_path))?;
    let headers = scan::entries(&mut reader)?
        .map(|item| item.map(|(header, _)| header))
        .collect::<Result<Vec<_>>>()?;
    Ok(headers)
}
