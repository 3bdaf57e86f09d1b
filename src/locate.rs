//! Entry classification inside an open archive
//!
//! A tar file has no directory tree, only names. A directory is either an
//! explicit `name/` entry or is implied by other entries whose names start
//! with `name/`. An archive may hold both `name` (a file) and `name/` (a
//! directory); [`Probe`] decides which one a bare `name` refers to.

use std::io::{Read, Seek};

use crate::error::{Error, Result};
use crate::scan::entries;
use crate::tar::TarHeader;

/// What an in-archive path names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
}

/// Which form of a bare name is looked up first when both may exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    DirectoryFirst,
    RegularFirst,
}

/// A classified entry. `header` is `None` for the archive root and for
/// directories implied only by the names of their children.
#[derive(Debug, Clone)]
pub struct Located {
    pub kind: EntryKind,
    pub header: Option<(TarHeader, u64)>,
}

pub(crate) fn is_dir_name(name: &str) -> bool {
    name.ends_with('/')
}

/// `dir` must end with `/`.
fn find_dir<R: Read + Seek>(archive: &mut R, dir: &str) -> Result<Located> {
    let bare = dir.trim_end_matches('/');
    let mut implied = false;
    for item in entries(archive)? {
        let (header, offset) = item?;
        if header.name == dir || (header.typeflag.is_dir() && header.name == bare) {
            return Ok(Located {
                kind: EntryKind::Directory,
                header: Some((header, offset)),
            });
        }
        implied |= header.name.starts_with(dir);
    }
    if implied {
        Ok(Located {
            kind: EntryKind::Directory,
            header: None,
        })
    } else {
        Err(Error::not_found(dir))
    }
}

fn find_regular<R: Read + Seek>(archive: &mut R, name: &str) -> Result<Located> {
    for item in entries(archive)? {
        let (header, offset) = item?;
        if header.name == name && !header.typeflag.is_dir() {
            return Ok(Located {
                kind: EntryKind::Regular,
                header: Some((header, offset)),
            });
        }
    }
    Err(Error::not_found(name))
}

/// Tries `first`, falling back to `second` only on a definite absence.
fn probe_both<R: Read + Seek>(
    archive: &mut R,
    first: impl FnOnce(&mut R) -> Result<Located>,
    second: impl FnOnce(&mut R) -> Result<Located>,
) -> Result<Located> {
    match first(&mut *archive) {
        Err(e) if e.is_not_found() => second(archive),
        other => other,
    }
}

/// Classifies `path` and returns the header backing it, if any.
pub fn locate<R: Read + Seek>(archive: &mut R, path: &str, probe: Probe) -> Result<Located> {
    if path.is_empty() {
        return Ok(Located {
            kind: EntryKind::Directory,
            header: None,
        });
    }
    if is_dir_name(path) {
        return match find_dir(archive, path) {
            Err(e) if e.is_not_found() => {
                match find_regular(archive, path.trim_end_matches('/')) {
                    Ok(_) => Err(Error::NotADirectory {
                        path: path.to_string(),
                    }),
                    Err(other) if other.is_not_found() => Err(e),
                    Err(other) => Err(other),
                }
            }
            other => other,
        };
    }
    let dir = format!("{}/", path);
    let located = match probe {
        Probe::DirectoryFirst => {
            probe_both(archive, |a| find_dir(a, &dir), |a| find_regular(a, path))
        }
        Probe::RegularFirst => {
            probe_both(archive, |a| find_regular(a, path), |a| find_dir(a, &dir))
        }
    };
    located.map_err(|e| if e.is_not_found() { Error::not_found(path) } else { e })
}

/// Classifies `path` as a regular file or a directory.
///
/// Absence is reported as [`Error::NotFound`]; a `name/` path whose bare
/// form exists as a file is [`Error::NotADirectory`].
pub fn type_of<R: Read + Seek>(archive: &mut R, path: &str, probe: Probe) -> Result<EntryKind> {
    locate(archive, path, probe).map(|l| l.kind)
}

/// Checks `mask` (a combination of `libc::R_OK`, `W_OK`, `X_OK`, or
/// `F_OK` alone) against the entry's stored mode for the current user.
pub fn access<R: Read + Seek>(archive: &mut R, path: &str, mask: libc::c_int) -> Result<()> {
    let located = locate(archive, path, Probe::DirectoryFirst)?;
    let Some((header, _)) = located.header else {
        return Ok(());
    };
    if mask == libc::F_OK {
        return Ok(());
    }
    let (euid, egid) = effective_ids();
    if permits(&header, mask, euid, egid) {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            path: path.to_string(),
        })
    }
}

/// Effective user and group id of the process
fn effective_ids() -> (u32, u32) {
    // SAFETY: geteuid and getegid cannot fail and touch no memory.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

fn permits(header: &TarHeader, mask: libc::c_int, euid: u32, egid: u32) -> bool {
    let mode = header.mode;
    if euid == 0 {
        return mask & libc::X_OK == 0 || mode & 0o111 != 0;
    }
    let bits = if euid == header.uid {
        (mode >> 6) & 7
    } else if egid == header.gid {
        (mode >> 3) & 7
    } else {
        mode & 7
    };
    let mut want = 0;
    if mask & libc::R_OK != 0 {
        want |= 4;
    }
    if mask & libc::W_OK != 0 {
        want |= 2;
    }
    if mask & libc::X_OK != 0 {
        want |= 1;
    }
    bits & want == want
}
