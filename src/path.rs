//! Path canonicalization across archive boundaries
//!
//! An absolute path such as `/home/user/a.tar/docs/readme.txt` is resolved
//! segment by segment. Segments up to the first archive file are checked on
//! the real filesystem; the segments after it are checked inside the archive.
//!
//! ```rust,no_run
//! use tar_overlay::path::ResolveContext;
//!
//! let ctx = ResolveContext::new("/home/user");
//! let resolved = ctx.resolve("a.tar/docs/../docs/readme.txt").unwrap();
//! assert_eq!(resolved.archive(), Some("/home/user/a.tar"));
//! assert_eq!(resolved.in_archive(), Some("docs/readme.txt"));
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::archive::{ArchiveFormat, open_read};
use crate::error::{Error, Result};
use crate::locate::{EntryKind, Probe, type_of};

/// Default ceiling for canonical path length.
pub const DEFAULT_MAX_PATH_LEN: usize = libc::PATH_MAX as usize;

/// Process state consulted by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// Directory that relative paths are taken from
    pub cwd: String,
    /// Longest canonical path accepted before failing with `NameTooLong`
    pub max_path_len: usize,
}

impl ResolveContext {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }

    /// Reads the working directory from `PWD`, which keeps the logical path
    /// the user typed, falling back to the process working directory.
    pub fn from_env() -> Result<Self> {
        let cwd = match env::var("PWD") {
            Ok(pwd) if pwd.starts_with('/') => pwd,
            _ => env::current_dir()?.to_string_lossy().into_owned(),
        };
        Ok(Self::new(cwd))
    }

    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    /// Prefixes a relative path with the working directory.
    pub fn make_absolute(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd.trim_end_matches('/'), path)
        }
    }

    /// Makes `path` absolute and canonicalizes it.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        reduce_abs_path(&self.make_absolute(path), self.max_path_len)
    }
}

/// A canonical absolute path, possibly crossing into an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: String,
    archive_end: Option<usize>,
}

impl ResolvedPath {
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The archive file on the real filesystem, if the path enters one
    pub fn archive(&self) -> Option<&str> {
        self.archive_end.map(|end| &self.path[..end])
    }

    /// The entry path inside the archive; empty for the archive itself
    pub fn in_archive(&self) -> Option<&str> {
        self.archive_end.map(|end| self.path.get(end + 1..).unwrap_or(""))
    }

    pub fn is_archive_path(&self) -> bool {
        self.archive_end.is_some()
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// True if `path` names an existing regular file with an archive name.
pub fn is_archive(path: &str) -> bool {
    ArchiveFormat::detect(Path::new(path)).is_some()
        && fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Byte offset where the first archive prefix of `path` ends.
fn archive_boundary(path: &str) -> Option<usize> {
    if !path.starts_with('/') {
        return None;
    }
    path.match_indices('/')
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .find(|&i| is_archive(&path[..i]))
        .or_else(|| is_archive(path).then_some(path.len()))
}

/// Returns what follows the first archive file in `path`, or `None` if no
/// prefix of `path` is an archive. The suffix is empty when `path` names
/// the archive itself.
pub fn split_tar_abs_path(path: &str) -> Option<&str> {
    archive_boundary(path).map(|end| path.get(end + 1..).unwrap_or(""))
}

fn check_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        Err(Error::NameTooLong { len, max })
    } else {
        Ok(())
    }
}

/// A non-terminal segment must be a directory, an archive, or a directory
/// inside an archive.
fn check_traversable(prefix: &str) -> Result<()> {
    match archive_boundary(prefix) {
        Some(end) if end < prefix.len() => {
            let inner = &prefix[end + 1..];
            let mut reader = open_read(Path::new(&prefix[..end]))?;
            match type_of(&mut reader, inner, Probe::DirectoryFirst) {
                Ok(EntryKind::Directory) => Ok(()),
                Ok(EntryKind::Regular) => Err(Error::NotADirectory {
                    path: prefix.to_string(),
                }),
                Err(e) if e.is_not_found() => Err(Error::not_found(prefix)),
                Err(e) => Err(e),
            }
        }
        Some(_) => Ok(()),
        None => match fs::metadata(prefix) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::NotADirectory {
                path: prefix.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(prefix)),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(Error::PermissionDenied {
                path: prefix.to_string(),
            }),
            Err(e) => Err(e.into()),
        },
    }
}

fn join(segments: &[&str]) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum::<usize>() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Canonicalizes an absolute path.
///
/// `.` segments are dropped and `..` pops the previous segment (never past
/// the root). Every segment but the last must exist and be traversable; the
/// last one may be absent so callers can resolve a path about to be created.
/// A trailing `/` after a final name is kept.
pub fn reduce_abs_path(path: &str, max_path_len: usize) -> Result<ResolvedPath> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath {
            path: path.to_string(),
        });
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let terminal = match segments.last() {
        Some(&last) if last != "." && last != ".." => Some(last),
        _ => None,
    };
    let walk = match terminal {
        Some(_) => &segments[..segments.len() - 1],
        None => &segments[..],
    };

    let mut kept: Vec<&str> = Vec::with_capacity(segments.len());
    for &segment in walk {
        match segment {
            "." => {}
            ".." => {
                kept.pop();
            }
            name => {
                kept.push(name);
                let prefix = join(&kept);
                check_len(prefix.len(), max_path_len)?;
                check_traversable(&prefix)?;
            }
        }
    }

    if let Some(last) = terminal {
        kept.push(last);
    }
    let mut canonical = join(&kept);
    if terminal.is_some() && path.ends_with('/') {
        canonical.push('/');
    }
    check_len(canonical.len(), max_path_len)?;

    let archive_end = archive_boundary(&canonical);
    Ok(ResolvedPath {
        path: canonical,
        archive_end,
    })
}
