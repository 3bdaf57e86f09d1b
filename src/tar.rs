//! Tar header block codec
//!
//! Encodes and decodes the 512-byte POSIX ustar header record. Numeric
//! fields are zero-padded octal text followed by a NUL, and every header
//! written by this crate carries a checksum recomputed over the final bytes.
//!
//! ```rust
//! use tar_overlay::tar::{TarHeader, EntryType};
//!
//! let header = TarHeader::new("docs/readme.txt".to_string(), 0o644, 12);
//! let bytes = header.to_bytes().unwrap();
//! let parsed = TarHeader::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.name, "docs/readme.txt");
//! assert_eq!(parsed.typeflag, EntryType::Regular);
//! ```

use std::fs::Metadata;
use std::ops::Range;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use crate::error::{Error, Result};

/// Size of a header record and of every content block.
pub const BLOCK_SIZE: usize = 512;
pub(crate) const BLOCK: u64 = BLOCK_SIZE as u64;

const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const CHECKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const LINKNAME: Range<usize> = 157..257;
const MAGIC: Range<usize> = 257..263;
const VERSION: Range<usize> = 263..265;
const UNAME: Range<usize> = 265..297;
const GNAME: Range<usize> = 297..329;
const DEVMAJOR: Range<usize> = 329..337;
const DEVMINOR: Range<usize> = 337..345;
const PREFIX: Range<usize> = 345..500;

/// Longest entry name that fits the name and prefix fields together.
pub const MAX_NAME_LEN: usize = PREFIX.end - PREFIX.start + 1 + NAME.end - NAME.start;

/// Entry type tag stored at byte 156 of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// `'0'`
    Regular,
    /// `'\0'`, written by old tar implementations
    LegacyRegular,
    /// `'1'`
    HardLink,
    /// `'2'`
    Symlink,
    /// `'3'`
    CharDevice,
    /// `'4'`
    BlockDevice,
    /// `'5'`
    Directory,
    /// `'6'`
    Fifo,
    /// Any other tag, kept as-is so rewritten headers stay byte-identical
    Other(u8),
}

impl EntryType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'0' => EntryType::Regular,
            0 => EntryType::LegacyRegular,
            b'1' => EntryType::HardLink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::CharDevice,
            b'4' => EntryType::BlockDevice,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            other => EntryType::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::LegacyRegular => 0,
            EntryType::HardLink => b'1',
            EntryType::Symlink => b'2',
            EntryType::CharDevice => b'3',
            EntryType::BlockDevice => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Other(b) => b,
        }
    }

    /// Maps a source file kind to its tag. Sockets and anything else
    /// unknown fall back to the legacy regular tag.
    pub fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_file() {
            EntryType::Regular
        } else if ft.is_dir() {
            EntryType::Directory
        } else if ft.is_symlink() {
            EntryType::Symlink
        } else if ft.is_char_device() {
            EntryType::CharDevice
        } else if ft.is_block_device() {
            EntryType::BlockDevice
        } else if ft.is_fifo() {
            EntryType::Fifo
        } else {
            EntryType::LegacyRegular
        }
    }

    pub fn is_regular(self) -> bool {
        matches!(self, EntryType::Regular | EntryType::LegacyRegular)
    }

    pub fn is_dir(self) -> bool {
        self == EntryType::Directory
    }
}

/// Decoded tar header
///
/// `name` is the full entry name: when the archive stores a ustar prefix,
/// it is joined back in front of the name field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: u64,
    pub checksum: u32,
    pub typeflag: EntryType,
    pub linkname: String,
    pub magic: String,
    pub version: String,
    pub uname: String,
    pub gname: String,
    pub devmajor: u32,
    pub devminor: u32,
}

impl TarHeader {
    /// Create a new regular-file header with minimal required fields
    pub fn new(name: String, mode: u32, size: u64) -> Self {
        Self {
            name,
            mode,
            size,
            uid: 0,
            gid: 0,
            mtime: 0,
            checksum: 0,
            typeflag: EntryType::Regular,
            linkname: String::new(),
            magic: "ustar".to_string(),
            version: "00".to_string(),
            uname: String::new(),
            gname: String::new(),
            devmajor: 0,
            devminor: 0,
        }
    }

    /// Build a header describing a source file, stamped with the current time.
    ///
    /// Only regular files carry a size; every other kind is stored with no
    /// content. Directory names get a trailing `/`.
    pub fn from_metadata(name: &str, meta: &Metadata) -> Self {
        let typeflag = EntryType::from_file_type(meta.file_type());
        let size = if typeflag == EntryType::Regular { meta.len() } else { 0 };
        let mut name = name.to_string();
        if typeflag.is_dir() && !name.ends_with('/') {
            name.push('/');
        }
        let mut header = Self::new(name, mode_from_permissions(meta.mode()), size);
        header.uid = meta.uid();
        header.gid = meta.gid();
        header.typeflag = typeflag;
        header.touch();
        header
    }

    /// Set mtime to the current time
    pub fn touch(&mut self) {
        self.mtime = chrono::Utc::now().timestamp().max(0) as u64;
    }

    /// Parse a header from a 512-byte block, rejecting a bad checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        decode_header(data, 0)
    }

    /// Convert the header to a 512-byte block with a fresh checksum
    pub fn to_bytes(&self) -> Result<[u8; BLOCK_SIZE]> {
        encode_header(self)
    }

    /// Verify the checksum of the header
    /// Returns true if the checksum is valid
    pub fn verify_checksum(&self, data: &[u8]) -> bool {
        calc_checksum(data) == self.checksum
    }

    /// Content length rounded up to whole blocks
    pub fn padded_size(&self) -> u64 {
        padded(self.size)
    }
}

/// Rounds a byte count up to the next block boundary.
pub fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK) * BLOCK
}

/// Builds the three-digit owner/group/other mode from permission bits.
/// Setuid, setgid and sticky bits are dropped.
pub fn mode_from_permissions(st_mode: u32) -> u32 {
    let bit = |mask: libc::mode_t, value: u32| {
        if st_mode & mask as u32 != 0 { value } else { 0 }
    };
    let user = bit(libc::S_IRUSR, 4) + bit(libc::S_IWUSR, 2) + bit(libc::S_IXUSR, 1);
    let group = bit(libc::S_IRGRP, 4) + bit(libc::S_IWGRP, 2) + bit(libc::S_IXGRP, 1);
    let other = bit(libc::S_IROTH, 4) + bit(libc::S_IWOTH, 2) + bit(libc::S_IXOTH, 1);
    (user << 6) | (group << 3) | other
}

/// Check if a block is empty (all zeros)
pub fn is_empty_block(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Calc checksum of the header bytes, counting the checksum field as spaces
pub fn calc_checksum(data: &[u8]) -> u32 {
    data.iter()
        .take(BLOCK_SIZE)
        .enumerate()
        .map(|(i, &b)| if CHECKSUM.contains(&i) { b' ' as u32 } else { b as u32 })
        .sum()
}

/// Recompute and store the checksum of a header block in place.
pub fn set_checksum(block: &mut [u8; BLOCK_SIZE]) {
    let checksum = calc_checksum(block);
    let text = format!("{:06o}\0 ", checksum);
    block[CHECKSUM].copy_from_slice(text.as_bytes());
}

fn read_tar_str(data: &[u8], range: Range<usize>) -> String {
    let field = &data[range];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn read_tar_octal(data: &[u8], range: Range<usize>, offset: u64, field: &str) -> Result<u64> {
    let digits: Vec<u8> = data[range]
        .iter()
        .copied()
        .skip_while(|&b| b == b' ')
        .take_while(|&b| b != 0 && b != b' ')
        .collect();
    if digits.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| u64::from_str_radix(s, 8).ok())
        .ok_or_else(|| Error::corrupt(offset, format!("invalid octal in {} field", field)))
}

fn read_tar_u32(data: &[u8], range: Range<usize>, offset: u64, field: &str) -> Result<u32> {
    let value = read_tar_octal(data, range, offset, field)?;
    u32::try_from(value)
        .map_err(|_| Error::corrupt(offset, format!("{} field out of range", field)))
}

/// Decodes the block read at `offset`, which is only used for error reporting.
pub(crate) fn decode_header(data: &[u8], offset: u64) -> Result<TarHeader> {
    if data.len() < BLOCK_SIZE {
        return Err(Error::corrupt(offset, "short header block"));
    }
    let checksum = read_tar_u32(data, CHECKSUM, offset, "checksum")?;
    if calc_checksum(data) != checksum {
        return Err(Error::corrupt(offset, "header checksum mismatch"));
    }
    let magic = read_tar_str(data, MAGIC);
    let mut name = read_tar_str(data, NAME);
    if magic.starts_with("ustar") {
        let prefix = read_tar_str(data, PREFIX);
        if !prefix.is_empty() {
            name = format!("{}/{}", prefix, name);
        }
    }
    Ok(TarHeader {
        name,
        mode: read_tar_u32(data, MODE, offset, "mode")?,
        uid: read_tar_u32(data, UID, offset, "uid")?,
        gid: read_tar_u32(data, GID, offset, "gid")?,
        size: read_tar_octal(data, SIZE, offset, "size")?,
        mtime: read_tar_octal(data, MTIME, offset, "mtime")?,
        checksum,
        typeflag: EntryType::from_byte(data[TYPEFLAG]),
        linkname: read_tar_str(data, LINKNAME),
        magic,
        version: read_tar_str(data, VERSION),
        uname: read_tar_str(data, UNAME),
        gname: read_tar_str(data, GNAME),
        devmajor: read_tar_u32(data, DEVMAJOR, offset, "devmajor")?,
        devminor: read_tar_u32(data, DEVMINOR, offset, "devminor")?,
    })
}

fn write_str(data: &mut [u8], range: Range<usize>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(range.len());
    data[range.start..range.start + len].copy_from_slice(&bytes[..len]);
}

fn write_octal(data: &mut [u8], range: Range<usize>, value: u64, field: &'static str) -> Result<()> {
    let digits = range.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    if text.len() > digits {
        return Err(Error::FieldOverflow { field, value });
    }
    data[range.start..range.start + digits].copy_from_slice(text.as_bytes());
    data[range.end - 1] = 0;
    Ok(())
}

/// Splits an over-long name at a `/` so that it fits the prefix and name fields.
fn split_name(name: &str) -> Result<(&str, &str)> {
    let name_len = NAME.len();
    if name.len() <= name_len {
        return Ok(("", name));
    }
    name.match_indices('/')
        .map(|(i, _)| i)
        .find(|&i| i <= PREFIX.len() && i + 1 < name.len() && name.len() - i - 1 <= name_len)
        .map(|i| (&name[..i], &name[i + 1..]))
        .ok_or(Error::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        })
}

/// Text fields other than the name are never split, so they must fit whole.
fn check_fits(value: &str, range: Range<usize>) -> Result<()> {
    if value.len() > range.len() {
        return Err(Error::NameTooLong {
            len: value.len(),
            max: range.len(),
        });
    }
    Ok(())
}

fn encode_header(header: &TarHeader) -> Result<[u8; BLOCK_SIZE]> {
    let mut data = [0u8; BLOCK_SIZE];
    let (prefix, name) = split_name(&header.name)?;
    check_fits(&header.linkname, LINKNAME)?;
    check_fits(&header.uname, UNAME)?;
    check_fits(&header.gname, GNAME)?;
    write_str(&mut data, NAME, name);
    write_octal(&mut data, MODE, header.mode as u64, "mode")?;
    write_octal(&mut data, UID, header.uid as u64, "uid")?;
    write_octal(&mut data, GID, header.gid as u64, "gid")?;
    write_octal(&mut data, SIZE, header.size, "size")?;
    write_octal(&mut data, MTIME, header.mtime, "mtime")?;
    data[TYPEFLAG] = header.typeflag.as_byte();
    write_str(&mut data, LINKNAME, &header.linkname);
    write_str(&mut data, MAGIC, &header.magic);
    write_str(&mut data, VERSION, &header.version);
    write_str(&mut data, UNAME, &header.uname);
    write_str(&mut data, GNAME, &header.gname);
    write_octal(&mut data, DEVMAJOR, header.devmajor as u64, "devmajor")?;
    write_octal(&mut data, DEVMINOR, header.devminor as u64, "devminor")?;
    write_str(&mut data, PREFIX, prefix);
    set_checksum(&mut data);
    Ok(data)
}
