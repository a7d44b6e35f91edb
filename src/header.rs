//! File header parsing
//!
//! The header holds the magic bytes, the format version, two pointers (to the data
//! block and to the chromosome map) and the newline-terminated cell names. The width
//! of the two pointers depends on the version: `0.0` files use 4-byte pointers, every
//! later version uses 8-byte pointers.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt};
use memchr::memchr;

use crate::codec::RowLayout;
use crate::error::{Error, FormatError, Result};
use crate::source::{ByteSource, SourceCursor};
use crate::FILE_MAGIC;

/// Size of the chunks scanned for newlines when reading names
const LINE_CHUNK: usize = 4096;

/// Width of the pointer fields in the header and the chromosome map
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetWidth {
    /// 4-byte offsets, used only by version 0.0
    Four,
    /// 8-byte offsets, used from version 0.1 onward
    Eight,
}
impl OffsetWidth {
    /// Resolves the offset width declared by a format version
    #[must_use]
    pub fn for_version(major: u32, minor: u32) -> Self {
        if (major, minor) == (0, 0) {
            Self::Four
        } else {
            Self::Eight
        }
    }

    /// Number of bytes of one offset
    #[must_use]
    pub fn bytes(self) -> u64 {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    pub(crate) fn read<R: io::Read>(self, reader: &mut R) -> io::Result<u64> {
        match self {
            Self::Four => reader.read_u32::<LittleEndian>().map(u64::from),
            Self::Eight => reader.read_u64::<LittleEndian>(),
        }
    }
}

/// The parsed header of a MetDense file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Major format version
    pub version_major: u32,
    /// Minor format version
    pub version_minor: u32,
    /// Width of the data and chromosome pointers
    pub offset_width: OffsetWidth,
    /// Byte offset of the first data row
    pub data_start: u64,
    /// Byte offset of the chromosome map
    pub chromosome_start: u64,
    /// Cell names in column order
    pub cell_names: Vec<String>,
}
impl Header {
    /// Parses the header from the start of `source`
    ///
    /// When `verify_magic` is false the magic bytes are skipped without being checked.
    pub fn read_from<S: ByteSource>(source: &mut S, verify_magic: bool) -> Result<Self> {
        let file_size = source.len();
        let mut cursor = SourceCursor::new(source, 0);

        let mut magic = [0u8; 8];
        io::Read::read_exact(&mut cursor, &mut magic).map_err(truncated("magic", 0))?;
        if verify_magic && magic != *FILE_MAGIC {
            return Err(FormatError::InvalidMagic(magic).into());
        }

        let version_major = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("version", 8))?;
        let version_minor = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("version", 12))?;
        let offset_width = OffsetWidth::for_version(version_major, version_minor);

        let data_start = offset_width
            .read(&mut cursor)
            .map_err(truncated("data pointer", 16))?;
        let chromosome_start = offset_width
            .read(&mut cursor)
            .map_err(truncated("chromosome pointer", 16 + offset_width.bytes()))?;
        let n_cells = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("cell count", 16 + 2 * offset_width.bytes()))?;

        let names_start = cursor.position();
        let (cell_names, _) = read_lines(source, names_start, n_cells as usize, "cell names")?;

        if data_start >= chromosome_start {
            return Err(FormatError::MisorderedPointers {
                data_start,
                chromosome_start,
            }
            .into());
        }
        if chromosome_start >= file_size {
            return Err(FormatError::PointerOutOfBounds {
                name: "chromosome start",
                offset: chromosome_start,
                file_size,
            }
            .into());
        }

        Ok(Self {
            version_major,
            version_minor,
            offset_width,
            data_start,
            chromosome_start,
            cell_names,
        })
    }

    /// Number of cells (columns) in the file
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cell_names.len()
    }

    /// The layout of one data row for this file's cell count
    #[must_use]
    pub fn row_layout(&self) -> RowLayout {
        RowLayout::new(self.cell_count())
    }

    /// Misalignment of the data block relative to 4-byte words
    ///
    /// The position block directly follows the data block, and rows are whole
    /// 32-bit words, so this is also the misalignment of every position word.
    #[must_use]
    pub fn nonconform_offset(&self) -> u64 {
        self.data_start % 4
    }
}

/// Maps an end-of-file error into a truncation of the named section
pub(crate) fn truncated(section: &'static str, offset: u64) -> impl Fn(io::Error) -> Error {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated(section, offset).into()
        } else {
            err.into()
        }
    }
}

/// Reads `n` newline-terminated UTF-8 lines starting at `offset`
///
/// Returns the lines without their terminators and the offset just past the last one.
pub(crate) fn read_lines<S: ByteSource>(
    source: &mut S,
    offset: u64,
    n: usize,
    section: &'static str,
) -> Result<(Vec<String>, u64)> {
    // every line takes at least its terminator, so the count is bounded by the bytes left
    let remaining = source.len().saturating_sub(offset);
    let mut lines = Vec::with_capacity(n.min(usize::try_from(remaining).unwrap_or(usize::MAX)));
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; LINE_CHUNK];
    let mut pos = offset;
    let mut line_start = offset;

    while lines.len() < n {
        let avail = source.len().saturating_sub(pos).min(LINE_CHUNK as u64) as usize;
        if avail == 0 {
            return Err(FormatError::MissingNames {
                section,
                expected: n,
                found: lines.len(),
            }
            .into());
        }
        source.read_exact_at(pos, &mut chunk[..avail])?;

        let mut consumed = 0;
        while lines.len() < n {
            if let Some(i) = memchr(b'\n', &chunk[consumed..avail]) {
                pending.extend_from_slice(&chunk[consumed..consumed + i]);
                let name = String::from_utf8(std::mem::take(&mut pending))
                    .map_err(|_| FormatError::InvalidName(line_start))?;
                lines.push(name);
                consumed += i + 1;
                line_start = pos + consumed as u64;
            } else {
                pending.extend_from_slice(&chunk[consumed..avail]);
                consumed = avail;
                break;
            }
        }
        pos += consumed as u64;
    }

    Ok((lines, pos))
}
