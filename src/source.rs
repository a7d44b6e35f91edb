//! Random-access byte sources backing a MetDense file
//!
//! Every read in this crate is positioned: the caller names an absolute byte offset
//! and the source fills a buffer from there. Two sources are provided:
//! 1. [`MmapSource`] maps the whole file read-only and copies out of the mapping
//! 2. [`SeekSource`] wraps any `Read + Seek` and seeks before every read
//!
//! Neither source is synchronized. Share a file between threads by opening one
//! handle per thread (cloning an [`MmapSource`] is cheap) or by guarding it with a mutex.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use auto_impl::auto_impl;
use memmap2::Mmap;

/// A byte source that supports positioned reads
#[auto_impl(&mut, Box)]
pub trait ByteSource {
    /// Total number of bytes in the source
    fn len(&self) -> u64;

    /// Whether the source holds no bytes at all
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if the source ends before `buf` is full.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// A read-only memory map of a file
///
/// The map is reference counted, so clones share the same mapping.
#[derive(Clone)]
pub struct MmapSource {
    inner: Arc<Mmap>,
}
impl MmapSource {
    /// Maps the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;

        // Safety: the file is treated as immutable for the lifetime of the map
        let inner = unsafe { Mmap::map(&file)? };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the mapped bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}
impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.inner.len() as u64
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof(offset))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.inner.len())
            .ok_or_else(|| eof(offset))?;
        buf.copy_from_slice(&self.inner[start..end]);
        Ok(())
    }
}

/// A seekable reader used as a byte source
///
/// Each positioned read seeks first, so the cursor of the wrapped reader is
/// never relied upon between calls.
pub struct SeekSource<R: Read + Seek> {
    inner: R,
    len: u64,
}
impl<R: Read + Seek> SeekSource<R> {
    /// Wraps a seekable reader, measuring its length once
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }

    /// Returns the wrapped reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}
impl<R: Read + Seek> ByteSource for SeekSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.len {
            return Err(eof(offset));
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)
    }
}

fn eof(offset: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read at byte {offset} runs past the end of the source"),
    )
}

/// A sequential reader over a [`ByteSource`] starting at a fixed offset
///
/// Used while parsing the header and chromosome map, where fields follow one
/// another and `byteorder` can read them straight off the source.
pub(crate) struct SourceCursor<'a, S: ByteSource> {
    source: &'a mut S,
    pos: u64,
}
impl<'a, S: ByteSource> SourceCursor<'a, S> {
    pub(crate) fn new(source: &'a mut S, pos: u64) -> Self {
        Self { source, pos }
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.source.len().saturating_sub(self.pos)
    }
}
impl<S: ByteSource> Read for SourceCursor<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        self.source.read_exact_at(self.pos, &mut buf[..n])?;
        self.pos += n as u64;
        Ok(n)
    }
}
