//! Range queries over an open MetDense file
//!
//! [`MetDenseFile`] parses the header and chromosome map once at open time and then
//! answers queries with positioned reads. Every query goes through the same steps:
//! locate the span of the position block covering the requested genomic range,
//! map that span onto data rows, and unpack the rows in one contiguous read.
//!
//! A handle is not synchronized; use one handle per thread.

use std::io::{Read, Seek};
use std::ops::Range;
use std::path::Path;

use log::{debug, info, warn};
use ndarray::{s, Array2};

use crate::codec::{decode_rows, CellMask, RowLayout};
use crate::error::{FormatError, Result};
use crate::header::{Header, OffsetWidth};
use crate::index::ChromosomeIndex;
use crate::locate::{locate_range, PositionAccessor, PositionSpan, RowMapper};
use crate::source::{ByteSource, MmapSource, SeekSource};
use crate::POSITION_WORD_BYTES;

/// Options applied when opening a file
#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    verify_magic: bool,
}
impl Default for ReaderOptions {
    fn default() -> Self {
        Self { verify_magic: true }
    }
}
impl ReaderOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether to reject files whose magic bytes are not `MetDense`
    ///
    /// Files produced by early tooling were never checked, so this can be turned off.
    #[must_use]
    pub fn verify_magic(mut self, verify_magic: bool) -> Self {
        self.verify_magic = verify_magic;
        self
    }
}

/// Calls and positions of one sub-range of a multi-range query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeData {
    /// Call codes, one row per position and one column per (selected) cell
    pub calls: Array2<u8>,
    /// Genomic positions, aligned with the rows of `calls`
    pub positions: Vec<u32>,
}

/// Maps row indices of a span onto their rank among the rows kept by a mask
///
/// `skipped[i]` counts the rows dropped before row `i`, so a kept row `i` lands at
/// `i - skipped[i]` in the compacted output.
struct Compaction {
    skipped: Vec<usize>,
}
impl Compaction {
    fn new(mask: &[bool]) -> Self {
        let mut skipped = Vec::with_capacity(mask.len() + 1);
        let mut dropped = 0;
        skipped.push(0);
        for &keep in mask {
            dropped += usize::from(!keep);
            skipped.push(dropped);
        }
        Self { skipped }
    }

    fn map(&self, i: usize) -> usize {
        i - self.skipped[i]
    }

    fn map_range(&self, range: Range<usize>) -> Range<usize> {
        self.map(range.start)..self.map(range.end)
    }
}

/// An open MetDense file
pub struct MetDenseFile<S: ByteSource = MmapSource> {
    source: S,
    header: Header,
    index: ChromosomeIndex,
    layout: RowLayout,
    rows: RowMapper,
}

impl MetDenseFile<MmapSource> {
    /// Opens and memory-maps the file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let source = MmapSource::new(path)?;
        Self::from_source(source, options)
    }
}

impl<R: Read + Seek> MetDenseFile<SeekSource<R>> {
    /// Reads a file through a seekable reader instead of a memory map
    pub fn from_reader(reader: R, options: ReaderOptions) -> Result<Self> {
        Self::from_source(SeekSource::new(reader)?, options)
    }
}

impl<S: ByteSource> MetDenseFile<S> {
    /// Parses the header and chromosome map of `source`
    pub fn from_source(mut source: S, options: ReaderOptions) -> Result<Self> {
        let header = Header::read_from(&mut source, options.verify_magic)?;
        info!(
            "The file follows version {}.{} and contains data for {} cells",
            header.version_major,
            header.version_minor,
            header.cell_count()
        );
        if header.nonconform_offset() != 0 {
            warn!(
                "Data block starts at unaligned byte {}; shifting position words by {}",
                header.data_start,
                header.nonconform_offset()
            );
        }

        let index = ChromosomeIndex::read_from(&mut source, &header)?;
        let layout = header.row_layout();
        let rows = RowMapper::new(
            header.data_start,
            index.first_position_offset(),
            header.nonconform_offset(),
            layout.row_size_bytes(),
        );

        Ok(Self {
            source,
            header,
            index,
            layout,
            rows,
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn index(&self) -> &ChromosomeIndex {
        &self.index
    }

    /// Format version as `(major, minor)`
    #[must_use]
    pub fn version(&self) -> (u32, u32) {
        (self.header.version_major, self.header.version_minor)
    }

    #[must_use]
    pub fn offset_width(&self) -> OffsetWidth {
        self.header.offset_width
    }

    #[must_use]
    pub fn cell_names(&self) -> &[String] {
        &self.header.cell_names
    }

    #[must_use]
    pub fn n_cells(&self) -> usize {
        self.header.cell_count()
    }

    #[must_use]
    pub fn chromosome_names(&self) -> &[String] {
        self.index.names()
    }

    #[must_use]
    pub fn n_cpg(&self) -> u64 {
        self.index.n_cpg()
    }

    #[must_use]
    pub fn n_cpg_per_chromosome(&self) -> Vec<u64> {
        self.index.n_cpg_per_chromosome()
    }

    #[must_use]
    pub fn row_layout(&self) -> RowLayout {
        self.layout
    }

    #[must_use]
    pub fn row_mapper(&self) -> RowMapper {
        self.rows
    }

    /// Length of the file in 4-byte position words
    #[must_use]
    pub fn len_words(&self) -> u64 {
        self.source.len().saturating_sub(self.header.nonconform_offset()) / POSITION_WORD_BYTES
    }

    /// Indexable view of the file as position words
    pub fn positions(&mut self) -> PositionAccessor<'_, S> {
        let nonconform_offset = self.header.nonconform_offset();
        PositionAccessor::new(&mut self.source, nonconform_offset)
    }

    /// Finds the position block span of `chromosome` within `lower..=upper`
    pub fn locate_range(
        &mut self,
        chromosome: &str,
        lower: u64,
        upper: u64,
    ) -> Result<PositionSpan> {
        let nonconform_offset = self.header.nonconform_offset();
        let mut accessor = PositionAccessor::new(&mut self.source, nonconform_offset);
        locate_range(&mut accessor, &self.index, chromosome, lower, upper)
    }

    /// Data rows matching a position span
    fn span_rows(&self, span: PositionSpan) -> Range<u64> {
        self.rows.row_index(span.lower)..self.rows.row_index(span.upper)
    }

    /// Reads and unpacks the data rows in `rows`
    fn read_rows(
        &mut self,
        rows: Range<u64>,
        row_mask: Option<&[bool]>,
        cell_mask: Option<&CellMask>,
    ) -> Result<Array2<u8>> {
        if let Some(mask) = cell_mask {
            mask.validate(self.n_cells())?;
        }
        let n_rows = rows.end.saturating_sub(rows.start);
        let row_bytes = self.rows.row_size_bytes();
        let offset = self.rows.data_start() + rows.start * row_bytes;
        // reject spans the file cannot hold before allocating for them
        let end = n_rows
            .checked_mul(row_bytes)
            .and_then(|len| len.checked_add(offset))
            .filter(|&end| end <= self.source.len());
        if end.is_none() {
            return Err(FormatError::Truncated("data rows", offset).into());
        }

        let mut buf = vec![0u8; (n_rows * row_bytes) as usize];
        self.source.read_exact_at(offset, &mut buf)?;
        decode_rows(&buf, n_rows as usize, self.layout, row_mask, cell_mask)
    }

    /// Reads the calls of `chromosome` at positions within `lower..=upper`
    ///
    /// Rows follow genomic order; columns are cells, restricted to `cell_mask` if given.
    pub fn read_data_range(
        &mut self,
        chromosome: &str,
        lower: u64,
        upper: u64,
        cell_mask: Option<&CellMask>,
    ) -> Result<Array2<u8>> {
        let span = self.locate_range(chromosome, lower, upper)?;
        let rows = self.span_rows(span);
        debug!("Reading rows {rows:?} for {chromosome}:{lower}-{upper}");
        self.read_rows(rows, None, cell_mask)
    }

    /// Reads the positions of `chromosome` within `lower..=upper`
    pub fn read_positions_range(
        &mut self,
        chromosome: &str,
        lower: u64,
        upper: u64,
    ) -> Result<Vec<u32>> {
        let span = self.locate_range(chromosome, lower, upper)?;
        self.positions().get_range(span.words())
    }

    /// Reads every call of `chromosome`
    pub fn read_data_chromosome(
        &mut self,
        chromosome: &str,
        cell_mask: Option<&CellMask>,
    ) -> Result<Array2<u8>> {
        self.read_data_range(chromosome, 0, u64::MAX, cell_mask)
    }

    /// Reads every position of `chromosome`
    pub fn read_positions_chromosome(&mut self, chromosome: &str) -> Result<Vec<u32>> {
        self.read_positions_range(chromosome, 0, u64::MAX)
    }

    /// Reads the complete data block
    pub fn read_data_full(&mut self, cell_mask: Option<&CellMask>) -> Result<Array2<u8>> {
        let n_cpg = self.n_cpg();
        self.read_rows(0..n_cpg, None, cell_mask)
    }

    /// Reads several ranges of one chromosome with a single pass over the data
    ///
    /// Each `(lo, hi)` pair is located independently (swapped if `lo > hi`). The rows
    /// of all pairs are unpacked in one read of their covering span, skipping rows
    /// that no pair selects, and then split back into one [`RangeData`] per pair, in
    /// input order. Overlapping pairs each receive their full set of rows.
    pub fn read_ranges(
        &mut self,
        chromosome: &str,
        ranges: &[(u64, u64)],
        cell_mask: Option<&CellMask>,
    ) -> Result<Vec<RangeData>> {
        let mut spans = Vec::with_capacity(ranges.len());
        for &(lo, hi) in ranges {
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            spans.push(self.locate_range(chromosome, lo, hi)?);
        }
        let Some(first) = spans.first() else {
            return Ok(Vec::new());
        };

        let row_spans: Vec<Range<u64>> = spans.iter().map(|&span| self.span_rows(span)).collect();
        let (mut rmin, mut rmax) = (row_spans[0].start, row_spans[0].end);
        let mut wmin = first.words().start;
        for (rows, span) in row_spans.iter().zip(&spans) {
            if rows.start < rmin {
                rmin = rows.start;
                wmin = span.words().start;
            }
            rmax = rmax.max(rows.end);
        }

        let mut row_mask = vec![false; (rmax - rmin) as usize];
        for rows in &row_spans {
            for keep in &mut row_mask[(rows.start - rmin) as usize..(rows.end - rmin) as usize] {
                *keep = true;
            }
        }
        let compaction = Compaction::new(&row_mask);
        debug!(
            "Reading {} of {} rows in {rmin}..{rmax} for {} ranges on {chromosome}",
            row_mask.iter().filter(|&&k| k).count(),
            row_mask.len(),
            ranges.len()
        );

        let calls = self.read_rows(rmin..rmax, Some(&row_mask), cell_mask)?;
        let positions: Vec<u32> = self
            .positions()
            .get_range(wmin..wmin + (rmax - rmin))?
            .into_iter()
            .zip(&row_mask)
            .filter_map(|(position, &keep)| keep.then_some(position))
            .collect();

        Ok(row_spans
            .into_iter()
            .map(|rows| {
                let local = (rows.start - rmin) as usize..(rows.end - rmin) as usize;
                let compacted = compaction.map_range(local);
                RangeData {
                    calls: calls.slice(s![compacted.clone(), ..]).to_owned(),
                    positions: positions[compacted].to_vec(),
                }
            })
            .collect())
    }
}
