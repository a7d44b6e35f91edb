//! Position search and row mapping
//!
//! The position block is searched in place: [`PositionAccessor`] views the open file
//! as an array of 4-byte little-endian words and a binary search runs directly over
//! it, so a query never materializes more than the positions it returns.
//!
//! Word indices are absolute, counted from the start of the file (shifted by the
//! misalignment of the data block, see [`Header::nonconform_offset`]). A
//! [`PositionSpan`] reports its bounds as `4 * word index`, one past the last
//! included entry on the upper side.
//!
//! [`Header::nonconform_offset`]: crate::Header::nonconform_offset

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{LookupError, Result};
use crate::index::ChromosomeIndex;
use crate::source::ByteSource;
use crate::POSITION_WORD_BYTES;

/// A narrow indexable view of the file as 4-byte position words
pub struct PositionAccessor<'a, S: ByteSource> {
    source: &'a mut S,
    nonconform_offset: u64,
    len_words: u64,
}
impl<'a, S: ByteSource> PositionAccessor<'a, S> {
    #[must_use]
    pub fn new(source: &'a mut S, nonconform_offset: u64) -> Self {
        let len_words = source.len().saturating_sub(nonconform_offset) / POSITION_WORD_BYTES;
        Self {
            source,
            nonconform_offset,
            len_words,
        }
    }

    /// Number of whole words in the file
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len_words
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len_words == 0
    }

    fn byte_offset(&self, i: u64) -> u64 {
        i * POSITION_WORD_BYTES + self.nonconform_offset
    }

    /// The word at index `i`
    pub fn get(&mut self, i: u64) -> Result<u32> {
        if i >= self.len_words {
            return Err(LookupError::OutOfRange {
                requested_index: i,
                max_index: self.len_words,
            }
            .into());
        }
        let mut buf = [0u8; 4];
        self.source.read_exact_at(self.byte_offset(i), &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// The words in `range`, read in one pass
    pub fn get_range(&mut self, range: Range<u64>) -> Result<Vec<u32>> {
        if range.end > self.len_words {
            return Err(LookupError::OutOfRange {
                requested_index: range.end,
                max_index: self.len_words,
            }
            .into());
        }
        let n_words = range.end.saturating_sub(range.start) as usize;
        let mut buf = vec![0u8; n_words * POSITION_WORD_BYTES as usize];
        self.source
            .read_exact_at(self.byte_offset(range.start), &mut buf)?;
        let mut words = vec![0u32; n_words];
        LittleEndian::read_u32_into(&buf, &mut words);
        Ok(words)
    }

    /// First index in `lo..hi` whose word fails `pred`, assuming `pred` holds for a prefix
    fn partition_point<F: Fn(u64) -> bool>(
        &mut self,
        mut lo: u64,
        mut hi: u64,
        pred: F,
    ) -> Result<u64> {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(u64::from(self.get(mid)?)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Leftmost index in `lo..hi` whose word is `>= value`
    pub fn search_left(&mut self, lo: u64, hi: u64, value: u64) -> Result<u64> {
        self.partition_point(lo, hi, |word| word < value)
    }

    /// Leftmost index in `lo..hi` whose word is `> value`
    pub fn search_right(&mut self, lo: u64, hi: u64, value: u64) -> Result<u64> {
        self.partition_point(lo, hi, |word| word <= value)
    }
}

/// A half-open span of the position block, in `4 * word index` units
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionSpan {
    /// Start of the first included entry
    pub lower: u64,
    /// Start of the first entry past the span
    pub upper: u64,
}
impl PositionSpan {
    #[must_use]
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// The span as absolute word indices
    #[must_use]
    pub fn words(&self) -> Range<u64> {
        self.lower / POSITION_WORD_BYTES..self.upper / POSITION_WORD_BYTES
    }

    /// Number of positions in the span
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.upper - self.lower) / POSITION_WORD_BYTES
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Finds the span of `chromosome`'s positions that fall within `lower..=upper`
pub fn locate_range<S: ByteSource>(
    accessor: &mut PositionAccessor<'_, S>,
    index: &ChromosomeIndex,
    chromosome: &str,
    lower: u64,
    upper: u64,
) -> Result<PositionSpan> {
    let pos = index
        .position(chromosome)
        .ok_or_else(|| LookupError::UnknownChromosome(chromosome.to_string()))?;
    if lower > upper {
        return Err(LookupError::InvertedRange { lower, upper }.into());
    }

    let low_bound = index.positions_start()[pos] / POSITION_WORD_BYTES;
    let high_bound = index.positions_end()[pos] / POSITION_WORD_BYTES;
    if low_bound >= high_bound {
        return Err(LookupError::EmptyChromosome(chromosome.to_string()).into());
    }

    let low_bound_pos = u64::from(accessor.get(low_bound)?);
    let high_bound_pos = u64::from(accessor.get(high_bound - 1)?);
    if low_bound_pos > upper {
        return Err(LookupError::BelowChromosome(upper).into());
    }
    if high_bound_pos < lower {
        return Err(LookupError::AboveChromosome(lower).into());
    }

    let lower_index = if lower > low_bound_pos {
        POSITION_WORD_BYTES * accessor.search_left(low_bound, high_bound, lower)?
    } else {
        POSITION_WORD_BYTES * low_bound
    };

    if lower == upper {
        if u64::from(accessor.get(lower_index / POSITION_WORD_BYTES)?) != lower {
            return Err(LookupError::MissingPosition(lower).into());
        }
        return Ok(PositionSpan::new(lower_index, lower_index + POSITION_WORD_BYTES));
    }

    let upper_index = if upper < high_bound_pos {
        POSITION_WORD_BYTES * accessor.search_right(low_bound, high_bound, upper)?
    } else {
        POSITION_WORD_BYTES * high_bound
    };

    debug!("{chromosome}:{lower}-{upper} located at [{lower_index}, {upper_index})");
    Ok(PositionSpan::new(lower_index, upper_index))
}

/// Maps position block offsets onto data block rows
#[derive(Clone, Copy, Debug)]
pub struct RowMapper {
    data_start: u64,
    first_position: u64,
    nonconform_offset: u64,
    row_size_bytes: u64,
}
impl RowMapper {
    #[must_use]
    pub fn new(
        data_start: u64,
        first_position: u64,
        nonconform_offset: u64,
        row_size_bytes: usize,
    ) -> Self {
        Self {
            data_start,
            first_position,
            nonconform_offset,
            row_size_bytes: row_size_bytes as u64,
        }
    }

    /// Row number (from the start of the data block) of the entry at `byte_pos`
    #[must_use]
    pub fn row_index(&self, byte_pos: u64) -> u64 {
        (byte_pos + self.nonconform_offset).saturating_sub(self.first_position)
            / POSITION_WORD_BYTES
    }

    /// Byte offset of the row matching the position entry at `byte_pos`
    #[must_use]
    pub fn row_start(&self, byte_pos: u64) -> u64 {
        self.data_start + self.row_index(byte_pos) * self.row_size_bytes
    }

    /// Byte offset of the `row`-th row of the chromosome at `chrom_idx`
    #[must_use]
    pub fn row_start_in_chromosome(
        &self,
        index: &ChromosomeIndex,
        chrom_idx: usize,
        row: u64,
    ) -> u64 {
        let chrom_row =
            (index.positions_start()[chrom_idx] - self.first_position) / POSITION_WORD_BYTES;
        self.data_start + (chrom_row + row) * self.row_size_bytes
    }

    /// Byte offset of the data block
    #[must_use]
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    #[must_use]
    pub fn row_size_bytes(&self) -> u64 {
        self.row_size_bytes
    }
}
