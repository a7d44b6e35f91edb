//! Bit-packed call rows
//!
//! Every CpG site is stored as one row of little-endian 32-bit words. Each word
//! carries 16 cells at 2 bits per cell, with the least-significant pair of bits
//! holding the lowest cell index of the word. Padding bits past the last cell of
//! the final word are ignored.

use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array2;

use crate::error::{FormatError, LookupError, Result};
use crate::CELLS_PER_WORD;

/// A single methylation call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallCode {
    /// No read covered this cell at this site
    NoData = 0,
    Unmethylated = 1,
    Methylated = 2,
    /// Reads disagree
    Ambiguous = 3,
}
impl CallCode {
    /// Interprets the two lowest bits of `bits`
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::NoData,
            1 => Self::Unmethylated,
            2 => Self::Methylated,
            _ => Self::Ambiguous,
        }
    }

    /// Whether the call is a clear methylated or unmethylated observation
    #[must_use]
    pub fn is_informative(self) -> bool {
        matches!(self, Self::Unmethylated | Self::Methylated)
    }

    /// The methylation level of an informative call (0 or 1)
    #[must_use]
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Unmethylated => Some(0.0),
            Self::Methylated => Some(1.0),
            Self::NoData | Self::Ambiguous => None,
        }
    }
}
impl From<CallCode> for u8 {
    fn from(code: CallCode) -> Self {
        code as u8
    }
}

/// The shape of one data row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowLayout {
    n_cells: usize,
    row_size_words: usize,
}
impl RowLayout {
    #[must_use]
    pub fn new(n_cells: usize) -> Self {
        Self {
            n_cells,
            row_size_words: n_cells.div_ceil(CELLS_PER_WORD),
        }
    }

    /// Number of cells stored per row
    #[must_use]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Row size in 32-bit words
    #[must_use]
    pub fn row_size_words(&self) -> usize {
        self.row_size_words
    }

    /// Row size in bytes
    #[must_use]
    pub fn row_size_bytes(&self) -> usize {
        4 * self.row_size_words
    }
}

/// Extracts the call in `slot` (0..16) of a packed word
#[inline]
#[must_use]
pub fn call_bits(word: u32, slot: usize) -> u8 {
    ((word >> (2 * slot)) & 0b11) as u8
}

/// A selection of cells (columns) applied to decoded rows
///
/// Masks filter output columns only; storage is untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellMask {
    keep: Vec<bool>,
}
impl CellMask {
    #[must_use]
    pub fn new(keep: Vec<bool>) -> Self {
        Self { keep }
    }

    /// A mask keeping every one of `n_cells` cells
    #[must_use]
    pub fn all(n_cells: usize) -> Self {
        Self::new(vec![true; n_cells])
    }

    /// A mask keeping only the named cells
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownCell`] if a name is not among `cells`.
    pub fn from_names<S: AsRef<str>>(cells: &[String], selected: &[S]) -> Result<Self> {
        let mut keep = vec![false; cells.len()];
        for name in selected {
            let name = name.as_ref();
            let idx = cells
                .iter()
                .position(|cell| cell == name)
                .ok_or_else(|| LookupError::UnknownCell(name.to_string()))?;
            keep[idx] = true;
        }
        Ok(Self { keep })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Number of cells kept by the mask
    #[must_use]
    pub fn count_selected(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// Indices of the kept cells, ascending
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.keep
    }

    /// Checks that the mask covers exactly `n_cells` cells
    pub fn validate(&self, n_cells: usize) -> Result<()> {
        if self.keep.len() == n_cells {
            Ok(())
        } else {
            Err(LookupError::CellMaskLength {
                expected: n_cells,
                found: self.keep.len(),
            }
            .into())
        }
    }
}
impl From<Vec<bool>> for CellMask {
    fn from(keep: Vec<bool>) -> Self {
        Self::new(keep)
    }
}

/// Decodes `n_rows` packed rows into a table of call codes
///
/// Rows of the output follow the on-disk order. Columns are cells in ascending
/// order, restricted to `cell_mask` when given. When `row_mask` is given only the
/// rows it marks are unpacked and returned.
pub(crate) fn decode_rows(
    bytes: &[u8],
    n_rows: usize,
    layout: RowLayout,
    row_mask: Option<&[bool]>,
    cell_mask: Option<&CellMask>,
) -> Result<Array2<u8>> {
    let row_bytes = layout.row_size_bytes();
    if bytes.len() != n_rows * row_bytes {
        return Err(FormatError::RowBufferLength {
            expected: n_rows * row_bytes,
            found: bytes.len(),
        }
        .into());
    }

    let rows: Vec<usize> = match row_mask {
        Some(mask) if mask.len() != n_rows => {
            return Err(LookupError::RowMaskLength {
                expected: n_rows,
                found: mask.len(),
            }
            .into());
        }
        Some(mask) => {
            mask.iter()
                .enumerate()
                .filter_map(|(i, &k)| k.then_some(i))
                .collect()
        }
        None => (0..n_rows).collect(),
    };
    let columns: Vec<usize> = match cell_mask {
        Some(mask) => {
            mask.validate(layout.n_cells())?;
            mask.selected().collect()
        }
        None => (0..layout.n_cells()).collect(),
    };

    let mut table = Array2::<u8>::zeros((rows.len(), columns.len()));
    let mut words = vec![0u32; layout.row_size_words()];
    for (mut out, &row) in table.rows_mut().into_iter().zip(rows.iter()) {
        let start = row * row_bytes;
        LittleEndian::read_u32_into(&bytes[start..start + row_bytes], &mut words);
        for (call, &cell) in out.iter_mut().zip(columns.iter()) {
            *call = call_bits(words[cell / CELLS_PER_WORD], cell % CELLS_PER_WORD);
        }
    }
    Ok(table)
}
