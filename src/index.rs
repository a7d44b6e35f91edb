//! The chromosome map
//!
//! Stored at the chromosome pointer: a `u32` chromosome count, one offset per
//! chromosome pointing at the chromosome's first entry in the position block, and
//! the chromosome names as newline-terminated lines. A chromosome's positions end
//! where the next chromosome's begin; the last one ends at the map itself.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{info, warn};

use crate::error::{FormatError, Result};
use crate::header::{read_lines, truncated, Header};
use crate::source::{ByteSource, SourceCursor};
use crate::POSITION_WORD_BYTES;

/// Per-chromosome sub-ranges of the position block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChromosomeIndex {
    /// Byte offset of each chromosome's first position
    positions_start: Vec<u64>,
    /// Byte offset one past each chromosome's last position
    positions_end: Vec<u64>,
    /// Chromosome names, aligned with the offsets
    names: Vec<String>,
}
impl ChromosomeIndex {
    /// Parses the chromosome map referenced by `header`
    pub fn read_from<S: ByteSource>(source: &mut S, header: &Header) -> Result<Self> {
        let width = header.offset_width;
        let mut cursor = SourceCursor::new(source, header.chromosome_start);

        let n_chromosomes = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("chromosome count", header.chromosome_start))?
            as usize;
        if n_chromosomes == 0 {
            return Err(FormatError::EmptyChromosomeMap.into());
        }
        if (n_chromosomes as u64).saturating_mul(width.bytes()) > cursor.remaining() {
            return Err(FormatError::Truncated("chromosome offsets", cursor.position()).into());
        }

        let mut positions_start = Vec::with_capacity(n_chromosomes);
        for _ in 0..n_chromosomes {
            let offset = width
                .read(&mut cursor)
                .map_err(truncated("chromosome offsets", cursor.position()))?;
            positions_start.push(offset);
        }
        let names_start = cursor.position();
        let (names, _) = read_lines(source, names_start, n_chromosomes, "chromosome names")?;

        let mut positions_end = positions_start[1..].to_vec();
        positions_end.push(header.chromosome_start);

        if positions_start[0] < header.data_start {
            return Err(FormatError::PositionsBeforeData {
                data_start: header.data_start,
                positions_start: positions_start[0],
            }
            .into());
        }
        for ((start, end), name) in positions_start.iter().zip(&positions_end).zip(&names) {
            if end < start {
                return Err(FormatError::NegativeChromosomeLength(name.clone()).into());
            }
        }

        let index = Self {
            positions_start,
            positions_end,
            names,
        };
        info!("File contains chromosomes: {:?}", index.names);
        index.check_conformance(header);
        Ok(index)
    }

    /// Number of chromosomes
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of the named chromosome
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    #[must_use]
    pub fn positions_start(&self) -> &[u64] {
        &self.positions_start
    }

    #[must_use]
    pub fn positions_end(&self) -> &[u64] {
        &self.positions_end
    }

    /// Byte offset of the first entry of the position block
    #[must_use]
    pub fn first_position_offset(&self) -> u64 {
        self.positions_start[0]
    }

    /// Number of CpG sites stored for each chromosome
    #[must_use]
    pub fn n_cpg_per_chromosome(&self) -> Vec<u64> {
        self.positions_start
            .iter()
            .zip(&self.positions_end)
            .map(|(start, end)| (end - start) / POSITION_WORD_BYTES)
            .collect()
    }

    /// Total number of CpG sites in the file
    #[must_use]
    pub fn n_cpg(&self) -> u64 {
        (self.positions_end[self.len() - 1] - self.positions_start[0]) / POSITION_WORD_BYTES
    }

    /// Size of the data block in bytes
    #[must_use]
    pub fn data_block_size(&self, header: &Header) -> u64 {
        self.positions_start[0] - header.data_start
    }

    /// Compares the data block size with the number of CpG sites
    ///
    /// A mismatch is logged but the file stays readable.
    pub fn check_conformance(&self, header: &Header) -> bool {
        let row_size = header.row_layout().row_size_bytes() as u64;
        let block_size = self.data_block_size(header);
        let n_cpg = self.n_cpg();
        let rows = if row_size == 0 {
            n_cpg
        } else {
            block_size / row_size
        };
        if rows == n_cpg && (row_size != 0 || block_size == 0) {
            true
        } else {
            warn!(
                "Data block of {block_size} bytes holds {rows} rows but {n_cpg} CpG sites are indexed"
            );
            false
        }
    }
}
