#![allow(dead_code)]

use std::io::Write;

use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

/// One chromosome of a fixture file: sorted positions and one call row per position
#[derive(Clone, Debug)]
pub struct FixtureChromosome {
    pub name: String,
    pub positions: Vec<u32>,
    pub calls: Array2<u8>,
}

/// Writes MetDense files the way the conversion tooling does
pub struct FixtureBuilder {
    version: (u32, u32),
    cells: Vec<String>,
    chromosomes: Vec<FixtureChromosome>,
    blank_line: bool,
    extra_rows: usize,
}
impl FixtureBuilder {
    pub fn new(n_cells: usize) -> Self {
        Self {
            version: (0, 0),
            cells: (0..n_cells).map(|i| format!("cell_{i}")).collect(),
            chromosomes: Vec::new(),
            blank_line: false,
            extra_rows: 0,
        }
    }

    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.version = (major, minor);
        self
    }

    /// Writes an empty line after the cell names, as the legacy encoder did
    pub fn blank_line(mut self, blank_line: bool) -> Self {
        self.blank_line = blank_line;
        self
    }

    /// Appends rows to the data block that no position refers to
    pub fn extra_rows(mut self, extra_rows: usize) -> Self {
        self.extra_rows = extra_rows;
        self
    }

    pub fn chromosome(mut self, name: &str, positions: Vec<u32>, calls: Array2<u8>) -> Self {
        assert_eq!(positions.len(), calls.nrows());
        assert_eq!(calls.ncols(), self.cells.len());
        self.chromosomes.push(FixtureChromosome {
            name: name.to_string(),
            positions,
            calls,
        });
        self
    }

    /// A chromosome with random calls at the given positions
    pub fn random_chromosome(self, name: &str, positions: Vec<u32>, rng: &mut SmallRng) -> Self {
        let calls = random_calls(rng, positions.len(), self.cells.len());
        self.chromosome(name, positions, calls)
    }

    pub fn chromosomes(&self) -> &[FixtureChromosome] {
        &self.chromosomes
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    fn wide(&self) -> bool {
        self.version != (0, 0)
    }

    fn write_offset(&self, bytes: &mut Vec<u8>, value: u64) {
        if self.wide() {
            bytes.extend_from_slice(&value.to_le_bytes());
        } else {
            bytes.extend_from_slice(&(value as u32).to_le_bytes());
        }
    }

    fn patch_offset(&self, bytes: &mut [u8], at: usize, value: u64) {
        if self.wide() {
            bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        } else {
            bytes[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let width = if self.wide() { 8 } else { 4 };
        let mut bytes = b"MetDense".to_vec();
        bytes.extend_from_slice(&self.version.0.to_le_bytes());
        bytes.extend_from_slice(&self.version.1.to_le_bytes());
        self.write_offset(&mut bytes, 0);
        self.write_offset(&mut bytes, 0);
        bytes.extend_from_slice(&(self.cells.len() as u32).to_le_bytes());
        for cell in &self.cells {
            bytes.extend_from_slice(cell.as_bytes());
            bytes.push(b'\n');
        }
        if self.blank_line {
            bytes.push(b'\n');
        }

        let data_start = bytes.len() as u64;
        for chrom in &self.chromosomes {
            for row in chrom.calls.rows() {
                bytes.extend_from_slice(&pack_row(row.as_slice().unwrap()));
            }
        }
        let n_cells = self.cells.len();
        for _ in 0..self.extra_rows {
            bytes.extend_from_slice(&pack_row(&vec![0u8; n_cells]));
        }

        let mut positions_start = Vec::new();
        for chrom in &self.chromosomes {
            positions_start.push(bytes.len() as u64);
            for position in &chrom.positions {
                bytes.extend_from_slice(&position.to_le_bytes());
            }
        }

        let chromosome_start = bytes.len() as u64;
        bytes.extend_from_slice(&(self.chromosomes.len() as u32).to_le_bytes());
        for &start in &positions_start {
            self.write_offset(&mut bytes, start);
        }
        for chrom in &self.chromosomes {
            bytes.extend_from_slice(chrom.name.as_bytes());
            bytes.push(b'\n');
        }

        self.patch_offset(&mut bytes, 16, data_start);
        self.patch_offset(&mut bytes, 16 + width, chromosome_start);
        bytes
    }

    pub fn write_temp(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.encode()).unwrap();
        file.flush().unwrap();
        file
    }

    /// Positions and calls of `chromosome` within `lower..=upper`
    pub fn expected(&self, chromosome: &str, lower: u64, upper: u64) -> (Vec<u32>, Array2<u8>) {
        let chrom = self
            .chromosomes
            .iter()
            .find(|c| c.name == chromosome)
            .unwrap();
        let rows: Vec<usize> = chrom
            .positions
            .iter()
            .enumerate()
            .filter(|(_, &p)| (lower..=upper).contains(&u64::from(p)))
            .map(|(i, _)| i)
            .collect();
        let positions = rows.iter().map(|&i| chrom.positions[i]).collect();
        let calls = chrom.calls.select(ndarray::Axis(0), &rows);
        (positions, calls)
    }
}

/// Packs one row of calls, lowest cell in the lowest bits of each word
pub fn pack_row(calls: &[u8]) -> Vec<u8> {
    let mut words = vec![0u32; calls.len().div_ceil(16)];
    for (cell, &call) in calls.iter().enumerate() {
        words[cell / 16] |= u32::from(call & 0b11) << (2 * (cell % 16));
    }
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn random_calls(rng: &mut SmallRng, n_rows: usize, n_cells: usize) -> Array2<u8> {
    Array2::from_shape_fn((n_rows, n_cells), |_| rng.random_range(0..3))
}

/// `n` strictly ascending positions starting at `start` with gaps up to `max_gap`
pub fn random_positions(rng: &mut SmallRng, start: u32, n: usize, max_gap: u32) -> Vec<u32> {
    let mut position = start;
    (0..n)
        .map(|_| {
            position += rng.random_range(1..=max_gap);
            position
        })
        .collect()
}

pub fn rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}
