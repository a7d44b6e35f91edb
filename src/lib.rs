//! Reader for MetDense files.
//!
//! A MetDense file stores single-cell DNA methylation calls as a dense, bit-packed
//! matrix with one row per CpG site and one 2-bit call per cell. Rows are indexed by
//! a sorted position block and a chromosome map, which makes genomic range queries
//! a pair of binary searches followed by a single contiguous read.
//!
//! ```no_run
//! use metdense::MetDenseFile;
//!
//! fn main() -> metdense::Result<()> {
//!     let mut file = MetDenseFile::open("./data/cells.metdense")?;
//!     let calls = file.read_data_range("chr1", 3_000_000, 3_100_000, None)?;
//!     let positions = file.read_positions_range("chr1", 3_000_000, 3_100_000)?;
//!     assert_eq!(calls.nrows(), positions.len());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod header;
pub mod index;
pub mod locate;
pub mod reader;
pub mod smooth;
pub mod source;

pub use codec::{CallCode, CellMask, RowLayout};
pub use error::{Error, FormatError, LookupError, Result, SmoothError};
pub use header::{Header, OffsetWidth};
pub use index::ChromosomeIndex;
pub use locate::{PositionAccessor, PositionSpan};
pub use reader::{MetDenseFile, RangeData, ReaderOptions};
pub use smooth::{Coverage, DataPoints, KernelSmoother, Observations, SmootherConfig};
pub use source::{ByteSource, MmapSource, SeekSource};

/// Magic bytes at the start of every MetDense file
pub const FILE_MAGIC: &[u8; 8] = b"MetDense";

/// Width in bytes of one entry of the position block as seen by the position search.
///
/// Files from version 0.1 onward declare 8-byte offsets in their header, but the
/// position block is still searched and decoded as 4-byte little-endian words. Both
/// behaviours are kept so that files written by the existing tooling stay readable.
pub const POSITION_WORD_BYTES: u64 = 4;

/// Number of 2-bit calls packed into one 32-bit word of a data row
pub const CELLS_PER_WORD: usize = 16;
