/// Custom Result type for metdense operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the metdense library, encompassing all possible error cases
/// that can occur while opening and querying a file.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The header or chromosome map is malformed or truncated
    #[error("Error processing file layout: {0}")]
    FormatError(#[from] FormatError),

    /// A query could not be resolved against the file
    #[error("Error resolving query: {0}")]
    LookupError(#[from] LookupError),

    /// Invalid input to the kernel smoother
    #[error("Error smoothing calls: {0}")]
    SmoothError(#[from] SmoothError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Checks if the error only invalidates the query that produced it
    ///
    /// Lookup errors leave the file handle usable, so a caller can retry with
    /// a different chromosome or range.
    #[must_use]
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::LookupError(_))
    }
}

/// Errors raised while parsing the header and the chromosome map
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The magic bytes do not spell `MetDense`
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 8]),

    /// The file ended before the named section could be read
    ///
    /// # Arguments
    /// * `&'static str` - The section being read
    /// * `u64` - The byte offset of the failed read
    #[error("File truncated while reading {0} at byte {1}")]
    Truncated(&'static str, u64),

    /// Fewer newline-terminated names were found than declared
    #[error("Expected {expected} {section}, found only {found}")]
    MissingNames {
        section: &'static str,
        expected: usize,
        found: usize,
    },

    /// A cell or chromosome name is not valid UTF-8
    #[error("Name at byte {0} is not valid UTF-8")]
    InvalidName(u64),

    /// The data block pointer does not precede the chromosome map pointer
    #[error("Data start ({data_start}) must precede chromosome start ({chromosome_start})")]
    MisorderedPointers {
        data_start: u64,
        chromosome_start: u64,
    },

    /// A pointer refers to a byte beyond the end of the file
    #[error("Pointer {name} ({offset}) lies beyond the end of the file ({file_size} bytes)")]
    PointerOutOfBounds {
        name: &'static str,
        offset: u64,
        file_size: u64,
    },

    /// The position block starts before the data block
    #[error("Position block ({positions_start}) starts before the data block ({data_start})")]
    PositionsBeforeData {
        data_start: u64,
        positions_start: u64,
    },

    /// A block of packed rows does not hold the expected number of bytes
    #[error("Row block holds {found} bytes, expected {expected}")]
    RowBufferLength { expected: usize, found: usize },

    /// The chromosome map declares no chromosomes
    #[error("Chromosome map is empty")]
    EmptyChromosomeMap,

    /// Position offsets in the chromosome map decrease
    #[error("Chromosome {0} has a negative number of positions")]
    NegativeChromosomeLength(String),
}

/// Errors raised by individual queries
///
/// None of these invalidate the file handle.
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("Requested chromosome does not exist: {0}")]
    UnknownChromosome(String),

    #[error("Upper range ({upper}) is not larger than lower range ({lower})")]
    InvertedRange { lower: u64, upper: u64 },

    #[error("Upper bound ({0}) does not include anything")]
    BelowChromosome(u64),

    #[error("Lower bound ({0}) does not include anything")]
    AboveChromosome(u64),

    #[error("A single position was requested, but {0} does not exist")]
    MissingPosition(u64),

    #[error("Chromosome {0} has no positions")]
    EmptyChromosome(String),

    /// Attempted to access a position word beyond the end of the file
    #[error("Requested word index ({requested_index}) is beyond end of file ({max_index})")]
    OutOfRange {
        requested_index: u64,
        max_index: u64,
    },

    #[error("Cell mask has {found} entries but the file has {expected} cells")]
    CellMaskLength { expected: usize, found: usize },

    #[error("Unknown cell name: {0}")]
    UnknownCell(String),

    #[error("Row mask has {found} entries but the span has {expected} rows")]
    RowMaskLength { expected: usize, found: usize },
}

/// Errors raised by the kernel smoother and its derived views
#[derive(thiserror::Error, Debug)]
pub enum SmoothError {
    #[error("Kernel width must be positive and finite, got {0}")]
    InvalidWidth(f64),

    #[error("Expected one pseudotime per cell ({expected}), got {found}")]
    PseudotimeLength { expected: usize, found: usize },

    #[error("Expected one position per row ({expected}), got {found}")]
    PositionLength { expected: usize, found: usize },

    #[error("Bin width must be non-zero")]
    InvalidBinWidth,
}
