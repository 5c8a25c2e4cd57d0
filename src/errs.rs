use std::path::PathBuf;

pub type MsResult<T> = Result<T, MsError>;

#[derive(thiserror::Error, Debug)]
pub enum MsError {
    #[error("k-mer size {0} is out of range, must be in [1, 31]")]
    InvalidKmerSize(u32),
    #[error("modimizer window {0} must be >= 1")]
    InvalidWindow(u64),
    #[error("table bits {0} out of range, must be in [20, 34]")]
    InvalidTableBits(u32),
    #[error(
        "requested capacity {requested} exceeds 25% of table size {table_size}"
    )]
    CapacityOverLoadFactor { requested: u64, table_size: u64 },
    #[error("modset is full, {max} entries, pick a larger table-bits")]
    ModsetFull { max: u64 },
    #[error("bad magic in {path:?}, expected {expected:?} found {found:?}")]
    BadMagic { path: PathBuf, expected: [u8; 8], found: [u8; 8] },
    #[error("truncated or corrupt file {path:?}, {context}")]
    CorruptFile { path: PathBuf, context: String },
    #[error("cannot merge modsets with different hashers (k/w/factor)")]
    IncompatibleMerge,
    #[error(
        "gap of {gap}bp between modimizer hits in read {read_id} exceeds the \
         65535bp limit"
    )]
    GapOverflow { read_id: String, gap: u64 },
    #[error("sequence file {0:?} has an unrecognized extension")]
    UnknownSequenceFormat(PathBuf),
    #[error("read id {0} is out of range for this read set")]
    InvalidReadId(u32),
    #[error("io error, {0}")]
    Io(#[from] std::io::Error),
}
