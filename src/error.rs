use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("attribute list is empty")]
    EmptyAttrs,

    #[error("operation out of order: {0}")]
    OutOfOrder(&'static str),

    #[error("feature table is full: {reserved} entries reserved, feature {requested} would exceed them")]
    FeatureLimitExceeded { reserved: usize, requested: u8 },

    #[error("feature {0} was never begun")]
    FeatureNotStarted(u8),

    #[error("record type {record_type} of size {size} exceeds the wire size limit and is not splittable")]
    RecordNotSplittable { record_type: u32, size: usize },

    #[error("invalid magic number in file header")]
    InvalidMagic,

    #[error("unsupported header size: {0}")]
    UnsupportedHeaderSize(u64),

    #[error("unsupported attribute record size: {0}")]
    UnsupportedAttrSize(u64),

    #[error("record data truncated at byte {0}")]
    Truncated(usize),

    #[error("malformed split record sequence: {0}")]
    MalformedSplit(&'static str),

    #[error("container finalized but releasing the file failed: {0}")]
    CloseFailed(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecordFileError>;
