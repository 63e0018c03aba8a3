use thiserror::Error;

#[derive(Error, Debug)]
pub enum RomError {
    #[error("Archive decode error: {0}")]
    Decode(String),

    #[error("Allocation exhausted: no free run of {length} bytes")]
    AllocationExhausted { length: usize },

    #[error("Relocation anchor not found in executable")]
    AnchorNotFound,

    #[error("Relocation anchor is ambiguous: {count} matches")]
    AmbiguousAnchor { count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid length: {0}")]
    InvalidLength(usize),

    #[error("Access out of bounds: {length} bytes at {offset:#x} (size {size:#x})")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("Record index {index} out of range ({count} records)")]
    RecordOutOfRange { index: usize, count: usize },

    #[error("Pointer {field} holds {value:#010x}, outside the executable")]
    InvalidPointer { field: &'static str, value: u32 },

    #[error("Unknown file slot: {0}")]
    UnknownSlot(String),

    #[error("Operation out of order: {0}")]
    SessionOrder(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid platform layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, RomError>;

impl From<toml::de::Error> for RomError {
    fn from(err: toml::de::Error) -> Self {
        RomError::Config(err.to_string())
    }
}
