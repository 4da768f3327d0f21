//! Error types for the core library.

use std::fmt;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Application id outside of `0..2^31`
    InvalidNameserviceId(i64),
    /// Range with start after end
    InvalidRange { start: u64, end: u64 },
    /// Range whose first and last chunk have different creators
    MixedCreators { start: u64, end: u64 },
    /// Nameservice export buffer with a length that is not a multiple of the record size
    MalformedEntries(usize),
    /// Configuration value out of bounds
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidNameserviceId(id) => {
                write!(f, "Invalid nameservice id: {} (must be in 0..2^31)", id)
            }
            Error::InvalidRange { start, end } => {
                write!(f, "Invalid range: start 0x{:X} is after end 0x{:X}", start, end)
            }
            Error::MixedCreators { start, end } => {
                write!(f, "Range 0x{:016X}..0x{:016X} spans two creators", start, end)
            }
            Error::MalformedEntries(len) => {
                write!(f, "Malformed nameservice buffer: {} bytes", len)
            }
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
