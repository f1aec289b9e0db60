use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unrecognized container: {0}")]
    Format(String),
    #[error("{what} pointer {address:#010x} is not 4-byte aligned")]
    Alignment { what: &'static str, address: u32 },
    #[error("{what} at {address:#010x} (+{length} bytes) is outside the buffer")]
    Bounds {
        what: &'static str,
        address: u64,
        length: usize,
    },
    #[error("inconsistent module: {0}")]
    Consistency(String),
    #[error("{what} count {count} exceeds the limit of {limit}")]
    Limit {
        what: &'static str,
        count: usize,
        limit: usize,
    },
    #[error("mixing rate {0} Hz is outside the engine range")]
    InvalidMixingRate(u16),
}

impl CodecError {
    pub(crate) fn bounds(what: &'static str, address: impl Into<u64>, length: usize) -> Self {
        Self::Bounds {
            what,
            address: address.into(),
            length,
        }
    }

    pub(crate) fn limit(what: &'static str, count: usize, limit: usize) -> Self {
        Self::Limit { what, count, limit }
    }
}
