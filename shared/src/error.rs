//! Error taxonomy for the subway wire protocol (spec.md §7: `FrameError`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The 10-byte length header was not a parseable non-negative integer.
    #[error("invalid frame header: {0:?}")]
    InvalidHeader(String),

    /// The header's length exceeds [`crate::protocol::MAX_FRAME`].
    #[error("frame of {0} bytes exceeds MAX_FRAME ({max} bytes)", max = crate::protocol::MAX_FRAME)]
    FrameTooLarge(usize),

    /// The stream closed mid-payload, after a valid header was read.
    #[error("short read inside frame payload")]
    ShortRead,

    /// The payload was not valid JSON, or decoded to an unknown message type.
    #[error("malformed frame payload: {0}")]
    Malformed(String),

    /// Transport-level failure (reset, refused, write-after-close, ...).
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
