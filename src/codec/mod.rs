//! Video decoder adapters
//!
//! A [`CodecAdapter`] turns an arbitrary slicing of the compressed byte
//! stream into decoded RGB frames in two steps: `parse` buffers input and
//! returns whole coded units, `decode` turns one unit into zero or more
//! frames.

pub mod annexb;
pub mod h264;
pub mod raw;

use thiserror::Error;

use crate::frame::DecodedFrame;

pub use h264::H264Codec;
pub use raw::RawRgbCodec;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("codec invalid input: {0}")]
    InvalidInput(String),

    #[error("codec unsupported: {0}")]
    Unsupported(String),

    #[error("codec internal error: {0}")]
    Internal(String),
}

pub trait CodecAdapter {
    /// A parser-delimited chunk of the bitstream
    type Unit;

    /// Feed raw bytes; returns every coded unit completed by them.
    fn parse(&mut self, data: &[u8]) -> Result<Vec<Self::Unit>, CodecError>;

    fn decode(&mut self, unit: &Self::Unit) -> Result<Vec<DecodedFrame>, CodecError>;

    /// Drain whatever is still buffered once the stream has ended.
    fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError> {
        Ok(Vec::new())
    }
}
