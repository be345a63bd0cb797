//! Error types for mirror-video

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Video codec negotiation failed, check:\n{}", .hints.join("\n"))]
    NegotiationFailed { hints: Vec<&'static str> },

    #[error("Video codec >{0}< not supported")]
    UnsupportedCodec(String),

    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("Video stream closed")]
    StreamClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame needs {required} bytes but the segment holds {capacity}")]
    GeometryMismatch { capacity: usize, required: usize },

    #[error("Invalid frame: {width}x{height} with {len} bytes of RGB data")]
    InvalidFrame { width: u16, height: u16, len: usize },
}

pub type Result<T> = std::result::Result<T, MirrorError>;
