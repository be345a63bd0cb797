//! Uncompressed RGB framing
//!
//! Frame format:
//! - Magic (4 bytes): "RGB3"
//! - Width (2 bytes, BE)
//! - Height (2 bytes, BE)
//! - Data (width * height * 3 bytes)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;

use super::{CodecAdapter, CodecError};
use crate::frame::{DecodedFrame, CHANNELS};

/// Magic bytes for a raw frame
pub const RAW_MAGIC: &[u8; 4] = b"RGB3";

/// Raw frame header size
pub const RAW_HEADER_SIZE: usize = 8;

/// One complete raw frame cut from the stream
#[derive(Debug, Clone)]
pub struct RawUnit {
    pub width: u16,
    pub height: u16,
    pub data: Bytes,
}

/// Encode a frame in raw wire format
pub fn encode_raw_frame(width: u16, height: u16, data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(RAW_HEADER_SIZE + data.len());
    out.put_slice(RAW_MAGIC);
    out.put_u16(width);
    out.put_u16(height);
    out.put_slice(data);
    out
}

/// Codec for streams of raw RGB frames
pub struct RawRgbCodec {
    buffer: BytesMut,
}

impl RawRgbCodec {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024 * 1024),
        }
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn next_unit(&mut self) -> Option<RawUnit> {
        loop {
            if self.buffer.len() < RAW_HEADER_SIZE {
                return None;
            }

            if &self.buffer[0..4] != RAW_MAGIC {
                // Skip to the next magic, keeping a possible partial one
                match self.find_magic() {
                    Some(pos) => self.buffer.advance(pos),
                    None => {
                        let keep = RAW_MAGIC.len() - 1;
                        let drop = self.buffer.len().saturating_sub(keep);
                        debug!("Dropping {} bytes of unframed data", drop);
                        self.buffer.advance(drop);
                        return None;
                    }
                }
                continue;
            }

            let width = u16::from_be_bytes([self.buffer[4], self.buffer[5]]);
            let height = u16::from_be_bytes([self.buffer[6], self.buffer[7]]);
            let data_size = width as usize * height as usize * CHANNELS;

            if self.buffer.len() < RAW_HEADER_SIZE + data_size {
                return None;
            }

            self.buffer.advance(RAW_HEADER_SIZE);
            let data = self.buffer.split_to(data_size).freeze();
            return Some(RawUnit { width, height, data });
        }
    }

    fn find_magic(&self) -> Option<usize> {
        self.buffer.windows(4).position(|w| w == RAW_MAGIC)
    }
}

impl Default for RawRgbCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecAdapter for RawRgbCodec {
    type Unit = RawUnit;

    fn parse(&mut self, data: &[u8]) -> Result<Vec<RawUnit>, CodecError> {
        self.buffer.extend_from_slice(data);
        let mut units = Vec::new();
        while let Some(unit) = self.next_unit() {
            units.push(unit);
        }
        Ok(units)
    }

    fn decode(&mut self, unit: &RawUnit) -> Result<Vec<DecodedFrame>, CodecError> {
        if unit.width == 0 || unit.height == 0 {
            return Err(CodecError::InvalidInput(format!(
                "empty frame {}x{}",
                unit.width, unit.height
            )));
        }
        let frame = DecodedFrame::new(unit.width, unit.height, unit.data.to_vec())
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
        Ok(vec![frame])
    }
}
