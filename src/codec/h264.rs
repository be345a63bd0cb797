//! H.264 decoding via openh264

use bytes::Bytes;
use log::debug;
use openh264::decoder::{DecodedYUV, Decoder};
use openh264::formats::YUVSource;

use super::annexb::NalSplitter;
use super::{CodecAdapter, CodecError};
use crate::frame::{DecodedFrame, CHANNELS};

pub struct H264Codec {
    splitter: NalSplitter,
    decoder: Decoder,
}

impl H264Codec {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new().map_err(|e| CodecError::Internal(e.to_string()))?;
        Ok(Self {
            splitter: NalSplitter::new(),
            decoder,
        })
    }

    fn decode_nal(&mut self, nal: &[u8]) -> Result<Vec<DecodedFrame>, CodecError> {
        let picture = self
            .decoder
            .decode(nal)
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;

        match picture {
            Some(yuv) => Ok(vec![to_rgb_frame(&yuv)?]),
            None => Ok(Vec::new()),
        }
    }
}

fn to_rgb_frame(yuv: &DecodedYUV<'_>) -> Result<DecodedFrame, CodecError> {
    let (width, height) = yuv.dimensions();
    let (width, height) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(CodecError::Unsupported(format!(
                "picture {}x{} exceeds 16-bit geometry",
                width, height
            )))
        }
    };

    let mut rgb = vec![0u8; width as usize * height as usize * CHANNELS];
    yuv.write_rgb8(&mut rgb);
    debug!("Decoded {}x{} picture", width, height);

    DecodedFrame::new(width, height, rgb).map_err(|e| CodecError::Internal(e.to_string()))
}

impl CodecAdapter for H264Codec {
    type Unit = Bytes;

    fn parse(&mut self, data: &[u8]) -> Result<Vec<Bytes>, CodecError> {
        Ok(self.splitter.push(data))
    }

    fn decode(&mut self, unit: &Bytes) -> Result<Vec<DecodedFrame>, CodecError> {
        self.decode_nal(unit)
    }

    /// Decode the tail NAL, then drain pictures the decoder still holds.
    fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError> {
        let mut frames = match self.splitter.finish() {
            Some(tail) => self.decode_nal(&tail)?,
            None => Vec::new(),
        };

        let remaining = self
            .decoder
            .flush_remaining()
            .map_err(|e| CodecError::Internal(e.to_string()))?;
        for yuv in &remaining {
            frames.push(to_rgb_frame(yuv)?);
        }
        Ok(frames)
    }
}
