//! Video socket handshake
//!
//! Wire format sent by the device before the elementary stream:
//! - Codec tag (4 bytes, ASCII): "h264", "h265" or "\0av1"
//! - Width (4 bytes, BE)
//! - Height (4 bytes, BE)
//! - Coded video stream (remainder)

use std::fmt;
use std::io::{self, Read};

use bytes::Buf;
use log::{debug, info};

use crate::config::VideoSource;
use crate::error::{MirrorError, Result};

/// Size of the handshake after the codec tag
pub const SIZE_HEADER_LEN: usize = 8;

/// Checklist returned when a camera stream never announces its codec
pub const CAMERA_NEGOTIATION_HINTS: [&str; 6] = [
    "1. Check the requested max_size",
    "2. Check camera_ar / camera_size",
    "3. Do not set up a control socket in camera mode",
    "4. List the device cameras and their sizes, then pick a valid camera_id, ar or size",
    "5. Make sure the device runs Android 12 or newer",
    "6. Some devices do not support camera capture at all",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// Name used in server arguments
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
        }
    }

    /// Tag the device writes at the start of the video socket
    pub fn wire_tag(&self) -> [u8; 4] {
        match self {
            VideoCodec::H264 => *b"h264",
            VideoCodec::H265 => *b"h265",
            VideoCodec::Av1 => *b"\0av1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the device announced during the handshake.
///
/// The size is informational; frame geometry always comes from decoded
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
}

/// Read and validate the handshake. Blocks until it is complete.
pub fn read_handshake<R: Read>(
    stream: &mut R,
    expected: VideoCodec,
    source: &VideoSource,
) -> Result<StreamInfo> {
    let mut tag = [0u8; 4];
    let received = match read_full(stream, &mut tag) {
        Ok(n) => n,
        Err(e) if source.is_camera() => {
            debug!("Codec tag read failed: {}", e);
            0
        }
        Err(e) => return Err(e.into()),
    };

    if received == 0 && source.is_camera() {
        return Err(MirrorError::NegotiationFailed {
            hints: CAMERA_NEGOTIATION_HINTS.to_vec(),
        });
    }

    if received < tag.len() || tag != expected.wire_tag() {
        return Err(MirrorError::UnsupportedCodec(codec_name(&tag[..received])));
    }

    let mut size = [0u8; SIZE_HEADER_LEN];
    stream.read_exact(&mut size).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => MirrorError::ConnectionClosed,
        _ => MirrorError::Io(e),
    })?;

    let mut buf = &size[..];
    let width = buf.get_u32();
    let height = buf.get_u32();

    info!(
        "📺 Video socket connected! {} width: {}, height: {}",
        expected, width, height
    );

    Ok(StreamInfo {
        codec: expected,
        width,
        height,
    })
}

fn codec_name(tag: &[u8]) -> String {
    String::from_utf8_lossy(tag).trim_matches('\0').to_string()
}

/// Fill `buf` unless the stream ends first; returns the bytes read
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
