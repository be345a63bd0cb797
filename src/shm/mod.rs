//! Shared frame segment
//!
//! Layout of a segment:
//! - Sequence (4 bytes, BE); 0 means the publisher has closed the channel
//! - Height (2 bytes, BE)
//! - Width (2 bytes, BE)
//! - RGB payload (long_side * short_side * 3 bytes, row-major)
//!
//! The payload region is sized once from the first frame. Readers pick the
//! portrait (long x short) or landscape (short x long) view of the same bytes
//! from the header on every read.
//!
//! Segments are plain files in a shared directory, mapped into memory by the
//! publisher and every subscriber. On Linux the default directory is
//! `/dev/shm`, which is where POSIX shared memory objects live.

pub mod publisher;
pub mod subscriber;

use std::path::PathBuf;

use bytes::{Buf, BufMut};
use rand::Rng;

pub use publisher::{publish_loop, PublishSettings, SharedFramePublisher};
pub use subscriber::{FrameSubscriber, FrameView};

/// Header size in bytes
pub const HEADER_LEN: usize = 8;

/// Sequence value written when the channel closes
pub const CLOSED_SEQUENCE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub sequence: u32,
    pub height: u16,
    pub width: u16,
}

impl SegmentHeader {
    /// Write into the first `HEADER_LEN` bytes of `out`
    pub fn encode_into(&self, out: &mut [u8]) {
        let mut buf = &mut out[..HEADER_LEN];
        buf.put_u32(self.sequence);
        buf.put_u16(self.height);
        buf.put_u16(self.width);
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let mut buf = &data[..HEADER_LEN];
        Some(Self {
            sequence: buf.get_u32(),
            height: buf.get_u16(),
            width: buf.get_u16(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sequence == CLOSED_SEQUENCE
    }
}

/// Where segments are created when no directory is configured
pub fn default_segment_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

/// Fresh segment name, e.g. `vf_1017142501_48213`.
///
/// Kept under 31 characters for platforms with short shm name limits.
pub fn segment_name() -> String {
    format!(
        "vf_{}_{}",
        chrono::Local::now().format("%m%d%H%M%S"),
        rand::thread_rng().gen_range(10000..99999)
    )
}
