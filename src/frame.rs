//! Decoded frames and the single-slot latest-frame store
//!
//! The decode thread is the only writer of a [`FrameStore`]. Every new frame
//! replaces the previous slot as a whole and only then advances the sequence
//! counter, so a reader that observed sequence `N` always finds frame `N` or
//! a newer one in the slot. The slot carries its own sequence, so a
//! snapshot never pairs a frame with another frame's number.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::{MirrorError, Result};
use crate::geometry::Geometry;

/// Interleaved RGB
pub const CHANNELS: usize = 3;

/// One decoded picture, RGB24, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl DecodedFrame {
    pub fn new(width: u16, height: u16, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * CHANNELS {
            return Err(MirrorError::InvalidFrame {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.width, self.height)
    }
}

struct Sequenced {
    sequence: u32,
    frame: Arc<DecodedFrame>,
}

/// Latest decoded frame plus its sequence number.
///
/// Sequence 0 means "no frame yet". Wrapping past `u32::MAX` frames is not
/// handled.
#[derive(Default)]
pub struct FrameStore {
    current: ArcSwapOption<Sequenced>,
    sequence: AtomicU32,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame and return its sequence number. Only the
    /// decode thread pushes.
    pub fn push(&self, frame: DecodedFrame) -> u32 {
        let sequence = self.sequence.load(Ordering::Relaxed) + 1;
        self.current.store(Some(Arc::new(Sequenced {
            sequence,
            frame: Arc::new(frame),
        })));
        self.sequence.store(sequence, Ordering::Release);
        sequence
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<Arc<DecodedFrame>> {
        self.current.load_full().map(|slot| slot.frame.clone())
    }

    /// Current frame together with the sequence it was pushed as
    pub fn snapshot(&self) -> (u32, Option<Arc<DecodedFrame>>) {
        match self.current.load_full() {
            Some(slot) => (slot.sequence, Some(slot.frame.clone())),
            None => (0, None),
        }
    }

    pub fn has_frame(&self) -> bool {
        self.sequence() > 0
    }
}
