//! Subscriber side of the shared frame segment

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::{default_segment_dir, SegmentHeader, HEADER_LEN};
use crate::error::{MirrorError, Result};
use crate::frame::CHANNELS;
use crate::geometry::Geometry;

/// Read-only view of the frame currently in a segment
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub rows: usize,
    pub cols: usize,
    data: &'a [u8],
}

impl<'a> FrameView<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn row(&self, row: usize) -> Option<&'a [u8]> {
        if row >= self.rows {
            return None;
        }
        let stride = self.cols * CHANNELS;
        Some(&self.data[row * stride..(row + 1) * stride])
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<[u8; 3]> {
        if col >= self.cols {
            return None;
        }
        let px = &self.row(row)?[col * CHANNELS..(col + 1) * CHANNELS];
        Some([px[0], px[1], px[2]])
    }
}

/// Reader attached to a segment created by another process
pub struct FrameSubscriber {
    name: String,
    path: PathBuf,
    map: Mmap,
    sequence: u32,
}

impl FrameSubscriber {
    pub fn attach(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(name);
        let file = File::open(&path)?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < HEADER_LEN {
            return Err(MirrorError::GeometryMismatch {
                capacity: map.len(),
                required: HEADER_LEN,
            });
        }

        Ok(Self {
            name: name.to_string(),
            path,
            map,
            sequence: 0,
        })
    }

    /// Attach in the platform default segment directory
    pub fn attach_default(name: &str) -> Result<Self> {
        Self::attach(&default_segment_dir(), name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence seen by the last successful `read`
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current header without touching the payload
    pub fn header(&self) -> Option<SegmentHeader> {
        SegmentHeader::decode(&self.map)
    }

    /// Geometry and pixels of the current frame.
    ///
    /// The view aliases the segment and is only valid until the next read;
    /// the publisher may overwrite it at any time.
    pub fn read(&mut self) -> Result<(Geometry, FrameView<'_>)> {
        let header = SegmentHeader::decode(&self.map).ok_or(MirrorError::StreamClosed)?;
        if header.is_closed() {
            return Err(MirrorError::StreamClosed);
        }

        let geometry = Geometry::new(header.width, header.height);
        let (rows, cols) = geometry.shape();
        let required = HEADER_LEN + geometry.payload_len();
        if required > self.map.len() {
            return Err(MirrorError::GeometryMismatch {
                capacity: self.map.len(),
                required,
            });
        }

        self.sequence = header.sequence;
        let view = FrameView {
            rows,
            cols,
            data: &self.map[HEADER_LEN..required],
        };
        Ok((geometry, view))
    }
}
