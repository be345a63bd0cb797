//! Frame geometry and orientation

use std::fmt;

use crate::frame::CHANNELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Width/height snapshot of a single frame.
///
/// Always rebuilt from the frame or segment header it describes; never kept
/// across a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
}

impl Geometry {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn long_side(&self) -> u16 {
        self.width.max(self.height)
    }

    pub fn short_side(&self) -> u16 {
        self.width.min(self.height)
    }

    /// Square frames count as landscape.
    pub fn orientation(&self) -> Orientation {
        if self.height > self.width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }

    /// (rows, cols) of the pixel grid for this orientation
    pub fn shape(&self) -> (usize, usize) {
        let long = self.long_side() as usize;
        let short = self.short_side() as usize;
        match self.orientation() {
            Orientation::Portrait => (long, short),
            Orientation::Landscape => (short, long),
        }
    }

    /// Bytes needed for one RGB frame of this size
    pub fn payload_len(&self) -> usize {
        self.long_side() as usize * self.short_side() as usize * CHANNELS
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
