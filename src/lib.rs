//! mirror-video: video plane of a device screen-mirroring client
//!
//! Terminates the video socket, decodes the elementary stream into RGB
//! frames and republishes the latest frame through a shared memory segment
//! that other processes can read without touching the socket or decoder.

pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod protocol;
pub mod session;
pub mod shm;

pub use config::{CameraConfig, SessionConfig, VideoSource};
pub use error::{MirrorError, Result};
pub use frame::{DecodedFrame, FrameStore};
pub use geometry::{Geometry, Orientation};
pub use protocol::{StreamInfo, VideoCodec};
pub use session::{SessionState, VideoSession};
pub use shm::{FrameSubscriber, FrameView};
