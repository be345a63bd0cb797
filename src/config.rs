//! Session configuration and the server arguments derived from it

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::VideoCodec;

/// Camera capture parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraConfig {
    pub camera_id: u32,
    /// e.g. "16:9"; ignored when `size` is set
    pub aspect_ratio: Option<String>,
    /// e.g. "1280x720"
    pub size: Option<String>,
    /// 0 leaves the frame rate to the device
    pub fps: u32,
}

impl CameraConfig {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("camera_id={}", self.camera_id)];

        if let Some(size) = self.size.as_deref().filter(|s| !s.is_empty()) {
            args.push(format!("camera_size={}", size));
        } else if let Some(ar) = self.aspect_ratio.as_deref().filter(|s| !s.is_empty()) {
            args.push(format!("camera_ar={}", ar));
        }

        if self.fps > 0 {
            args.push(format!("camera_fps={}", self.fps));
        }

        args
    }
}

/// Where the device takes its frames from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VideoSource {
    #[default]
    Display,
    Camera(CameraConfig),
}

impl VideoSource {
    pub fn name(&self) -> &'static str {
        match self {
            VideoSource::Display => "display",
            VideoSource::Camera(_) => "camera",
        }
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, VideoSource::Camera(_))
    }
}

/// Video session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Longest side requested from the device; `None` keeps native size
    pub max_size: Option<u32>,
    pub max_fps: u32,
    /// Bytes requested per socket read
    pub buffer_size: usize,
    pub codec: VideoCodec,
    pub source: VideoSource,
    /// Directory holding shared frame segments; platform default when unset
    pub segment_dir: Option<PathBuf>,
    /// Fixed segment name instead of a generated one
    pub segment_name: Option<String>,
    /// Poll interval while waiting for the first frame
    pub first_frame_poll: Duration,
    /// Poll interval of the publisher between frames
    pub publish_poll: Duration,
    /// How long `close` waits for the decode thread
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            max_fps: 90,
            buffer_size: 131072,
            codec: VideoCodec::H264,
            source: VideoSource::Display,
            segment_dir: None,
            segment_name: None,
            first_frame_poll: Duration::from_millis(1),
            publish_poll: Duration::from_micros(50),
            close_grace: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    /// `key=value` arguments for the device-side server
    pub fn to_args(&self) -> Vec<String> {
        let max_size = match self.max_size {
            Some(size) => size.to_string(),
            None => "none".to_string(),
        };

        let mut args = vec![
            "video=true".to_string(),
            format!("max_size={}", max_size),
            format!("max_fps={}", self.max_fps),
            format!("video_codec={}", self.codec.name()),
            format!("video_source={}", self.source.name()),
        ];

        if let VideoSource::Camera(camera) = &self.source {
            args.extend(camera.to_args());
        }

        args
    }
}
