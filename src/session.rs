//! Video session lifecycle
//!
//! A session owns the connected video socket. `start` runs the handshake
//! on the caller's thread, then spawns two workers:
//!
//! - `video-decode`: socket -> codec -> [`FrameStore`]
//! - `video-share`: [`FrameStore`] -> shared frame segment
//!
//! Both workers poll a shared running flag; `close` clears it and waits for
//! them. There is no other signalling between the threads.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::codec::CodecAdapter;
use crate::config::SessionConfig;
use crate::decoder::{DecodeLoop, DecodeStats};
use crate::error::{MirrorError, Result};
use crate::frame::{DecodedFrame, FrameStore};
use crate::geometry::Geometry;
use crate::protocol::{read_handshake, StreamInfo};
use crate::shm::{default_segment_dir, publish_loop, FrameSubscriber, PublishSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Handshaking,
    Streaming,
    Stopping,
    Closed,
}

pub struct VideoSession<S, C> {
    config: SessionConfig,
    segment_dir: PathBuf,
    state: SessionState,
    stream: Option<S>,
    codec: Option<C>,
    running: Arc<AtomicBool>,
    store: Arc<FrameStore>,
    stats: Arc<DecodeStats>,
    segment: Arc<OnceLock<String>>,
    stream_info: Option<StreamInfo>,
    decode_worker: Option<JoinHandle<()>>,
    share_worker: Option<JoinHandle<Result<()>>>,
}

impl<C> VideoSession<TcpStream, C>
where
    C: CodecAdapter + Send + 'static,
{
    /// Connect to the device video socket
    pub fn connect<A: ToSocketAddrs>(config: SessionConfig, codec: C, addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!("🔗 Video socket connected to {}", stream.peer_addr()?);
        Ok(Self::with_stream(config, codec, stream))
    }
}

impl<S, C> VideoSession<S, C>
where
    S: Read + Send + 'static,
    C: CodecAdapter + Send + 'static,
{
    /// Session without a connection; `start` is a no-op until one exists
    pub fn new(config: SessionConfig, codec: C) -> Self {
        let segment_dir = config
            .segment_dir
            .clone()
            .unwrap_or_else(default_segment_dir);

        Self {
            config,
            segment_dir,
            state: SessionState::Created,
            stream: None,
            codec: Some(codec),
            running: Arc::new(AtomicBool::new(false)),
            store: Arc::new(FrameStore::new()),
            stats: Arc::new(DecodeStats::default()),
            segment: Arc::new(OnceLock::new()),
            stream_info: None,
            decode_worker: None,
            share_worker: None,
        }
    }

    /// Session over an already connected stream
    pub fn with_stream(config: SessionConfig, codec: C, stream: S) -> Self {
        let mut session = Self::new(config, codec);
        session.stream = Some(stream);
        session.running.store(true, Ordering::Release);
        session
    }

    /// Handshake, spawn the workers and block until the first frame is
    /// decoded and shared.
    pub fn start(&mut self) -> Result<()> {
        let (mut stream, codec) = match (self.state, self.stream.take(), self.codec.take()) {
            (SessionState::Created, Some(stream), Some(codec)) if self.is_running() => {
                (stream, codec)
            }
            (_, stream, codec) => {
                self.stream = stream;
                self.codec = codec;
                warn!("Video socket connection not ready!");
                return Ok(());
            }
        };

        self.state = SessionState::Handshaking;
        match read_handshake(&mut stream, self.config.codec, &self.config.source) {
            Ok(info) => self.stream_info = Some(info),
            Err(e) => {
                error!("❌ Video handshake failed: {}", e);
                self.running.store(false, Ordering::Release);
                self.state = SessionState::Closed;
                return Err(e);
            }
        }

        if let Err(e) = self.spawn_workers(stream, codec) {
            self.close();
            return Err(e.into());
        }
        self.state = SessionState::Streaming;

        self.wait_ready()
    }

    fn spawn_workers(&mut self, stream: S, codec: C) -> std::io::Result<()> {
        let decode = DecodeLoop::new(
            stream,
            codec,
            self.config.buffer_size,
            self.store.clone(),
            self.running.clone(),
            self.stats.clone(),
        );
        self.decode_worker = Some(
            thread::Builder::new()
                .name("video-decode".to_string())
                .spawn(move || decode.run())?,
        );

        let settings = PublishSettings {
            dir: self.segment_dir.clone(),
            name: self.config.segment_name.clone(),
            first_frame_poll: self.config.first_frame_poll,
            publish_poll: self.config.publish_poll,
        };
        let store = self.store.clone();
        let running = self.running.clone();
        let segment = self.segment.clone();
        self.share_worker = Some(
            thread::Builder::new()
                .name("video-share".to_string())
                .spawn(move || publish_loop(store, running, settings, segment))?,
        );

        Ok(())
    }

    fn wait_ready(&mut self) -> Result<()> {
        loop {
            if self.store.has_frame() && self.segment.get().is_some() {
                info!(
                    "✅ Video session streaming, shared frame > {} <",
                    self.segment.get().map(String::as_str).unwrap_or_default()
                );
                return Ok(());
            }

            if self.share_worker.as_ref().is_some_and(|h| h.is_finished()) {
                let result = match self.share_worker.take().map(JoinHandle::join) {
                    Some(Ok(Err(e))) => Err(e),
                    _ => Err(MirrorError::ConnectionClosed),
                };
                self.close();
                return result;
            }

            let decode_done = self.decode_worker.as_ref().is_some_and(|h| h.is_finished());
            if decode_done && !self.store.has_frame() {
                warn!("Video stream ended before the first frame");
                self.close();
                return Err(MirrorError::ConnectionClosed);
            }

            thread::sleep(self.config.first_frame_poll);
        }
    }
}

impl<S, C> VideoSession<S, C> {
    /// Stop both workers and release the stream and segment. Safe to call
    /// more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.running.store(false, Ordering::Release);
        self.state = SessionState::Stopping;

        if let Some(handle) = self.share_worker.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Shared frame thread failed: {}", e),
                Err(_) => error!("Shared frame thread panicked"),
            }
        }

        if let Some(handle) = self.decode_worker.take() {
            let deadline = Instant::now() + self.config.close_grace;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(self.config.first_frame_poll);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("Decode thread panicked");
                }
            } else {
                // Blocked in a read; it exits on the next read or EOF
                warn!("Decode thread still blocked on the video socket, detaching");
            }
        }

        self.stream = None;
        self.state = SessionState::Closed;
        warn!("VideoSession socket closed.");
        debug!(
            "Session stats: {} reads, {} frames, {} errors",
            self.stats.reads(),
            self.stats.frames(),
            self.stats.errors()
        );
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Latest decoded frame
    pub fn get_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.store.current()
    }

    /// Geometry of the latest decoded frame
    pub fn coordinate(&self) -> Option<Geometry> {
        self.store.current().map(|frame| frame.geometry())
    }

    pub fn sequence(&self) -> u32 {
        self.store.sequence()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream_info
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn segment_name(&self) -> Option<&str> {
        self.segment.get().map(String::as_str)
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    /// Attach a reader to this session's segment
    pub fn subscribe(&self) -> Result<FrameSubscriber> {
        let name = self.segment_name().ok_or(MirrorError::StreamClosed)?;
        FrameSubscriber::attach(&self.segment_dir, name)
    }

    /// Arguments for the device-side server
    pub fn to_args(&self) -> Vec<String> {
        self.config.to_args()
    }
}

impl<S, C> Drop for VideoSession<S, C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;
    use crate::codec::raw::encode_raw_frame;
    use crate::codec::RawRgbCodec;
    use crate::geometry::Orientation;

    type TestSession = VideoSession<Cursor<Vec<u8>>, RawRgbCodec>;

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig {
            segment_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn stream(tag: &[u8], frames: &[(u16, u16, u8)]) -> Cursor<Vec<u8>> {
        let mut wire = tag.to_vec();
        wire.extend_from_slice(&1080u32.to_be_bytes());
        wire.extend_from_slice(&1920u32.to_be_bytes());
        for &(width, height, value) in frames {
            let data = vec![value; width as usize * height as usize * 3];
            wire.extend_from_slice(&encode_raw_frame(width, height, &data));
        }
        Cursor::new(wire)
    }

    fn wait_for_sequence(session: &TestSession, sequence: u32) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.sequence() < sequence {
            assert!(Instant::now() < deadline, "timed out waiting for frame {}", sequence);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_start_is_a_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::with_stream(
            config(dir.path()),
            RawRgbCodec::new(),
            stream(b"h264", &[(2, 4, 1), (4, 2, 2), (2, 4, 3)]),
        );

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.get_frame().is_some());
        assert!(session.segment_name().is_some());
        assert_eq!(
            session.stream_info(),
            Some(StreamInfo {
                codec: crate::protocol::VideoCodec::H264,
                width: 1080,
                height: 1920
            })
        );

        wait_for_sequence(&session, 3);
        let coordinate = session.coordinate().unwrap();
        assert_eq!(coordinate, Geometry::new(2, 4));
        assert_eq!(coordinate.orientation(), Orientation::Portrait);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_subscriber_follows_and_sees_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::with_stream(
            config(dir.path()),
            RawRgbCodec::new(),
            stream(b"h264", &[(2, 4, 1), (4, 2, 2)]),
        );
        session.start().unwrap();
        wait_for_sequence(&session, 2);

        let mut subscriber = session.subscribe().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while subscriber.header().map(|h| h.sequence) != Some(2) {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }

        {
            let (geometry, view) = subscriber.read().unwrap();
            assert_eq!(geometry.orientation(), Orientation::Landscape);
            assert_eq!((view.rows, view.cols), (2, 4));
            assert_eq!(view.pixel(1, 3), Some([2, 2, 2]));
        }

        let path = subscriber.path().to_path_buf();
        session.close();

        assert_eq!(subscriber.header().unwrap().sequence, 0);
        assert!(matches!(subscriber.read(), Err(MirrorError::StreamClosed)));
        assert!(!path.exists());
    }

    #[test]
    fn test_codec_mismatch_never_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::with_stream(
            config(dir.path()),
            RawRgbCodec::new(),
            stream(b"h265", &[(2, 2, 1)]),
        );

        match session.start() {
            Err(MirrorError::UnsupportedCodec(name)) => assert_eq!(name, "h265"),
            other => panic!("Expected UnsupportedCodec, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.get_frame().is_none());
        assert!(session.segment_name().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_start_without_connection_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::new(config(dir.path()), RawRgbCodec::new());

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Created);
        assert!(!session.is_running());
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_second_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::with_stream(
            config(dir.path()),
            RawRgbCodec::new(),
            stream(b"h264", &[(1, 1, 1)]),
        );
        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        session.close();
    }

    #[test]
    fn test_stream_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSession::with_stream(
            config(dir.path()),
            RawRgbCodec::new(),
            stream(b"h264", &[]),
        );

        assert!(matches!(session.start(), Err(MirrorError::ConnectionClosed)));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sessions_sharing_a_segment_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            segment_name: Some("vf_0101000000_12345".to_string()),
            ..config(dir.path())
        };

        let mut first = TestSession::with_stream(
            config.clone(),
            RawRgbCodec::new(),
            stream(b"h264", &[(2, 2, 1)]),
        );
        let mut second = TestSession::with_stream(
            config,
            RawRgbCodec::new(),
            stream(b"h264", &[(2, 2, 2)]),
        );

        first.start().unwrap();
        second.start().unwrap();
        assert_eq!(first.segment_name(), second.segment_name());

        first.close();
        second.close();
        assert_eq!(second.state(), SessionState::Closed);
    }

    #[test]
    fn test_to_args_uses_config() {
        let session = TestSession::new(SessionConfig::default(), RawRgbCodec::new());
        assert_eq!(session.to_args()[0], "video=true");
        assert_eq!(session.to_args(), SessionConfig::default().to_args());
    }
}
