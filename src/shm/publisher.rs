//! Publisher side of the shared frame segment

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use memmap2::{MmapMut, MmapOptions};

use super::{segment_name, SegmentHeader, CLOSED_SEQUENCE, HEADER_LEN};
use crate::error::{MirrorError, Result};
use crate::frame::{DecodedFrame, FrameStore};
use crate::geometry::Geometry;

/// Sole writer of one shared frame segment
pub struct SharedFramePublisher {
    name: String,
    path: PathBuf,
    map: MmapMut,
    _file: File,
}

impl SharedFramePublisher {
    /// Create segment `name` in `dir` with `capacity` bytes. If a segment
    /// with that name already exists it is attached instead.
    pub fn create(dir: &Path, name: &str, capacity: usize) -> Result<Self> {
        let path = dir.join(name);

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                file.set_len(capacity as u64)?;
                file
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("{} shared frame already exists, attaching", name);
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                if file.metadata()?.len() == 0 {
                    file.set_len(capacity as u64)?;
                }
                file
            }
            Err(e) => return Err(e.into()),
        };

        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        if map.len() < HEADER_LEN {
            return Err(MirrorError::GeometryMismatch {
                capacity: map.len(),
                required: HEADER_LEN,
            });
        }

        info!("🧩 Shared frame created! name: > {} < ({} bytes)", name, map.len());

        Ok(Self {
            name: name.to_string(),
            path,
            map,
            _file: file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Segment size in bytes, header included
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Write header and payload.
    ///
    /// Readers are not locked out while this runs; a concurrent read can
    /// see a new header with part of the previous payload.
    pub fn publish(&mut self, sequence: u32, frame: &DecodedFrame) -> Result<()> {
        let required = HEADER_LEN + frame.data.len();
        if required > self.map.len() {
            return Err(MirrorError::GeometryMismatch {
                capacity: self.map.len(),
                required,
            });
        }

        SegmentHeader {
            sequence,
            height: frame.height,
            width: frame.width,
        }
        .encode_into(&mut self.map);
        self.map[HEADER_LEN..required].copy_from_slice(&frame.data);
        Ok(())
    }

    /// Mark the channel closed, then unmap and remove the segment.
    /// Teardown errors are logged and ignored.
    pub fn close(mut self) {
        self.map[..4].copy_from_slice(&CLOSED_SEQUENCE.to_be_bytes());
        if let Err(e) = self.map.flush() {
            debug!("Flushing {} failed: {}", self.name, e);
        }

        let Self { name, path, map, _file } = self;
        drop(map);
        drop(_file);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already unlinked", name);
            }
            Err(e) => warn!("Removing {} failed: {}", path.display(), e),
        }
    }
}

/// Publisher thread parameters
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub dir: PathBuf,
    /// Generated when `None`
    pub name: Option<String>,
    pub first_frame_poll: Duration,
    pub publish_poll: Duration,
}

/// Mirror the store into a new segment until `running` clears.
///
/// Waits for the first frame, sizes the segment from it, stores the segment
/// name in `name_slot`, then polls the store for new sequences. Returns
/// without creating anything if `running` clears before the first frame.
pub fn publish_loop(
    store: Arc<FrameStore>,
    running: Arc<AtomicBool>,
    settings: PublishSettings,
    name_slot: Arc<OnceLock<String>>,
) -> Result<()> {
    info!("Start shared frame thread");

    let first = loop {
        if !running.load(Ordering::Acquire) {
            debug!("Shared frame thread stopped before the first frame");
            return Ok(());
        }
        if let (sequence, Some(frame)) = store.snapshot() {
            if sequence > 0 {
                break frame;
            }
        }
        thread::sleep(settings.first_frame_poll);
    };

    let name = settings.name.clone().unwrap_or_else(segment_name);
    let capacity = HEADER_LEN + first.geometry().payload_len();
    let mut publisher = SharedFramePublisher::create(&settings.dir, &name, capacity)?;
    let _ = name_slot.set(publisher.name().to_string());

    let mut last_published = 0u32;
    let mut rejected = None;
    while running.load(Ordering::Acquire) {
        let (sequence, frame) = store.snapshot();
        if sequence == last_published {
            thread::sleep(settings.publish_poll);
            continue;
        }
        if let Some(frame) = frame {
            match publisher.publish(sequence, &frame) {
                Ok(()) => rejected = None,
                Err(e) => {
                    if first_rejection(&mut rejected, frame.geometry()) {
                        error!("Frame {} {} not shared: {}", sequence, frame.geometry(), e);
                    } else {
                        debug!("Frame {} not shared: {}", sequence, e);
                    }
                }
            }
        }
        last_published = sequence;
    }

    publisher.close();
    warn!("Shared frame thread closed!");
    Ok(())
}

/// True when `geometry` starts a new run of rejected frames
fn first_rejection(rejected: &mut Option<Geometry>, geometry: Geometry) -> bool {
    if *rejected == Some(geometry) {
        return false;
    }
    *rejected = Some(geometry);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::subscriber::FrameSubscriber;

    fn frame(width: u16, height: u16, value: u8) -> DecodedFrame {
        DecodedFrame::new(width, height, vec![value; width as usize * height as usize * 3])
            .unwrap()
    }

    #[test]
    fn test_publish_writes_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = SharedFramePublisher::create(dir.path(), "vf_test", HEADER_LEN + 6).unwrap();
        publisher.publish(3, &frame(1, 2, 0xAB)).unwrap();

        let bytes = fs::read(dir.path().join("vf_test")).unwrap();
        assert_eq!(
            SegmentHeader::decode(&bytes),
            Some(SegmentHeader {
                sequence: 3,
                height: 2,
                width: 1
            })
        );
        assert_eq!(&bytes[HEADER_LEN..], &[0xAB; 6]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = SharedFramePublisher::create(dir.path(), "vf_small", HEADER_LEN + 6).unwrap();
        match publisher.publish(1, &frame(2, 2, 1)) {
            Err(MirrorError::GeometryMismatch { capacity, required }) => {
                assert_eq!(capacity, 14);
                assert_eq!(required, 20);
            }
            other => panic!("Expected GeometryMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_close_writes_sentinel_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = SharedFramePublisher::create(dir.path(), "vf_close", HEADER_LEN + 3).unwrap();
        publisher.publish(9, &frame(1, 1, 1)).unwrap();

        let mut subscriber = FrameSubscriber::attach(dir.path(), "vf_close").unwrap();
        assert!(subscriber.read().is_ok());

        publisher.close();
        assert!(!dir.path().join("vf_close").exists());
        assert!(matches!(subscriber.read(), Err(MirrorError::StreamClosed)));
    }

    #[test]
    fn test_name_collision_attaches() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = SharedFramePublisher::create(dir.path(), "vf_same", HEADER_LEN + 3).unwrap();
        let second = SharedFramePublisher::create(dir.path(), "vf_same", HEADER_LEN + 3).unwrap();
        assert_eq!(second.capacity(), first.capacity());

        first.publish(4, &frame(1, 1, 5)).unwrap();
        assert_eq!(SegmentHeader::decode(&second.map).unwrap().sequence, 4);

        first.close();
        second.close();
    }

    #[test]
    fn test_rejection_reported_once_per_geometry() {
        let mut rejected = None;
        assert!(first_rejection(&mut rejected, Geometry::new(1920, 1080)));
        assert!(!first_rejection(&mut rejected, Geometry::new(1920, 1080)));
        assert!(!first_rejection(&mut rejected, Geometry::new(1920, 1080)));
        assert!(first_rejection(&mut rejected, Geometry::new(2560, 1440)));
    }

    #[test]
    fn test_loop_keeps_running_after_rejected_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FrameStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(OnceLock::new());
        let settings = PublishSettings {
            dir: dir.path().to_path_buf(),
            name: Some("vf_grow".to_string()),
            first_frame_poll: Duration::from_millis(1),
            publish_poll: Duration::from_micros(100),
        };

        let handle = {
            let (store, running, slot) = (store.clone(), running.clone(), slot.clone());
            thread::spawn(move || publish_loop(store, running, settings, slot))
        };

        store.push(frame(1, 1, 1));
        while slot.get().is_none() {
            thread::sleep(Duration::from_millis(1));
        }
        let subscriber = FrameSubscriber::attach(dir.path(), "vf_grow").unwrap();

        for _ in 0..5 {
            store.push(frame(2, 2, 2));
        }
        store.push(frame(1, 1, 3));
        while subscriber.header().map(|h| h.sequence) != Some(7) {
            thread::sleep(Duration::from_millis(1));
        }

        running.store(false, Ordering::Release);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_loop_exits_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(OnceLock::new());
        let settings = PublishSettings {
            dir: dir.path().to_path_buf(),
            name: None,
            first_frame_poll: Duration::from_millis(1),
            publish_poll: Duration::from_millis(1),
        };

        publish_loop(Arc::new(FrameStore::new()), running, settings, slot.clone()).unwrap();
        assert!(slot.get().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_loop_publishes_latest_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FrameStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(OnceLock::new());
        let settings = PublishSettings {
            dir: dir.path().to_path_buf(),
            name: Some("vf_loop".to_string()),
            first_frame_poll: Duration::from_millis(1),
            publish_poll: Duration::from_micros(100),
        };

        let handle = {
            let (store, running, slot) = (store.clone(), running.clone(), slot.clone());
            thread::spawn(move || publish_loop(store, running, settings, slot))
        };

        store.push(frame(2, 1, 1));
        while slot.get().is_none() {
            thread::sleep(Duration::from_millis(1));
        }
        let mut subscriber = FrameSubscriber::attach(dir.path(), "vf_loop").unwrap();

        store.push(frame(1, 2, 2));
        while subscriber.header().map(|h| h.sequence) != Some(2) {
            thread::sleep(Duration::from_millis(1));
        }
        let (geometry, view) = subscriber.read().unwrap();
        assert_eq!((geometry.width, geometry.height), (1, 2));
        assert_eq!(view.pixel(1, 0), Some([2, 2, 2]));

        running.store(false, Ordering::Release);
        handle.join().unwrap().unwrap();
        assert!(matches!(subscriber.read(), Err(MirrorError::StreamClosed)));
    }
}
