//! Receive -> parse -> decode -> store loop
//!
//! One iteration reads whatever the socket has (short reads are normal),
//! hands it to the codec and pushes every decoded frame into the
//! [`FrameStore`]. Failures of a single iteration are counted and skipped;
//! only the end of the stream or a cleared running flag stops the loop.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::CodecAdapter;
use crate::error::{MirrorError, Result};
use crate::frame::{DecodedFrame, FrameStore};

/// Consecutive read errors before the loop starts backing off
const ERROR_BACKOFF_THRESHOLD: u32 = 8;
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Counters shared with the session
#[derive(Debug, Default)]
pub struct DecodeStats {
    reads: AtomicU64,
    frames: AtomicU64,
    errors: AtomicU64,
}

impl DecodeStats {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Iterations that failed and were skipped
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Data was processed; number of frames stored
    Frames(usize),
    /// The stream ended cleanly
    EndOfStream,
}

pub struct DecodeLoop<S, C> {
    stream: S,
    codec: C,
    buffer: Vec<u8>,
    store: Arc<FrameStore>,
    running: Arc<AtomicBool>,
    stats: Arc<DecodeStats>,
}

impl<S: Read, C: CodecAdapter> DecodeLoop<S, C> {
    pub fn new(
        stream: S,
        codec: C,
        buffer_size: usize,
        store: Arc<FrameStore>,
        running: Arc<AtomicBool>,
        stats: Arc<DecodeStats>,
    ) -> Self {
        Self {
            stream,
            codec,
            buffer: vec![0; buffer_size.max(1)],
            store,
            running,
            stats,
        }
    }

    /// Run until the stream ends or the running flag is cleared. The stream
    /// is released on return.
    pub fn run(mut self) {
        let mut failures = 0u32;

        while self.running.load(Ordering::Acquire) {
            match self.step() {
                Ok(StepOutcome::EndOfStream) => {
                    info!("Video stream ended after {} frames", self.store.sequence());
                    break;
                }
                Ok(StepOutcome::Frames(_)) => failures = 0,
                Err(MirrorError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    debug!("Decode iteration failed: {}", e);
                    if matches!(e, MirrorError::Io(_)) {
                        failures += 1;
                        if failures == ERROR_BACKOFF_THRESHOLD {
                            warn!("Video socket keeps failing: {}", e);
                        }
                        if failures >= ERROR_BACKOFF_THRESHOLD {
                            thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }
            }
        }

        debug!("Decode loop exited");
    }

    /// One read/parse/decode iteration
    pub fn step(&mut self) -> Result<StepOutcome> {
        let n = self.stream.read(&mut self.buffer)?;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        if n == 0 {
            let frames = self.codec.flush()?;
            self.store_frames(frames);
            return Ok(StepOutcome::EndOfStream);
        }

        let units = self.codec.parse(&self.buffer[..n])?;
        let mut stored = 0;
        for unit in &units {
            let frames = self.codec.decode(unit)?;
            stored += self.store_frames(frames);
        }

        Ok(StepOutcome::Frames(stored))
    }

    fn store_frames(&self, frames: Vec<DecodedFrame>) -> usize {
        let count = frames.len();
        for frame in frames {
            self.store.push(frame);
        }
        self.stats.frames.fetch_add(count as u64, Ordering::Relaxed);
        count
    }
}
