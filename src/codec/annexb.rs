//! Annex-B NAL unit splitting
//!
//! H.264/H.265 elementary streams delimit NAL units with `00 00 01` or
//! `00 00 00 01` start codes. A unit is only complete once the next start
//! code has arrived, so the last unit of every read stays buffered.

use bytes::{Buf, Bytes, BytesMut};

/// Incremental start-code splitter
pub struct NalSplitter {
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for the next start code
    scanned: usize,
}

impl NalSplitter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            scanned: 0,
        }
    }

    /// Push bytes and return every NAL unit they complete, start code included
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut units = Vec::new();

        loop {
            let prefix = match start_code_len(&self.buffer) {
                Some(len) => len,
                None => {
                    if !self.skip_to_start_code() {
                        break;
                    }
                    continue;
                }
            };

            let from = self.scanned.saturating_sub(3).max(prefix);
            match find_start_code(&self.buffer, from, prefix) {
                Some(next) => {
                    units.push(self.buffer.split_to(next).freeze());
                    self.scanned = 0;
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        units
    }

    /// Emit the buffered tail once no more data will arrive
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        let unit = match start_code_len(&self.buffer) {
            Some(prefix) if self.buffer.len() > prefix => Some(self.buffer.split().freeze()),
            _ => None,
        };
        self.buffer.clear();
        unit
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop bytes ahead of the first start code. Returns false when none is
    /// buffered yet.
    fn skip_to_start_code(&mut self) -> bool {
        match find_start_code(&self.buffer, 0, 0) {
            Some(pos) => {
                self.buffer.advance(pos);
                self.scanned = 0;
                true
            }
            None => {
                // Keep a possible partial start code
                let drop = self.buffer.len().saturating_sub(3);
                self.buffer.advance(drop);
                self.scanned = 0;
                false
            }
        }
    }
}

impl Default for NalSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn start_code_len(buf: &[u8]) -> Option<usize> {
    if buf.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if buf.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// Position of the first start code at or after `from`. A zero byte just in
/// front of a 3-byte code (and not before `floor`) makes it a 4-byte code.
fn find_start_code(buf: &[u8], from: usize, floor: usize) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    (from..=buf.len() - 3)
        .find(|&i| buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1)
        .map(|i| if i > floor && buf[i - 1] == 0 { i - 1 } else { i })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_need_following_start_code() {
        let mut splitter = NalSplitter::new();
        let units = splitter.push(&[0, 0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_ref(), &[0, 0, 0, 1, 0x67, 1, 2]);

        let units = splitter.push(&[4, 0, 0, 0, 1, 0x65]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_ref(), &[0, 0, 1, 0x68, 3, 4]);

        assert_eq!(splitter.finish().unwrap().as_ref(), &[0, 0, 0, 1, 0x65]);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_start_code_split_across_pushes() {
        let mut splitter = NalSplitter::new();
        assert!(splitter.push(&[0, 0, 1, 0x41, 9, 9, 0]).is_empty());
        assert!(splitter.push(&[0]).is_empty());
        let units = splitter.push(&[1, 0x41]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_ref(), &[0, 0, 1, 0x41, 9, 9]);
    }

    #[test]
    fn test_leading_garbage_dropped() {
        let mut splitter = NalSplitter::new();
        assert!(splitter.push(&[7, 7, 7, 7, 0]).is_empty());
        let units = splitter.push(&[0, 1, 0x09, 0, 0, 1, 0x09]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_ref(), &[0, 0, 1, 0x09]);
    }

    #[test]
    fn test_finish_without_payload() {
        let mut splitter = NalSplitter::new();
        splitter.push(&[0, 0, 1]);
        assert!(splitter.finish().is_none());
    }
}
