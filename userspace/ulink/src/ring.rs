// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-producer/single-consumer frame ring in shared memory.
//!
//! Layout: `head` (consumer index), `tail` (producer index), then `slots`
//! fixed-size records of one length word plus `slot_bytes / 4` data words.
//! Indices run free and are masked on access; `tail - head` is the fill level.
//! The producer publishes a record by storing `tail` with release ordering,
//! the consumer retires it by storing `head`.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Ring construction and push failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Every record is occupied.
    #[error("ring full")]
    Full,
    /// The frame does not fit one record.
    #[error("frame of {len} bytes exceeds slot size {max}")]
    TooLarge {
        /// Frame length.
        len: usize,
        /// Payload bytes per record.
        max: usize,
    },
    /// Rejected slot count or slot size.
    #[error("slot count must be a power of two and slot size a non-zero multiple of 4")]
    BadGeometry,
}

/// Single-producer, single-consumer ring of fixed-size records.
pub struct ShmRing {
    head: AtomicU32,
    tail: AtomicU32,
    mask: u32,
    slot_bytes: usize,
    words: Box<[AtomicU32]>,
}

impl ShmRing {
    /// `slots` records of `slot_bytes` each; `slots` is a power of two up to 65536.
    pub fn new(slots: usize, slot_bytes: usize) -> Result<Self, RingError> {
        if slots == 0 || !slots.is_power_of_two() || slots > (1 << 16) {
            return Err(RingError::BadGeometry);
        }
        if slot_bytes == 0 || slot_bytes % 4 != 0 {
            return Err(RingError::BadGeometry);
        }
        let stride = 1 + slot_bytes / 4;
        let words = (0..slots * stride).map(|_| AtomicU32::new(0)).collect();
        Ok(Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            mask: (slots - 1) as u32,
            slot_bytes,
            words,
        })
    }

    fn stride(&self) -> usize {
        1 + self.slot_bytes / 4
    }

    fn record(&self, index: u32) -> &[AtomicU32] {
        let start = (index & self.mask) as usize * self.stride();
        &self.words[start..start + self.stride()]
    }

    /// Producer side. Copies `frame` into the next free record.
    pub fn push(&self, frame: &[u8]) -> Result<(), RingError> {
        if frame.len() > self.slot_bytes {
            return Err(RingError::TooLarge { len: frame.len(), max: self.slot_bytes });
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.capacity() {
            return Err(RingError::Full);
        }
        let record = self.record(tail);
        record[0].store(frame.len() as u32, Ordering::Relaxed);
        for (word, chunk) in record[1..].iter().zip(frame.chunks(4)) {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            word.store(u32::from_le_bytes(bytes), Ordering::Relaxed);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side. Takes the oldest record, if any.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let record = self.record(head);
        let len = (record[0].load(Ordering::Relaxed) as usize).min(self.slot_bytes);
        let mut frame = Vec::with_capacity(len);
        for word in &record[1..] {
            if frame.len() >= len {
                break;
            }
            let bytes = word.load(Ordering::Relaxed).to_le_bytes();
            let take = (len - frame.len()).min(4);
            frame.extend_from_slice(&bytes[..take]);
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    /// Records waiting for the consumer.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    /// Nothing to pop.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records.
    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Bytes per record.
    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn geometry_checked() {
        assert!(matches!(ShmRing::new(3, 16), Err(RingError::BadGeometry)));
        assert!(matches!(ShmRing::new(4, 6), Err(RingError::BadGeometry)));
        assert!(matches!(ShmRing::new(0, 16), Err(RingError::BadGeometry)));
        assert_eq!(ShmRing::new(8, 64).unwrap().capacity(), 8);
    }

    #[test]
    fn full_and_too_large() {
        let ring = ShmRing::new(2, 8).unwrap();
        assert_eq!(ring.push(&[0; 9]), Err(RingError::TooLarge { len: 9, max: 8 }));
        ring.push(b"a").unwrap();
        ring.push(b"bcdefgh").unwrap();
        assert_eq!(ring.push(b"x"), Err(RingError::Full));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop().unwrap(), b"a");
        assert_eq!(ring.pop().unwrap(), b"bcdefgh");
        assert!(ring.pop().is_none());
        ring.push(b"").unwrap();
        assert_eq!(ring.pop().unwrap(), b"");
    }

    #[test]
    fn spsc_preserves_order_across_wraparound() {
        let ring = Arc::new(ShmRing::new(4, 8).unwrap());
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0u32..1000 {
                    while ring.push(&i.to_le_bytes()).is_err() {
                        thread::yield_now();
                    }
                }
            })
        };
        let mut next = 0u32;
        while next < 1000 {
            match ring.pop() {
                Some(frame) => {
                    assert_eq!(frame, next.to_le_bytes());
                    next += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
