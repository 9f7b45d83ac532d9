//! Short-window duplicate suppression for radio frames.
//!
//! This is an approximate filter: a small ring of fingerprints, each expiring
//! after a fixed window. Two distinct frames with the same length and the same
//! first [`FINGERPRINT_PREFIX`] bytes are treated as the same frame.

use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Number of leading bytes that take part in the fingerprint
pub const FINGERPRINT_PREFIX: usize = 20;

/// Cheap content fingerprint: total length plus the leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    len: usize,
    head: [u8; FINGERPRINT_PREFIX],
}

impl Fingerprint {
    pub fn of(raw: &[u8]) -> Self {
        let raw = trim_line_terminator(raw);
        let mut head = [0u8; FINGERPRINT_PREFIX];
        let take = raw.len().min(FINGERPRINT_PREFIX);
        head[..take].copy_from_slice(&raw[..take]);
        Self {
            len: raw.len(),
            head,
        }
    }
}

fn trim_line_terminator(mut raw: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = raw {
        raw = rest;
    }
    raw
}

#[derive(Debug, Clone, Copy)]
struct RecentFrame {
    fingerprint: Fingerprint,
    seen_at: Instant,
}

/// Fixed-capacity ring of recently seen frames
#[derive(Debug)]
pub struct DuplicateSuppressor {
    slots: Vec<Option<RecentFrame>>,
    window: Duration,
}

impl DuplicateSuppressor {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            window,
        }
    }

    /// Returns true when `raw` was already seen within the window.
    /// A frame judged new is recorded as seen at `now`.
    pub fn is_duplicate(&mut self, raw: &[u8], now: Instant) -> bool {
        let fingerprint = Fingerprint::of(raw);
        let mut duplicate = false;

        for slot in self.slots.iter_mut() {
            if let Some(recent) = *slot {
                if now.saturating_duration_since(recent.seen_at) > self.window {
                    *slot = None;
                } else if recent.fingerprint == fingerprint {
                    duplicate = true;
                }
            }
        }

        if !duplicate {
            self.record(fingerprint, now);
        }
        duplicate
    }

    fn record(&mut self, fingerprint: Fingerprint, now: Instant) {
        let entry = Some(RecentFrame {
            fingerprint,
            seen_at: now,
        });

        if let Some(empty) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *empty = entry;
            return;
        }

        // Ring is full of live, distinct frames: evict the oldest
        if let Some(oldest) = self
            .slots
            .iter_mut()
            .min_by_key(|slot| slot.map(|recent| recent.seen_at))
        {
            *oldest = entry;
        }
    }

    /// Number of occupied slots (expired slots are only cleared on the next check)
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &[u8] = b"N0CALL>APRS,WIDE1-1:!4903.50N/07201.75W>test";

    #[test]
    fn test_second_copy_within_window_is_duplicate() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(FRAME, t0));
        assert!(dedup.is_duplicate(FRAME, t0 + Duration::from_secs(5)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_copy_after_window_is_not_duplicate() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(FRAME, t0));
        assert!(!dedup.is_duplicate(FRAME, t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_duplicate_does_not_refresh_timestamp() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(FRAME, t0));
        assert!(dedup.is_duplicate(FRAME, t0 + Duration::from_secs(20)));
        // Still measured from the first sighting
        assert!(!dedup.is_duplicate(FRAME, t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_line_terminator_ignored() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();
        let with_newline = [FRAME, &b"\r\n"[..]].concat();

        assert!(!dedup.is_duplicate(FRAME, t0));
        assert!(dedup.is_duplicate(&with_newline, t0));
    }

    #[test]
    fn test_same_length_and_prefix_collide() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        // Identical first 20 bytes and identical length
        let a = b"N0CALL>APRS,WIDE1-1:!AAAA";
        let b = b"N0CALL>APRS,WIDE1-1:!BBBB";
        assert!(!dedup.is_duplicate(a, t0));
        assert!(dedup.is_duplicate(b, t0));
    }

    #[test]
    fn test_different_length_does_not_collide() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(b"N0CALL>APRS,WIDE1-1:!AAAA", t0));
        assert!(!dedup.is_duplicate(b"N0CALL>APRS,WIDE1-1:!AAAAA", t0));
    }

    #[test]
    fn test_short_frames() {
        let mut dedup = DuplicateSuppressor::default();
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(b"x", t0));
        assert!(dedup.is_duplicate(b"x", t0));
        assert!(!dedup.is_duplicate(b"y", t0));
    }

    #[test]
    fn test_full_ring_evicts_oldest() {
        let mut dedup = DuplicateSuppressor::new(3, DEFAULT_WINDOW);
        let t0 = Instant::now();

        for (i, frame) in [b"frame-1", b"frame-2", b"frame-3"].iter().enumerate() {
            assert!(!dedup.is_duplicate(*frame, t0 + Duration::from_secs(i as u64)));
        }
        assert_eq!(dedup.len(), 3);

        // A fourth distinct frame is still accepted and evicts frame-1
        assert!(!dedup.is_duplicate(b"frame-4", t0 + Duration::from_secs(3)));
        assert!(!dedup.is_duplicate(b"frame-1", t0 + Duration::from_secs(4)));
        assert!(dedup.is_duplicate(b"frame-3", t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_expired_slots_are_reused() {
        let mut dedup = DuplicateSuppressor::new(2, Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(!dedup.is_duplicate(b"frame-1", t0));
        assert!(!dedup.is_duplicate(b"frame-2", t0));

        let later = t0 + Duration::from_secs(60);
        assert!(!dedup.is_duplicate(b"frame-3", later));
        assert_eq!(dedup.len(), 1);
    }
}
