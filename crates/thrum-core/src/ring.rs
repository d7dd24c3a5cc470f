//! Fixed-capacity ring buffer of interleaved stereo frames
//!
//! One ring sits between each loader thread (producer) and the mixing
//! callback (consumer). The ring itself does no locking; every instance is a
//! field of the engine state and is only touched with the engine mutex held.
//! All quantities are in frames (one sample per channel).
//!
//! `write` stores as many whole frames as fit and returns the count; the
//! excess is never dropped, the caller retries once `space()` reports room.
//! `read` returns 0 on empty and never fabricates silence; deciding what an
//! underrun sounds like is the mixer's job.

use crate::types::CHANNELS;

/// Circular queue of interleaved 16-bit frames
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<i16>,
    capacity: usize,
    read_pos: usize,
    write_pos: usize,
    queued: usize,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity_frames` stereo frames
    pub fn new(capacity_frames: usize) -> Self {
        assert!(capacity_frames > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![0; capacity_frames * CHANNELS],
            capacity: capacity_frames,
            read_pos: 0,
            write_pos: 0,
            queued: 0,
        }
    }

    /// Total capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently queued
    pub fn frames_queued(&self) -> usize {
        self.queued
    }

    /// Free space in frames
    pub fn space(&self) -> usize {
        self.capacity - self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Discard all queued frames. Keeps the allocation.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.queued = 0;
    }

    /// Write whole frames from an interleaved slice; returns frames written.
    ///
    /// Wraps across the array boundary in at most two copies. A trailing
    /// partial frame in `samples` is ignored.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let frames = (samples.len() / CHANNELS).min(self.space());
        let mut src = 0;
        let mut remaining = frames;
        while remaining > 0 {
            let contig = remaining.min(self.capacity - self.write_pos);
            let dst = self.write_pos * CHANNELS;
            self.buf[dst..dst + contig * CHANNELS]
                .copy_from_slice(&samples[src..src + contig * CHANNELS]);
            self.write_pos = (self.write_pos + contig) % self.capacity;
            src += contig * CHANNELS;
            remaining -= contig;
        }
        self.queued += frames;
        frames
    }

    /// Read up to `dst.len() / CHANNELS` frames into an interleaved slice;
    /// returns frames read (0 when empty).
    pub fn read(&mut self, dst: &mut [i16]) -> usize {
        let frames = (dst.len() / CHANNELS).min(self.queued);
        let mut written = 0;
        let mut remaining = frames;
        while remaining > 0 {
            let contig = remaining.min(self.capacity - self.read_pos);
            let src = self.read_pos * CHANNELS;
            dst[written..written + contig * CHANNELS]
                .copy_from_slice(&self.buf[src..src + contig * CHANNELS]);
            self.read_pos = (self.read_pos + contig) % self.capacity;
            written += contig * CHANNELS;
            remaining -= contig;
        }
        self.queued -= frames;
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(values: &[i16]) -> Vec<i16> {
        // Each value becomes one frame with distinct L/R samples
        values.iter().flat_map(|&v| [v, v + 1]).collect()
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut ring = RingBuffer::new(8);
        let data = frames(&[10, 20, 30]);
        assert_eq!(ring.write(&data), 3);
        assert_eq!(ring.frames_queued(), 3);

        let mut out = vec![0i16; 6];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, data);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_write_stops_at_capacity() {
        let mut ring = RingBuffer::new(4);
        let data = frames(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.write(&data), 4);
        assert_eq!(ring.frames_queued(), 4);
        assert_eq!(ring.space(), 0);
        // Nothing dropped silently: the remainder was simply not accepted
        assert_eq!(ring.write(&data[4 * CHANNELS..]), 0);
    }

    #[test]
    fn test_read_from_empty_returns_zero() {
        let mut ring = RingBuffer::new(4);
        let mut out = vec![0i16; 4];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, vec![0i16; 4]);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let mut ring = RingBuffer::new(4);
        let mut out = vec![0i16; 2];

        // Advance positions to force the write to wrap
        ring.write(&frames(&[1, 2, 3]));
        ring.read(&mut out);
        ring.read(&mut out);

        let data = frames(&[40, 50, 60]);
        assert_eq!(ring.write(&data), 3);
        assert_eq!(ring.frames_queued(), 4);

        let mut all = vec![0i16; 8];
        assert_eq!(ring.read(&mut all), 4);
        assert_eq!(&all[..2], &frames(&[3])[..]);
        assert_eq!(&all[2..], &data[..]);
    }

    #[test]
    fn test_queued_never_exceeds_capacity() {
        let mut ring = RingBuffer::new(16);
        let chunk = frames(&[7; 5]);
        let mut out = vec![0i16; 3 * CHANNELS];
        let mut total_written = 0usize;
        let mut total_read = 0usize;

        for _ in 0..100 {
            total_written += ring.write(&chunk);
            assert!(ring.frames_queued() <= ring.capacity());
            total_read += ring.read(&mut out);
            assert!(ring.frames_queued() <= ring.capacity());
            assert!(total_read <= total_written);
        }
    }

    #[test]
    fn test_clear_empties_without_reallocating() {
        let mut ring = RingBuffer::new(4);
        ring.write(&frames(&[1, 2, 3, 4]));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.space(), 4);

        // Still fully usable after clear
        assert_eq!(ring.write(&frames(&[9, 8])), 2);
        let mut out = vec![0i16; 4];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, frames(&[9, 8]));
    }

    #[test]
    fn test_partial_trailing_sample_ignored() {
        let mut ring = RingBuffer::new(4);
        // 5 samples = 2 whole frames + 1 stray sample
        assert_eq!(ring.write(&[1, 2, 3, 4, 5]), 2);
        assert_eq!(ring.frames_queued(), 2);
    }
}
