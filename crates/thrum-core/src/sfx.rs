//! One-shot sound effects
//!
//! Effects are short, so they are decoded whole into a `PcmBuffer` at the
//! output spec instead of being streamed. The mixer advances the play cursor
//! one frame per output frame and the engine drops the buffer the moment the
//! cursor reaches the end; replacing an effect mid-playback discards the
//! previous buffer.

use std::path::Path;

use crate::decoder::StreamingDecoder;
use crate::error::{AudioError, AudioResult};
use crate::types::{OutputSpec, CHANNELS, DECODE_CHUNK_FRAMES};

/// A fully decoded effect with a play cursor
#[derive(Debug)]
pub struct PcmBuffer {
    samples: Vec<i16>,
    cursor: usize,
}

impl PcmBuffer {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, cursor: 0 }
    }

    /// Total length in frames
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    /// Take the next frame, advancing the cursor
    pub fn next_frame(&mut self) -> Option<[i16; CHANNELS]> {
        if self.cursor + CHANNELS > self.samples.len() {
            return None;
        }
        let frame = [self.samples[self.cursor], self.samples[self.cursor + 1]];
        self.cursor += CHANNELS;
        Some(frame)
    }

    /// True once every frame has been played
    pub fn exhausted(&self) -> bool {
        self.cursor + CHANNELS > self.samples.len()
    }
}

/// Synchronously decode an entire file into a `PcmBuffer` at `spec`
pub fn decode_file(path: &Path, spec: OutputSpec) -> AudioResult<PcmBuffer> {
    let mut decoder = StreamingDecoder::open(path, spec)?;
    let mut samples = Vec::new();
    let mut chunk = vec![0i16; DECODE_CHUNK_FRAMES * CHANNELS];

    loop {
        let n = decoder.read_chunk()?;
        if n == 0 {
            decoder.finish()?;
        }
        loop {
            let got = decoder.pull(&mut chunk);
            if got == 0 {
                break;
            }
            samples.extend_from_slice(&chunk[..got * CHANNELS]);
        }
        if n == 0 {
            break;
        }
    }

    if samples.is_empty() {
        return Err(AudioError::decode(path, "no audio frames in source"));
    }
    Ok(PcmBuffer::new(samples))
}
