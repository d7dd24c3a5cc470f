//! Source-format to output-format conversion
//!
//! A `FormatConverter` is created once per opened source with the source rate
//! and channel count fixed as input and the engine's [`OutputSpec`] fixed as
//! output, so a format mismatch mid-stream is impossible by construction.
//! Callers push interleaved source frames and pull interleaved stereo i16 at
//! the output rate; `flush` drains the resampler tail exactly once at
//! end-of-source so no buffered-but-unconverted audio is lost.
//!
//! Channel mapping: mono sources are duplicated to both channels, sources
//! with more than two channels contribute their first two.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{AudioError, AudioResult};
use crate::types::{OutputSpec, CHANNELS};

/// Input frames consumed by the resampler per processing call
const RESAMPLE_CHUNK: usize = 1024;

/// Converts interleaved source PCM into the engine output format
pub struct FormatConverter {
    src_channels: usize,
    /// None when source and output rates match (passthrough)
    resampler: Option<SincFixedIn<f32>>,
    /// Planar stereo-mapped input awaiting resampling
    pending: [Vec<f32>; 2],
    /// Scratch holding exactly one resampler chunk per channel
    chunk_in: [Vec<f32>; 2],
    /// Converted interleaved output ready to be pulled
    ready: Vec<i16>,
    ready_pos: usize,
    flushed: bool,
}

impl FormatConverter {
    /// Create a converter from `src_rate`/`src_channels` to `spec`
    pub fn new(src_rate: u32, src_channels: u16, spec: OutputSpec) -> AudioResult<Self> {
        if src_rate == 0 || src_channels == 0 {
            return Err(AudioError::ConversionFailed(format!(
                "invalid source format: {} Hz, {} channels",
                src_rate, src_channels
            )));
        }

        let resampler = if src_rate != spec.sample_rate {
            let ratio = spec.sample_rate as f64 / src_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::new(ratio, 2.0, params, RESAMPLE_CHUNK, CHANNELS)
                .map_err(|e| AudioError::ConversionFailed(e.to_string()))?;
            Some(resampler)
        } else {
            None
        };

        Ok(Self {
            src_channels: src_channels as usize,
            resampler,
            pending: [Vec::new(), Vec::new()],
            chunk_in: [
                Vec::with_capacity(RESAMPLE_CHUNK),
                Vec::with_capacity(RESAMPLE_CHUNK),
            ],
            ready: Vec::new(),
            ready_pos: 0,
            flushed: false,
        })
    }

    /// Accept interleaved source frames. A trailing partial frame is ignored.
    pub fn push_frames(&mut self, interleaved: &[i16]) -> AudioResult<()> {
        if self.flushed {
            return Err(AudioError::ConversionFailed(
                "converter already flushed".into(),
            ));
        }

        let ch = self.src_channels;
        for frame in interleaved.chunks_exact(ch) {
            let left = frame[0] as f32 / 32768.0;
            let right = if ch > 1 {
                frame[1] as f32 / 32768.0
            } else {
                left
            };
            self.pending[0].push(left);
            self.pending[1].push(right);
        }

        self.drain_pending()
    }

    /// Run the resampler over every complete chunk of pending input
    fn drain_pending(&mut self) -> AudioResult<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            // Same-rate source: interleave straight through
            let frames = self.pending[0].len();
            for f in 0..frames {
                self.ready.push(to_i16(self.pending[0][f]));
                self.ready.push(to_i16(self.pending[1][f]));
            }
            self.pending[0].clear();
            self.pending[1].clear();
            return Ok(());
        };

        loop {
            let need = resampler.input_frames_next();
            if self.pending[0].len() < need {
                break;
            }
            for c in 0..CHANNELS {
                self.chunk_in[c].clear();
                self.chunk_in[c].extend(self.pending[c].drain(..need));
            }
            let out = resampler
                .process(self.chunk_in.as_slice(), None)
                .map_err(|e| AudioError::ConversionFailed(e.to_string()))?;
            append_interleaved(&mut self.ready, &out);
        }
        Ok(())
    }

    /// Drain the resampler tail at end-of-source. Exactly one flush does
    /// work; further calls are no-ops so callers need not track it.
    pub fn flush(&mut self) -> AudioResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;

        let Some(resampler) = self.resampler.as_mut() else {
            // Passthrough converts eagerly; nothing is ever held back
            return Ok(());
        };

        if !self.pending[0].is_empty() {
            for c in 0..CHANNELS {
                self.chunk_in[c].clear();
                self.chunk_in[c].extend(self.pending[c].drain(..));
            }
            let out = resampler
                .process_partial(Some(self.chunk_in.as_slice()), None)
                .map_err(|e| AudioError::ConversionFailed(e.to_string()))?;
            append_interleaved(&mut self.ready, &out);
        }

        let out = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| AudioError::ConversionFailed(e.to_string()))?;
        append_interleaved(&mut self.ready, &out);
        Ok(())
    }

    /// Copy converted frames into `out`; returns frames copied
    pub fn pull(&mut self, out: &mut [i16]) -> usize {
        let avail = self.ready.len() - self.ready_pos;
        let mut take = out.len().min(avail);
        take -= take % CHANNELS;

        out[..take].copy_from_slice(&self.ready[self.ready_pos..self.ready_pos + take]);
        self.ready_pos += take;
        if self.ready_pos == self.ready.len() {
            self.ready.clear();
            self.ready_pos = 0;
        }
        take / CHANNELS
    }

    /// Converted frames currently waiting to be pulled
    pub fn pending_output(&self) -> usize {
        (self.ready.len() - self.ready_pos) / CHANNELS
    }
}

#[inline]
fn to_i16(v: f32) -> i16 {
    (v * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

fn append_interleaved(ready: &mut Vec<i16>, planar: &[Vec<f32>]) {
    let frames = planar[0].len().min(planar[1].len());
    ready.reserve(frames * CHANNELS);
    for f in 0..frames {
        ready.push(to_i16(planar[0][f]));
        ready.push(to_i16(planar[1][f]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_all(conv: &mut FormatConverter) -> Vec<i16> {
        let mut out = Vec::new();
        let mut buf = vec![0i16; 512 * CHANNELS];
        loop {
            let n = conv.pull(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n * CHANNELS]);
        }
        out
    }

    #[test]
    fn test_same_rate_stereo_is_identity() {
        let spec = OutputSpec::new(44_100);
        let mut conv = FormatConverter::new(44_100, 2, spec).unwrap();
        let input: Vec<i16> = (0..200).map(|i| (i * 17) as i16).collect();

        conv.push_frames(&input).unwrap();
        conv.flush().unwrap();

        let out = pull_all(&mut conv);
        // Round-trip through f32 is exact for 16-bit values
        assert_eq!(out, input);
    }

    #[test]
    fn test_mono_duplicated_to_both_channels() {
        let spec = OutputSpec::new(48_000);
        let mut conv = FormatConverter::new(48_000, 1, spec).unwrap();
        conv.push_frames(&[100, -200, 300]).unwrap();

        let out = pull_all(&mut conv);
        assert_eq!(out, vec![100, 100, -200, -200, 300, 300]);
    }

    #[test]
    fn test_extra_channels_take_first_two() {
        let spec = OutputSpec::new(48_000);
        let mut conv = FormatConverter::new(48_000, 4, spec).unwrap();
        // One quad frame: FL FR RL RR
        conv.push_frames(&[11, 22, 33, 44]).unwrap();

        let out = pull_all(&mut conv);
        assert_eq!(out, vec![11, 22]);
    }

    #[test]
    fn test_upsample_doubles_frame_count() {
        let spec = OutputSpec::new(44_100);
        let mut conv = FormatConverter::new(22_050, 2, spec).unwrap();
        let frames = 6000usize;
        let input: Vec<i16> = (0..frames * 2).map(|i| ((i % 128) as i16) * 64).collect();

        conv.push_frames(&input).unwrap();
        conv.flush().unwrap();

        let out_frames = pull_all(&mut conv).len() / CHANNELS;
        let expected = frames * 2;
        // The fixed-chunk resampler zero-pads the final partial chunk and
        // the flush, so the output can overshoot by a couple of chunks
        let low = expected - RESAMPLE_CHUNK;
        let high = expected + 3 * RESAMPLE_CHUNK + 256;
        assert!(
            (low..high).contains(&out_frames),
            "expected ~{} frames, got {}",
            expected,
            out_frames
        );
    }

    #[test]
    fn test_flush_is_idempotent_and_seals_input() {
        let spec = OutputSpec::new(44_100);
        let mut conv = FormatConverter::new(22_050, 2, spec).unwrap();
        conv.push_frames(&[1, 1, 2, 2]).unwrap();
        conv.flush().unwrap();
        conv.flush().unwrap();
        assert!(conv.push_frames(&[3, 3]).is_err());
    }

    #[test]
    fn test_zero_rate_or_channels_rejected() {
        let spec = OutputSpec::new(44_100);
        assert!(matches!(
            FormatConverter::new(0, 2, spec),
            Err(AudioError::ConversionFailed(_))
        ));
        assert!(matches!(
            FormatConverter::new(44_100, 0, spec),
            Err(AudioError::ConversionFailed(_))
        ));
    }

    #[test]
    fn test_pull_in_small_slices() {
        let spec = OutputSpec::new(48_000);
        let mut conv = FormatConverter::new(48_000, 2, spec).unwrap();
        let input: Vec<i16> = (0..64).collect();
        conv.push_frames(&input).unwrap();

        let mut out = Vec::new();
        let mut buf = [0i16; 6]; // 3 frames per pull
        loop {
            let n = conv.pull(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n * CHANNELS]);
        }
        assert_eq!(out, input);
        assert_eq!(conv.pending_output(), 0);
    }
}
