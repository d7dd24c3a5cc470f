//! The mixing callback body
//!
//! `EngineShared::render` fills one device period of interleaved stereo i16.
//! It is invoked from the real-time stream callback and must complete in
//! bounded time: no allocation, no I/O, no unbounded loops. The single
//! engine mutex is its only synchronization; on a poisoned lock it degrades
//! to silence rather than panicking into the audio subsystem.
//!
//! Per output frame it reads at most one frame from each stream ring (when
//! the stream is live, not paused, and past its prefill gate), one frame of
//! pending SFX, mixes with the 0..=128 volume scale, clamps into the 16-bit
//! range, and feeds the visualizer taps. After the period it latches the
//! "track ended" event and wakes loaders whose rings fell below half.

use crate::types::{CHANNELS, VOLUME_MAX};

use super::state::{EngineShared, StreamKind, StreamState};

/// Unity denominator for the volume scale: per-channel volume and master
/// volume are both applied out of 128
const VOLUME_NORM: i64 = (VOLUME_MAX as i64) * (VOLUME_MAX as i64);

/// Read one frame from a stream ring if the stream is currently audible
#[inline]
fn read_stream_frame(stream: &mut StreamState) -> Option<[i16; CHANNELS]> {
    if !stream.inited || stream.paused || !stream.prefilled {
        return None;
    }
    let mut frame = [0i16; CHANNELS];
    if stream.ring.read(&mut frame) == 1 {
        Some(frame)
    } else {
        None
    }
}

impl EngineShared {
    /// Fill `out` (interleaved stereo, whole frames) with mixed audio
    pub(crate) fn render(&self, out: &mut [i16]) {
        let Ok(mut guard) = self.state.lock() else {
            out.fill(0);
            return;
        };
        let state = &mut *guard;

        // Prefill gates open once per period: the loader cannot add frames
        // while we hold the lock. A stream already at EOF is ungated so a
        // source shorter than the gate still plays out.
        for kind in [StreamKind::Music, StreamKind::Ambience] {
            let stream = state.stream_mut(kind);
            if !stream.prefilled
                && (stream.ring.frames_queued() >= stream.prefill_frames || stream.eof)
            {
                stream.prefilled = true;
            }
        }

        let volumes = state.volumes;
        let master = volumes.master as i64;
        let music_vol = volumes.music as i64;
        let ambience_vol = volumes.ambience as i64;
        let sfx_vol = volumes.sfx as i64;

        for frame_out in out.chunks_exact_mut(CHANNELS) {
            let music = read_stream_frame(&mut state.music).unwrap_or([0; CHANNELS]);
            let ambience = read_stream_frame(&mut state.ambience).unwrap_or([0; CHANNELS]);

            let mut sfx = [0i16; CHANNELS];
            let mut sfx_done = false;
            if let Some(buffer) = state.sfx.as_mut() {
                if let Some(frame) = buffer.next_frame() {
                    sfx = frame;
                }
                sfx_done = buffer.exhausted();
            }
            if sfx_done {
                state.sfx = None;
            }

            for ch in 0..CHANNELS {
                let sum = music[ch] as i64 * music_vol
                    + ambience[ch] as i64 * ambience_vol
                    + sfx[ch] as i64 * sfx_vol;
                let scaled = sum * master / VOLUME_NORM;
                frame_out[ch] = scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            }

            // Spectrum tap: final post-mix mono, normalized to roughly -1..1
            let mono = (frame_out[0] as f32 + frame_out[1] as f32) * 0.5 / 32768.0;
            state.viz.push_mix_sample(mono);

            // Envelope tap: the music contribution alone, volume-scaled so
            // the waveform tracks perceived loudness
            let music_mono = ((music[0] as i64 + music[1] as i64) * music_vol * master
                / VOLUME_NORM) as f32
                * 0.5
                / 32768.0;
            state.viz.push_music_sample(music_mono);
        }

        // Natural end of track: decoder drained and ring empty. Latched once
        // per track; play/stop reset the latch.
        if state.music.inited
            && state.music.eof
            && state.music.ring.is_empty()
            && !state.end_latched
        {
            state.music_ended = true;
            state.end_latched = true;
        }

        // Wake loaders promptly instead of leaving them to their timeout
        let music_low = state.music.ring.frames_queued() * 2 < state.music.ring.capacity();
        let ambience_low =
            state.ambience.ring.frames_queued() * 2 < state.ambience.ring.capacity();
        drop(guard);

        if music_low {
            self.music_cv.notify_one();
        }
        if ambience_low {
            self.ambience_cv.notify_one();
        }
    }
}
