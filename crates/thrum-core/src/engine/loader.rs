//! Loader threads: background decode-and-fill workers
//!
//! One thread per streamed source keeps its ring topped up from a
//! `StreamingDecoder`. The state machine per request is
//! IDLE -> OPENING -> FILLING -> DRAINING -> IDLE for music; the ambience
//! variant loops the source instead of draining.
//!
//! Every checkpoint compares the claimed generation against `pending_gen`;
//! a mismatch means the request was superseded and all in-flight work is
//! abandoned. Backpressure is condvar-based with bounded timed waits: block
//! while the ring is full, throttle above three-quarters, and rely on the
//! mixer's below-half signal (or the timeout) to resume.

use std::path::PathBuf;
use std::sync::Arc;

use crate::decoder::StreamingDecoder;
use crate::types::{CHANNELS, DECODE_CHUNK_FRAMES, LOADER_WAIT};

use super::state::{EngineShared, StreamKind};

/// Why a fill or write loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// End of source reached (or treated as such)
    Eos,
    /// The request was superseded by a newer generation
    Superseded,
    /// Engine shutdown requested
    Quit,
}

/// What the idle wait produced
enum Claim {
    Quit,
    Work { gen: u64, path: Option<PathBuf> },
}

/// Entry point for the music loader thread
pub(crate) fn music_loader(shared: Arc<EngineShared>) {
    run_loader(shared, StreamKind::Music);
}

/// Entry point for the ambience loader thread
pub(crate) fn ambience_loader(shared: Arc<EngineShared>) {
    run_loader(shared, StreamKind::Ambience);
}

fn run_loader(shared: Arc<EngineShared>, kind: StreamKind) {
    log::debug!("{} loader started", kind.name());
    // Kept across idle so a naturally finished music decoder stays open
    // until the next request or stop closes it
    let mut decoder: Option<StreamingDecoder> = None;
    let mut staging = vec![0i16; DECODE_CHUNK_FRAMES * CHANNELS];

    loop {
        let (gen, path) = match wait_for_request(&shared, kind) {
            Claim::Quit => break,
            Claim::Work { gen, path } => (gen, path),
        };

        // Close whatever the previous request left behind
        if let Some(previous) = decoder.take() {
            previous.close();
        }

        let Some(path) = path else {
            // Stop request: stay idle with no decoder
            continue;
        };

        // OPENING runs unlocked; a failure means no playback, nothing more
        let mut active = match StreamingDecoder::open(&path, shared.spec) {
            Ok(decoder) => decoder,
            Err(e) => {
                log::warn!("{}: cannot play {}: {}", kind.name(), path.display(), e);
                if let Ok(mut state) = shared.state.lock() {
                    let stream = state.stream_mut(kind);
                    if stream.pending_gen == gen {
                        stream.pending_path = None;
                    }
                }
                continue;
            }
        };

        {
            let Ok(mut state) = shared.state.lock() else { break };
            let stream = state.stream_mut(kind);
            if stream.pending_gen != gen {
                continue;
            }
            stream.inited = true;
            stream.current_path = Some(path.clone());
        }

        let outcome = match kind {
            StreamKind::Music => fill_music(&shared, gen, &mut active, &mut staging),
            StreamKind::Ambience => fill_ambience(&shared, gen, &mut active, &mut staging),
        };

        match outcome {
            Step::Eos => {
                // Keep the drained decoder so the mixer can observe
                // `eof && ring empty` and latch the ended event
                decoder = Some(active);
            }
            Step::Superseded => {
                active.close();
            }
            Step::Quit => {
                active.close();
                break;
            }
        }
    }
    log::debug!("{} loader exiting", kind.name());
}

/// IDLE: sleep until a new generation appears or shutdown is requested.
/// Claiming a request synchronizes `active_gen`, clears the ring, and resets
/// the stream flags.
fn wait_for_request(shared: &EngineShared, kind: StreamKind) -> Claim {
    let Ok(mut state) = shared.state.lock() else {
        return Claim::Quit;
    };
    loop {
        if state.quit {
            return Claim::Quit;
        }
        let stream = state.stream_mut(kind);
        if stream.pending_gen != stream.active_gen {
            stream.active_gen = stream.pending_gen;
            let gen = stream.active_gen;
            let path = stream.pending_path.clone();
            stream.ring.clear();
            stream.inited = false;
            stream.eof = false;
            if path.is_none() {
                stream.current_path = None;
            }
            return Claim::Work { gen, path };
        }
        state = match shared.cv(kind).wait(state) {
            Ok(guard) => guard,
            Err(_) => return Claim::Quit,
        };
    }
}

/// FILLING gate: wait (bounded) while the ring is full, above the throttle
/// watermark, or (for ambience) paused. Returns None to proceed with a
/// decode, or the reason to stop.
fn fill_gate(shared: &EngineShared, kind: StreamKind, gen: u64) -> Option<Step> {
    let Ok(mut state) = shared.state.lock() else {
        return Some(Step::Quit);
    };
    loop {
        if state.quit {
            return Some(Step::Quit);
        }
        let stream = state.stream(kind);
        if stream.pending_gen != gen {
            return Some(Step::Superseded);
        }

        let full = stream.ring.space() == 0;
        let throttled = stream.ring.frames_queued() * 4 > stream.ring.capacity() * 3;
        let paused = kind == StreamKind::Ambience && stream.paused;
        if !(full || throttled || paused) {
            return None;
        }

        state = match shared.cv(kind).wait_timeout(state, LOADER_WAIT) {
            Ok((guard, _)) => guard,
            Err(_) => return Some(Step::Quit),
        };
    }
}

/// Write converted frames into the ring, waiting out full periods. Never
/// drops a frame: either everything lands or the request was superseded.
fn write_frames(shared: &EngineShared, kind: StreamKind, gen: u64, data: &[i16]) -> Option<Step> {
    let mut offset = 0;
    while offset < data.len() {
        let Ok(mut state) = shared.state.lock() else {
            return Some(Step::Quit);
        };
        if state.quit {
            return Some(Step::Quit);
        }
        let stream = state.stream_mut(kind);
        if stream.pending_gen != gen {
            return Some(Step::Superseded);
        }

        let written = stream.ring.write(&data[offset..]);
        offset += written * CHANNELS;
        if offset < data.len() {
            let _ = shared.cv(kind).wait_timeout(state, LOADER_WAIT);
        }
    }
    None
}

/// Pull everything the converter currently holds into the ring
fn push_converted(
    shared: &EngineShared,
    kind: StreamKind,
    gen: u64,
    decoder: &mut StreamingDecoder,
    staging: &mut [i16],
) -> Option<Step> {
    loop {
        let frames = decoder.pull(staging);
        if frames == 0 {
            return None;
        }
        if let Some(step) = write_frames(shared, kind, gen, &staging[..frames * CHANNELS]) {
            return Some(step);
        }
    }
}

/// FILLING + DRAINING for the music stream
fn fill_music(
    shared: &EngineShared,
    gen: u64,
    decoder: &mut StreamingDecoder,
    staging: &mut [i16],
) -> Step {
    loop {
        if let Some(step) = fill_gate(shared, StreamKind::Music, gen) {
            return step;
        }

        let source_frames = match decoder.read_chunk() {
            Ok(n) => n,
            Err(e) => {
                // Local, non-fatal: finish the track with what converted
                log::warn!(
                    "music: decode error in {}, ending stream: {}",
                    decoder.path().display(),
                    e
                );
                0
            }
        };

        if source_frames == 0 {
            // DRAINING: flush the converter once, then land every remaining
            // converted frame before reporting eof; stopping early would
            // audibly clip the tail of the track
            if let Err(e) = decoder.finish() {
                log::warn!("music: converter flush failed: {}", e);
            }
            if let Some(step) = push_converted(shared, StreamKind::Music, gen, decoder, staging) {
                return step;
            }
            if let Ok(mut state) = shared.state.lock() {
                let stream = state.stream_mut(StreamKind::Music);
                if stream.pending_gen == gen {
                    stream.eof = true;
                }
            }
            log::debug!("music: drained {}", decoder.path().display());
            return Step::Eos;
        }

        if let Some(step) = push_converted(shared, StreamKind::Music, gen, decoder, staging) {
            return step;
        }
    }
}

/// FILLING for the ambience stream: end-of-source and decode errors both
/// rewind to frame 0 and keep going, so the loop survives transient damage
fn fill_ambience(
    shared: &EngineShared,
    gen: u64,
    decoder: &mut StreamingDecoder,
    staging: &mut [i16],
) -> Step {
    loop {
        if let Some(step) = fill_gate(shared, StreamKind::Ambience, gen) {
            return step;
        }

        match decoder.read_chunk() {
            Ok(0) => {
                if let Err(e) = decoder.seek_start() {
                    log::warn!(
                        "ambience: rewind of {} failed: {}",
                        decoder.path().display(),
                        e
                    );
                    idle_wait(shared, StreamKind::Ambience);
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!(
                    "ambience: decode error in {}, restarting loop: {}",
                    decoder.path().display(),
                    e
                );
                let _ = decoder.seek_start();
                idle_wait(shared, StreamKind::Ambience);
            }
        }

        if let Some(step) = push_converted(shared, StreamKind::Ambience, gen, decoder, staging) {
            return step;
        }
    }
}

/// Bounded pause between retries of a failing source
fn idle_wait(shared: &EngineShared, kind: StreamKind) {
    if let Ok(state) = shared.state.lock() {
        let _ = shared.cv(kind).wait_timeout(state, LOADER_WAIT);
    }
}
