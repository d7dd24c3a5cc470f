//! Shared engine state and control operations
//!
//! One mutex serializes everything the three execution contexts share: ring
//! buffers, decoder flags, generation counters, volumes, pause flags, the
//! SFX buffer, and the visualizer histories. Critical sections stay short
//! and bounded; decoding and file I/O always happen with the lock released.
//!
//! Cancellation is cooperative: control calls bump `pending_gen`, loader
//! threads compare it against the generation they claimed at every
//! checkpoint and abandon superseded work. No thread is ever killed.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::{AudioError, AudioResult};
use crate::ring::RingBuffer;
use crate::sfx::PcmBuffer;
use crate::types::{OutputSpec, VOLUME_MAX};
use crate::visualizer::Visualizer;

/// Which streamed source a control call or loader addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Music,
    Ambience,
}

impl StreamKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            StreamKind::Music => "music",
            StreamKind::Ambience => "ambience",
        }
    }
}

/// Per-channel and master volumes on the 0..=128 scale
#[derive(Debug, Clone, Copy)]
pub(crate) struct Volumes {
    pub master: u8,
    pub music: u8,
    pub ambience: u8,
    pub sfx: u8,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            master: VOLUME_MAX,
            music: VOLUME_MAX,
            ambience: VOLUME_MAX,
            sfx: VOLUME_MAX,
        }
    }
}

/// State for one streamed source (music or ambience)
#[derive(Debug)]
pub(crate) struct StreamState {
    pub ring: RingBuffer,
    /// Bumped by every play/stop request
    pub pending_gen: u64,
    /// Generation the loader last claimed
    pub active_gen: u64,
    /// Path of the pending request (None = stop)
    pub pending_path: Option<PathBuf>,
    /// Path the loader is currently streaming
    pub current_path: Option<PathBuf>,
    /// Loader has an open decoder for the current generation
    pub inited: bool,
    /// Decoder reached end-of-source and the converter is drained
    pub eof: bool,
    pub paused: bool,
    /// Prefill gate passed: enough audio queued to unmute without crackle
    pub prefilled: bool,
    pub prefill_frames: usize,
}

impl StreamState {
    fn new(spec: OutputSpec) -> Self {
        Self {
            ring: RingBuffer::new(spec.ring_frames()),
            pending_gen: 0,
            active_gen: 0,
            pending_path: None,
            current_path: None,
            inited: false,
            eof: false,
            paused: false,
            prefilled: false,
            prefill_frames: spec.prefill_frames(),
        }
    }

    /// Would a play request for `path` hit the stream's current target?
    fn targets_path(&self, path: &Path) -> bool {
        if self.pending_gen != self.active_gen || !self.inited {
            // Unclaimed or claimed-but-still-opening request; a failed open
            // clears `pending_path`, so that case falls through to a retry
            self.pending_path.as_deref() == Some(path)
        } else {
            self.current_path.as_deref() == Some(path)
                && !(self.eof && self.ring.is_empty())
        }
    }
}

/// Everything behind the engine mutex
pub(crate) struct EngineState {
    pub quit: bool,
    pub music: StreamState,
    pub ambience: StreamState,
    pub sfx: Option<PcmBuffer>,
    pub volumes: Volumes,
    /// One-shot "track ended" latch, consumed by `pop_music_ended`
    pub music_ended: bool,
    /// Set alongside the latch so one track end fires exactly one event
    pub end_latched: bool,
    pub viz: Visualizer,
}

impl EngineState {
    pub(crate) fn stream(&self, kind: StreamKind) -> &StreamState {
        match kind {
            StreamKind::Music => &self.music,
            StreamKind::Ambience => &self.ambience,
        }
    }

    pub(crate) fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamState {
        match kind {
            StreamKind::Music => &mut self.music,
            StreamKind::Ambience => &mut self.ambience,
        }
    }
}

/// Shared core of the engine: the mutex, the condvars, and the output spec.
/// Control calls, loader threads, and the mixing callback all operate on
/// this through an `Arc`.
pub(crate) struct EngineShared {
    pub spec: OutputSpec,
    pub state: Mutex<EngineState>,
    pub music_cv: Condvar,
    pub ambience_cv: Condvar,
}

impl EngineShared {
    pub(crate) fn new(spec: OutputSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(EngineState {
                quit: false,
                music: StreamState::new(spec),
                ambience: StreamState::new(spec),
                sfx: None,
                volumes: Volumes::default(),
                music_ended: false,
                end_latched: false,
                viz: Visualizer::new(spec.sample_rate),
            }),
            music_cv: Condvar::new(),
            ambience_cv: Condvar::new(),
        }
    }

    pub(crate) fn cv(&self, kind: StreamKind) -> &Condvar {
        match kind {
            StreamKind::Music => &self.music_cv,
            StreamKind::Ambience => &self.ambience_cv,
        }
    }

    pub(crate) fn lock(&self) -> AudioResult<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| AudioError::InitFailed("engine state lock poisoned".into()))
    }

    /// Queue a play request for a stream. Clears the ring synchronously so a
    /// replaced track falls silent immediately; the decode itself starts
    /// asynchronously on the loader thread.
    pub(crate) fn request_play(
        &self,
        kind: StreamKind,
        path: &Path,
        restart_if_same: bool,
    ) -> AudioResult<()> {
        {
            let mut state = self.lock()?;
            if !restart_if_same && state.stream(kind).targets_path(path) {
                log::debug!("{}: {} already playing", kind.name(), path.display());
                return Ok(());
            }

            if kind == StreamKind::Music {
                state.music_ended = false;
                state.end_latched = false;
            }
            let stream = state.stream_mut(kind);
            stream.pending_gen += 1;
            stream.pending_path = Some(path.to_path_buf());
            stream.ring.clear();
            stream.prefilled = false;
            stream.eof = false;
            log::debug!(
                "{}: queued {} (gen {})",
                kind.name(),
                path.display(),
                stream.pending_gen
            );
        }
        self.cv(kind).notify_one();
        Ok(())
    }

    /// Stop a stream: immediate silence, loader tears its decoder down at
    /// the next checkpoint.
    pub(crate) fn request_stop(&self, kind: StreamKind) -> AudioResult<()> {
        {
            let mut state = self.lock()?;
            if kind == StreamKind::Music {
                state.music_ended = false;
                state.end_latched = false;
            }
            let stream = state.stream_mut(kind);
            stream.pending_gen += 1;
            stream.pending_path = None;
            stream.current_path = None;
            stream.ring.clear();
            stream.inited = false;
            stream.eof = false;
            stream.prefilled = false;
            log::debug!("{}: stop (gen {})", kind.name(), stream.pending_gen);
        }
        self.cv(kind).notify_one();
        Ok(())
    }

    pub(crate) fn set_paused(&self, kind: StreamKind, paused: bool) -> AudioResult<()> {
        self.lock()?.stream_mut(kind).paused = paused;
        // Wake the loader so an unpaused ambience stream resumes decoding
        self.cv(kind).notify_one();
        Ok(())
    }

    /// Install a freshly decoded SFX, replacing any current one
    pub(crate) fn set_sfx(&self, buffer: PcmBuffer) -> AudioResult<()> {
        self.lock()?.sfx = Some(buffer);
        Ok(())
    }

    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut EngineState) -> R,
    ) -> AudioResult<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Consume the "track ended" latch
    pub(crate) fn pop_music_ended(&self) -> bool {
        match self.state.lock() {
            Ok(mut state) => std::mem::take(&mut state.music_ended),
            Err(_) => false,
        }
    }

    /// Flag shutdown and wake both loaders
    pub(crate) fn request_quit(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.quit = true;
        }
        self.music_cv.notify_all();
        self.ambience_cv.notify_all();
    }
}
