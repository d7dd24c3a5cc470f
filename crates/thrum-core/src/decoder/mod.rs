//! Polymorphic streaming decoder over {MP3, WAV}
//!
//! A `StreamingDecoder` pairs a format backend with a [`FormatConverter`]
//! targeting the engine output spec, and a bounded scratch buffer of one
//! decode chunk. The backend is picked by file extension with
//! extension-agnostic fallback probing: the WAV container is tried first
//! (cheap header check), then MP3, unless the extension says `.mp3`, in
//! which case the order flips. Adding a codec means adding a variant here;
//! the loader threads and mixer are untouched.
//!
//! Each decoder is owned exclusively by its loader thread. The mixing
//! callback never sees decode state; it only reads the lock-protected
//! `eof`/`inited` flags kept in the engine state.

mod mp3;
mod wav;

use std::path::{Path, PathBuf};

pub use mp3::Mp3Decoder;
pub use wav::WavDecoder;

use crate::convert::FormatConverter;
use crate::error::{AudioError, AudioResult};
use crate::types::{OutputSpec, DECODE_CHUNK_FRAMES};

enum Backend {
    Wav(WavDecoder),
    Mp3(Mp3Decoder),
}

impl Backend {
    fn source_format(&self) -> (u32, u16) {
        match self {
            Backend::Wav(d) => (d.sample_rate(), d.channels()),
            Backend::Mp3(d) => (d.sample_rate(), d.channels()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Backend::Wav(_) => "wav",
            Backend::Mp3(_) => "mp3",
        }
    }
}

/// Incremental decoder producing converted output-spec frames
pub struct StreamingDecoder {
    backend: Backend,
    converter: FormatConverter,
    scratch: Vec<i16>,
    path: PathBuf,
}

impl StreamingDecoder {
    /// Open `path`, selecting a decode backend and building the converter.
    /// Any partially constructed state is torn down on failure.
    pub fn open(path: &Path, spec: OutputSpec) -> AudioResult<Self> {
        let backend = Self::probe(path)?;
        let (rate, channels) = backend.source_format();
        let converter = FormatConverter::new(rate, channels, spec)?;

        log::debug!(
            "opened {} as {} ({} Hz, {} ch) -> {} Hz stereo",
            path.display(),
            backend.kind(),
            rate,
            channels,
            spec.sample_rate
        );

        Ok(Self {
            backend,
            converter,
            scratch: Vec::with_capacity(DECODE_CHUNK_FRAMES * channels as usize),
            path: path.to_path_buf(),
        })
    }

    fn probe(path: &Path) -> AudioResult<Backend> {
        fn open_wav(p: &Path) -> AudioResult<Backend> {
            WavDecoder::open(p).map(Backend::Wav)
        }
        fn open_mp3(p: &Path) -> AudioResult<Backend> {
            Mp3Decoder::open(p).map(Backend::Mp3)
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        type Probe = fn(&Path) -> AudioResult<Backend>;
        let (first, second): (Probe, Probe) = if ext.as_deref() == Some("mp3") {
            (open_mp3, open_wav)
        } else {
            (open_wav, open_mp3)
        };

        match first(path) {
            Ok(backend) => Ok(backend),
            Err(first_err) => second(path).map_err(|second_err| {
                AudioError::decode(
                    path,
                    format!("not a decodable file ({}; {})", first_err, second_err),
                )
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_rate(&self) -> u32 {
        self.backend.source_format().0
    }

    pub fn source_channels(&self) -> u16 {
        self.backend.source_format().1
    }

    /// Decode up to one chunk of source frames and feed them to the
    /// converter. Returns source frames decoded; 0 means end-of-stream.
    pub fn read_chunk(&mut self) -> AudioResult<usize> {
        let n = match &mut self.backend {
            Backend::Wav(d) => d.read_chunk(&mut self.scratch, DECODE_CHUNK_FRAMES)?,
            Backend::Mp3(d) => d.read_chunk(&mut self.scratch, DECODE_CHUNK_FRAMES)?,
        };
        if n > 0 {
            self.converter.push_frames(&self.scratch)?;
        }
        Ok(n)
    }

    /// Flush the converter after end-of-source. Safe to call more than once.
    pub fn finish(&mut self) -> AudioResult<()> {
        self.converter.flush()
    }

    /// Pull converted output-spec frames; returns frames copied
    pub fn pull(&mut self, out: &mut [i16]) -> usize {
        self.converter.pull(out)
    }

    /// Converted frames waiting to be pulled
    pub fn pending_output(&self) -> usize {
        self.converter.pending_output()
    }

    /// Rewind the source to frame 0 for gapless looping. The converter keeps
    /// running so the loop seam carries no discontinuity.
    pub fn seek_start(&mut self) -> AudioResult<()> {
        match &mut self.backend {
            Backend::Wav(d) => d.seek_start(),
            Backend::Mp3(d) => d.seek_start(),
        }
    }

    /// Release backend and converter resources
    pub fn close(self) {}
}
