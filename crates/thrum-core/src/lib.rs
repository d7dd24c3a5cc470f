//! Thrum: streaming audio engine
//!
//! Decodes MP3/WAV sources on background loader threads, converts them to a
//! fixed 16-bit stereo output format, and mixes background music, a looping
//! ambience bed, and one-shot sound effects inside the real-time device
//! callback. A post-mix tap feeds an FFT spectrum and a music envelope for
//! visualizers.
//!
//! # Architecture
//!
//! ```text
//! play_music()/play_ambience()         play_sfx()
//!        │ (bump generation,                │ (synchronous decode)
//!        │  signal condvar)                 ▼
//!        ▼                            ┌───────────┐
//! ┌──────────────┐   ring buffer      │ PcmBuffer │
//! │ loader thread │──────────────┐    └─────┬─────┘
//! │ decode+convert│              ▼          ▼
//! └──────────────┘      ┌──────────────────────────┐    ┌────────────┐
//! ┌──────────────┐      │     mixing callback      │───►│ device out │
//! │ loader thread │────►│ (volumes, clamp, taps)   │    └────────────┘
//! └──────────────┘      └────────────┬─────────────┘
//!                                    ▼
//!                       spectrum + envelope histories
//! ```
//!
//! One mutex guards all shared state; loader threads coordinate through two
//! condition variables and cooperative generation counters, so superseding a
//! request never kills a thread. The loader notices and abandons its work.
//!
//! # Example
//!
//! ```ignore
//! use thrum_core::{AudioEngine, EngineConfig};
//!
//! let engine = AudioEngine::init(&EngineConfig::default())?;
//! engine.play_music("soundtrack/title.mp3", false)?;
//! engine.play_ambience("ambience/rain.wav", false)?;
//! engine.set_music_volume(96);
//!
//! let mut bars = [0.0f32; 32];
//! if engine.get_spectrum(&mut bars) {
//!     // draw the bars
//! }
//! ```

pub mod config;
pub mod convert;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod ring;
pub mod sfx;
pub mod types;
pub mod visualizer;

pub use config::EngineConfig;
pub use engine::{list_output_devices, AudioEngine, OutputDeviceInfo};
pub use error::{AudioError, AudioResult};
pub use types::OutputSpec;
