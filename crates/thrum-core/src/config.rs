//! Engine configuration
//!
//! `EngineConfig` describes how the output device should be opened: which
//! device, which sample rates to try, and the requested period size. The
//! struct is serde-serializable so the embedding application can persist it
//! wherever it keeps its settings; the engine itself never touches disk.

use serde::{Deserialize, Serialize};

use crate::types::PREFERRED_SAMPLE_RATES;

/// Smallest period size accepted from a configuration (frames)
pub const MIN_BUFFER_FRAMES: u32 = 64;

/// Largest period size accepted from a configuration (frames)
pub const MAX_BUFFER_FRAMES: u32 = 4096;

/// Configuration for opening the audio engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output device name as reported by the system (None = system default)
    pub device: Option<String>,

    /// Requested device period in frames (None = device default).
    /// Clamped to [`MIN_BUFFER_FRAMES`]..=[`MAX_BUFFER_FRAMES`].
    pub buffer_frames: Option<u32>,

    /// Sample rates to attempt, in order. The first rate the device supports
    /// wins; if none match, the device's own preferred rate is used.
    pub preferred_rates: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_frames: None,
            preferred_rates: PREFERRED_SAMPLE_RATES.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Select a specific output device by name
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }

    /// Request a fixed period size in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames.clamp(MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES));
        self
    }

    /// Replace the preferred sample rate list
    pub fn with_preferred_rates(mut self, rates: Vec<u32>) -> Self {
        self.preferred_rates = rates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefers_cd_rate_first() {
        let config = EngineConfig::default();
        assert_eq!(config.preferred_rates, vec![44_100, 48_000]);
        assert!(config.device.is_none());
        assert!(config.buffer_frames.is_none());
    }

    #[test]
    fn test_buffer_frames_clamped() {
        let config = EngineConfig::default().with_buffer_frames(16);
        assert_eq!(config.buffer_frames, Some(MIN_BUFFER_FRAMES));

        let config = EngineConfig::default().with_buffer_frames(1 << 20);
        assert_eq!(config.buffer_frames, Some(MAX_BUFFER_FRAMES));
    }
}
