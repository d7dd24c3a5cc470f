//! Output device negotiation and stream construction
//!
//! Picks an output device (by configured name or system default), negotiates
//! a stereo configuration at the first preferred sample rate the device
//! supports (44.1 kHz, then 48 kHz, then whatever the device offers), and
//! builds the cpal stream whose callback drives `EngineShared::render`.
//!
//! The mixing path is 16-bit throughout, so an i16 device format is used
//! directly; f32 devices get a scale-out conversion in the callback.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::config::{EngineConfig, MAX_BUFFER_FRAMES, MIN_BUFFER_FRAMES};
use crate::error::{AudioError, AudioResult};
use crate::types::{CHANNELS, MAX_PERIOD_FRAMES};

use super::state::EngineShared;

/// Information about an available output device, for settings UIs
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    /// Device name as reported by the system
    pub name: String,
    /// Whether this is the system default output
    pub is_default: bool,
}

/// Enumerate output devices on the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };
    devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let is_default = default_name.as_ref() == Some(&name);
            Some(OutputDeviceInfo { name, is_default })
        })
        .collect()
}

/// A negotiated output: device plus the stream parameters to open it with
pub(crate) struct NegotiatedOutput {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    pub sample_rate: u32,
}

pub(crate) fn negotiate_output(config: &EngineConfig) -> AudioResult<NegotiatedOutput> {
    let host = cpal::default_host();

    let device = match &config.device {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::InitFailed(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| {
                AudioError::InitFailed(format!("audio device not found: {}", name))
            })?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::InitFailed("no default output device".into()))?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::OpenFailed(e.to_string()))?
        .filter(|c| c.channels() as usize >= CHANNELS)
        .filter(|c| {
            matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        .collect();
    if supported.is_empty() {
        return Err(AudioError::OpenFailed(format!(
            "no usable stereo output configuration on {}",
            device_name
        )));
    }

    // First preferred rate the device supports wins; i16 beats f32 at equal
    // rate since the mixing path is 16-bit native
    let mut chosen = None;
    'rates: for &rate in &config.preferred_rates {
        for format in [SampleFormat::I16, SampleFormat::F32] {
            if let Some(range) = supported.iter().find(|c| {
                c.sample_format() == format
                    && rate >= c.min_sample_rate().0
                    && rate <= c.max_sample_rate().0
            }) {
                chosen = Some((range.clone().with_sample_rate(SampleRate(rate)), rate));
                break 'rates;
            }
        }
    }

    // Fall back to whatever the device prefers
    let (supported_config, sample_rate) = match chosen {
        Some(found) => found,
        None => {
            let range = &supported[0];
            let rate = range.max_sample_rate().0;
            log::warn!(
                "Audio device supports none of {:?} Hz, falling back to {} Hz",
                config.preferred_rates,
                rate
            );
            (range.clone().with_sample_rate(range.max_sample_rate()), rate)
        }
    };

    let sample_format = supported_config.sample_format();
    let buffer_size = match config.buffer_frames {
        Some(frames) => {
            BufferSize::Fixed(frames.clamp(MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES))
        }
        None => BufferSize::Default,
    };

    let stream_config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size,
    };

    log::info!(
        "Audio config: {} channels, {} Hz, {:?} samples",
        stream_config.channels,
        sample_rate,
        sample_format
    );

    Ok(NegotiatedOutput {
        device,
        config: stream_config,
        sample_format,
        sample_rate,
    })
}

/// Build (but do not start) the output stream driving the mixer
pub(crate) fn build_stream(
    negotiated: &NegotiatedOutput,
    shared: Arc<EngineShared>,
) -> AudioResult<Stream> {
    let channels = negotiated.config.channels as usize;

    match negotiated.sample_format {
        SampleFormat::I16 => {
            let mut mix = vec![0i16; MAX_PERIOD_FRAMES * CHANNELS];
            negotiated
                .device
                .build_output_stream(
                    &negotiated.config,
                    move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                        fill_device_buffer(&shared, &mut mix, data, channels, |s| s);
                    },
                    stream_error,
                    None,
                )
                .map_err(|e| AudioError::OpenFailed(e.to_string()))
        }
        SampleFormat::F32 => {
            let mut mix = vec![0i16; MAX_PERIOD_FRAMES * CHANNELS];
            negotiated
                .device
                .build_output_stream(
                    &negotiated.config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        fill_device_buffer(&shared, &mut mix, data, channels, |s| {
                            s as f32 / 32768.0
                        });
                    },
                    stream_error,
                    None,
                )
                .map_err(|e| AudioError::OpenFailed(e.to_string()))
        }
        other => Err(AudioError::OpenFailed(format!(
            "unsupported device sample format: {:?}",
            other
        ))),
    }
}

fn stream_error(err: cpal::StreamError) {
    log::error!("Audio stream error: {}", err);
}

/// Render stereo mix slices and spread them across the device's channel
/// layout. Large periods are rendered in `MAX_PERIOD_FRAMES` slices so the
/// scratch buffer never reallocates.
fn fill_device_buffer<T: Copy>(
    shared: &EngineShared,
    mix: &mut [i16],
    data: &mut [T],
    channels: usize,
    convert: impl Fn(i16) -> T,
) {
    let mut offset = 0;
    while offset < data.len() {
        let frames = ((data.len() - offset) / channels).min(MAX_PERIOD_FRAMES);
        if frames == 0 {
            break;
        }
        let mix_slice = &mut mix[..frames * CHANNELS];
        shared.render(mix_slice);

        for f in 0..frames {
            let frame = &mut data[offset + f * channels..offset + (f + 1) * channels];
            frame[0] = convert(mix_slice[f * CHANNELS]);
            if channels > 1 {
                frame[1] = convert(mix_slice[f * CHANNELS + 1]);
            }
            // Devices with more than two channels get silence on the rest
            for sample in frame.iter_mut().skip(CHANNELS) {
                *sample = convert(0);
            }
        }
        offset += frames * channels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration_tolerates_missing_hardware() {
        // May legitimately be empty in CI; must not panic either way
        let devices = list_output_devices();
        for device in &devices {
            assert!(!device.name.is_empty());
        }
    }
}
