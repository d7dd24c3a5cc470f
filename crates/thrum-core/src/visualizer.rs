//! Visualizer taps: spectrum history and music envelope
//!
//! Two independent taps, both written only from inside the mixing callback
//! and read from other threads under the engine lock.
//!
//! The *spectrum tap* records the final post-mix mono signal (normalized to
//! roughly -1..1) into a power-of-two circular history. `spectrum_bars`
//! windows the most recent [`FFT_WINDOW`] samples with a Hann window, runs a
//! forward FFT, averages positive-frequency magnitudes into linearly spaced
//! bins, applies a mild `ln(1 + k·v)` compression, and normalizes by the
//! tallest bin so the loudest bar is 1.0.
//!
//! The *envelope tap* tracks only the music contribution: a running
//! sum-of-squares per output frame, collapsed to one RMS value every UI-rate
//! tick (independent of the device rate) into a second, lower-rate history.
//!
//! Both taps report failure until enough history exists, so the UI simply
//! skips drawing for the first fraction of a second.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// FFT window length for spectrum analysis (power of two)
pub const FFT_WINDOW: usize = 1024;

/// Post-mix mono history length in samples (power of two)
pub const SPECTRUM_HISTORY: usize = 2048;

/// Envelope history length in values
pub const WAVEFORM_HISTORY: usize = 512;

/// Envelope values emitted per second, independent of the device rate
pub const WAVEFORM_RATE: u32 = 60;

/// Gain applied to RMS envelope values before clamping to 0..1
const WAVEFORM_GAIN: f32 = 2.5;

/// Shaping constant for the logarithmic bin compression
const LOG_SHAPE: f32 = 40.0;

/// Circular histories fed by the mixing callback
#[derive(Debug)]
pub struct Visualizer {
    mix_history: Vec<f32>,
    mix_pos: usize,
    mix_total: u64,

    wave_history: Vec<f32>,
    wave_pos: usize,
    wave_total: u64,
    sum_sq: f32,
    tick_frames: u32,
    frames_per_tick: u32,
}

impl Visualizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mix_history: vec![0.0; SPECTRUM_HISTORY],
            mix_pos: 0,
            mix_total: 0,
            wave_history: vec![0.0; WAVEFORM_HISTORY],
            wave_pos: 0,
            wave_total: 0,
            sum_sq: 0.0,
            tick_frames: 0,
            frames_per_tick: (sample_rate / WAVEFORM_RATE).max(1),
        }
    }

    /// Record one post-mix mono sample (normalized to -1..1)
    pub fn push_mix_sample(&mut self, value: f32) {
        self.mix_history[self.mix_pos] = value;
        self.mix_pos = (self.mix_pos + 1) % SPECTRUM_HISTORY;
        self.mix_total += 1;
    }

    /// Accumulate one music-only mono sample; emits an RMS value into the
    /// envelope history once a UI-rate tick completes
    pub fn push_music_sample(&mut self, value: f32) {
        self.sum_sq += value * value;
        self.tick_frames += 1;
        if self.tick_frames >= self.frames_per_tick {
            let rms = (self.sum_sq / self.tick_frames as f32).sqrt();
            let shaped = (rms * WAVEFORM_GAIN).clamp(0.0, 1.0);
            self.wave_history[self.wave_pos] = shaped;
            self.wave_pos = (self.wave_pos + 1) % WAVEFORM_HISTORY;
            self.wave_total += 1;
            self.sum_sq = 0.0;
            self.tick_frames = 0;
        }
    }

    /// Copy the most recent FFT window in chronological order.
    /// Fails until a full window has ever been written.
    pub fn copy_spectrum_window(&self, out: &mut [f32; FFT_WINDOW]) -> bool {
        if self.mix_total < FFT_WINDOW as u64 {
            return false;
        }
        let start = (self.mix_pos + SPECTRUM_HISTORY - FFT_WINDOW) % SPECTRUM_HISTORY;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.mix_history[(start + i) % SPECTRUM_HISTORY];
        }
        true
    }

    /// Copy the most recent `out.len()` envelope values in chronological
    /// order. Fails while history is insufficient.
    pub fn copy_waveform(&self, out: &mut [f32]) -> bool {
        let n = out.len();
        if n == 0 || n > WAVEFORM_HISTORY || self.wave_total < n as u64 {
            return false;
        }
        let start = (self.wave_pos + WAVEFORM_HISTORY - n) % WAVEFORM_HISTORY;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.wave_history[(start + i) % WAVEFORM_HISTORY];
        }
        true
    }
}

/// Reduce one FFT window to `out.len()` spectrum bars in 0..=1.
///
/// Runs on the caller's thread over a copied window, so the engine lock is
/// never held across the transform.
pub fn spectrum_bars(window: &[f32; FFT_WINDOW], out: &mut [f32]) {
    if out.is_empty() {
        return;
    }

    let mut buf: Vec<Complex<f32>> = window
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let hann = 0.5
                * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / FFT_WINDOW as f32).cos());
            Complex::new(s * hann, 0.0)
        })
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(FFT_WINDOW).process(&mut buf);

    // Positive frequencies, DC excluded
    let usable = FFT_WINDOW / 2 - 1;
    let norm = 1.0 / FFT_WINDOW as f32;
    let bins = out.len();

    for (b, bar) in out.iter_mut().enumerate() {
        let start = 1 + b * usable / bins;
        let end = (1 + (b + 1) * usable / bins).max(start + 1);
        let mut sum = 0.0f32;
        for bin in &buf[start..end] {
            sum += bin.norm() * norm;
        }
        let avg = sum / (end - start) as f32;
        *bar = (1.0 + LOG_SHAPE * avg).ln();
    }

    let max = out.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for bar in out.iter_mut() {
            *bar /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_window_requires_full_history() {
        let mut viz = Visualizer::new(44_100);
        let mut window = [0.0f32; FFT_WINDOW];

        for _ in 0..FFT_WINDOW - 1 {
            viz.push_mix_sample(0.5);
        }
        assert!(!viz.copy_spectrum_window(&mut window));

        viz.push_mix_sample(0.5);
        assert!(viz.copy_spectrum_window(&mut window));
    }

    #[test]
    fn test_spectrum_window_is_chronological() {
        let mut viz = Visualizer::new(44_100);
        // Write more than the history length so the ring wraps
        for i in 0..(SPECTRUM_HISTORY + 100) {
            viz.push_mix_sample(i as f32);
        }
        let mut window = [0.0f32; FFT_WINDOW];
        assert!(viz.copy_spectrum_window(&mut window));

        let last = (SPECTRUM_HISTORY + 100 - 1) as f32;
        assert_eq!(window[FFT_WINDOW - 1], last);
        assert_eq!(window[0], last - (FFT_WINDOW as f32 - 1.0));
    }

    #[test]
    fn test_bars_normalized_with_peak_at_one() {
        let mut window = [0.0f32; FFT_WINDOW];
        // Pure tone at bin 64, plus a weaker one at bin 200
        for (i, slot) in window.iter_mut().enumerate() {
            let t = i as f32 / FFT_WINDOW as f32;
            *slot = (2.0 * std::f32::consts::PI * 64.0 * t).sin() * 0.8
                + (2.0 * std::f32::consts::PI * 200.0 * t).sin() * 0.2;
        }

        let mut bars = [0.0f32; 32];
        spectrum_bars(&window, &mut bars);

        let max = bars.iter().cloned().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(bars.iter().all(|&b| (0.0..=1.0).contains(&b)));

        // The strong tone's bar dominates the weak tone's bar
        let strong = bars[64 * 32 / (FFT_WINDOW / 2)];
        let weak = bars[200 * 32 / (FFT_WINDOW / 2)];
        assert!(strong > weak);
    }

    #[test]
    fn test_bars_silent_window_all_zero() {
        let window = [0.0f32; FFT_WINDOW];
        let mut bars = [0.0f32; 16];
        spectrum_bars(&window, &mut bars);
        assert!(bars.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_envelope_tick_cadence() {
        let mut viz = Visualizer::new(48_000);
        let per_tick = 48_000 / WAVEFORM_RATE;

        // One tick's worth of a constant 0.2 signal -> exactly one value
        for _ in 0..per_tick {
            viz.push_music_sample(0.2);
        }
        let mut out = [0.0f32; 1];
        assert!(viz.copy_waveform(&mut out));
        let expected = (0.2f32 * WAVEFORM_GAIN).min(1.0);
        assert!((out[0] - expected).abs() < 1e-3);

        // Nothing further emitted until the next tick completes
        viz.push_music_sample(0.9);
        let mut two = [0.0f32; 2];
        assert!(!viz.copy_waveform(&mut two));
    }

    #[test]
    fn test_waveform_chronological_and_bounded() {
        let mut viz = Visualizer::new(48_000);
        let per_tick = 48_000 / WAVEFORM_RATE;

        // Three ticks of rising amplitude
        for &amp in &[0.05f32, 0.1, 0.15] {
            for _ in 0..per_tick {
                viz.push_music_sample(amp);
            }
        }

        let mut out = [0.0f32; 3];
        assert!(viz.copy_waveform(&mut out));
        assert!(out[0] < out[1] && out[1] < out[2]);
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_waveform_rejects_oversized_request() {
        let viz = Visualizer::new(44_100);
        let mut out = vec![0.0f32; WAVEFORM_HISTORY + 1];
        assert!(!viz.copy_waveform(&mut out));
    }
}
