//! WAV streaming decoder backed by hound
//!
//! Reads 16/24/32-bit integer and 32-bit float PCM, converting everything to
//! i16 at read time. Reads are incremental; the reader keeps its position
//! between chunks, and `seek_start` rewinds for gapless looping.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::SampleFormat;

use crate::error::{AudioError, AudioResult};

pub struct WavDecoder {
    reader: hound::WavReader<BufReader<File>>,
    spec: hound::WavSpec,
    path: PathBuf,
}

impl WavDecoder {
    /// Open a WAV file and validate its format
    pub fn open(path: &Path) -> AudioResult<Self> {
        let reader =
            hound::WavReader::open(path).map_err(|e| AudioError::decode(path, e))?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(AudioError::decode(
                path,
                format!(
                    "invalid WAV format: {} Hz, {} channels",
                    spec.sample_rate, spec.channels
                ),
            ));
        }
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16 | 24 | 32) | (SampleFormat::Float, 32) => {}
            (format, bits) => {
                return Err(AudioError::decode(
                    path,
                    format!("unsupported WAV sample format: {:?} {} bit", format, bits),
                ));
            }
        }

        Ok(Self {
            reader,
            spec,
            path: path.to_path_buf(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    /// Decode up to `max_frames` source frames into `dst` (interleaved i16).
    /// Returns the number of whole frames decoded; 0 means end-of-stream.
    pub fn read_chunk(&mut self, dst: &mut Vec<i16>, max_frames: usize) -> AudioResult<usize> {
        let ch = self.spec.channels as usize;
        let max_samples = max_frames * ch;
        dst.clear();

        match (self.spec.sample_format, self.spec.bits_per_sample) {
            (SampleFormat::Int, 16) => {
                for s in self.reader.samples::<i16>().take(max_samples) {
                    dst.push(s.map_err(|e| AudioError::decode(&self.path, e))?);
                }
            }
            (SampleFormat::Int, 24) => {
                for s in self.reader.samples::<i32>().take(max_samples) {
                    let v = s.map_err(|e| AudioError::decode(&self.path, e))?;
                    dst.push((v >> 8) as i16);
                }
            }
            (SampleFormat::Int, 32) => {
                for s in self.reader.samples::<i32>().take(max_samples) {
                    let v = s.map_err(|e| AudioError::decode(&self.path, e))?;
                    dst.push((v >> 16) as i16);
                }
            }
            (SampleFormat::Float, 32) => {
                for s in self.reader.samples::<f32>().take(max_samples) {
                    let v = s.map_err(|e| AudioError::decode(&self.path, e))?;
                    dst.push((v * 32767.0).round().clamp(-32768.0, 32767.0) as i16);
                }
            }
            // Rejected at open
            (format, bits) => {
                return Err(AudioError::decode(
                    &self.path,
                    format!("unsupported WAV sample format: {:?} {} bit", format, bits),
                ));
            }
        }

        // A truncated file can end mid-frame; drop the stray samples
        let frames = dst.len() / ch;
        dst.truncate(frames * ch);
        Ok(frames)
    }

    /// Rewind to the first frame
    pub fn seek_start(&mut self) -> AudioResult<()> {
        self.reader
            .seek(0)
            .map_err(|e| AudioError::decode(&self.path, e))
    }
}
