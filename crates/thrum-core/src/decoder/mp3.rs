//! MP3 streaming decoder backed by symphonia
//!
//! One packet is decoded per `read_chunk` call (an MP3 frame is 1152 source
//! frames, comfortably under the chunk size). Undecodable packets are
//! skipped with a warning rather than aborting the stream; hitting the real
//! end of the container reports 0 frames.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{AudioError, AudioResult};

pub struct Mp3Decoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    sample_buf: Option<SampleBuffer<i16>>,
    path: PathBuf,
}

impl Mp3Decoder {
    /// Probe and open an MP3 file
    pub fn open(path: &Path) -> AudioResult<Self> {
        let file = File::open(path).map_err(|e| AudioError::decode(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::decode(path, e))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::decode(path, "no audio track found"))?;
        let track_id = track.id;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::decode(
                path,
                format!(
                    "invalid source format: {} Hz, {} channels",
                    sample_rate, channels
                ),
            ));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::decode(path, e))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            path: path.to_path_buf(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into `dst` (interleaved i16).
    /// Returns the number of frames decoded; 0 means end-of-stream.
    pub fn read_chunk(&mut self, dst: &mut Vec<i16>, _max_frames: usize) -> AudioResult<usize> {
        dst.clear();
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(0);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(AudioError::decode(&self.path, e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!(
                        "skipping undecodable packet in {}: {}",
                        self.path.display(),
                        e
                    );
                    continue;
                }
                Err(e) => return Err(AudioError::decode(&self.path, e)),
            };

            if self.sample_buf.is_none() {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                self.sample_buf = Some(SampleBuffer::new(duration, spec));
            }
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                dst.extend_from_slice(buf.samples());
            }

            return Ok(dst.len() / self.channels as usize);
        }
    }

    /// Rewind to the first frame
    pub fn seek_start(&mut self) -> AudioResult<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(0u64),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AudioError::decode(&self.path, e))?;
        self.decoder.reset();
        Ok(())
    }
}
