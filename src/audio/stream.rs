use crate::audio::error::PlaybackError;
use std::io::{Read, Seek};
use std::time::Duration;
use tracing::debug;

const LOG_TARGET: &str = "pcm_player::audio::stream";

/// A seekable byte source holding a WAV container.
pub trait PcmSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> PcmSource for T {}

/// Layout of the PCM data inside a decoded WAV container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Bytes of PCM data per second of audio.
    pub byte_rate: u32,
    /// Bytes per frame.
    pub block_align: u16,
    /// Byte offset in the source where PCM data begins.
    pub header_end: u64,
    /// Length of the PCM data in bytes.
    pub data_len: u64,
}

impl StreamDescriptor {
    /// Decodes the WAV header from `source`, leaving it positioned at the
    /// first byte of PCM data.
    pub fn from_source<R: Read + Seek>(source: &mut R) -> Result<Self, PlaybackError> {
        let (spec, samples) = {
            let reader = hound::WavReader::new(&mut *source)?;
            (reader.spec(), reader.len())
        };
        let header_end = source.stream_position()?;

        let bytes_per_sample = spec.bits_per_sample.div_ceil(8);
        let block_align = spec.channels.saturating_mul(bytes_per_sample);
        let descriptor = StreamDescriptor {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            byte_rate: spec.sample_rate.saturating_mul(u32::from(block_align)),
            block_align,
            header_end,
            data_len: u64::from(samples) * u64::from(bytes_per_sample),
        };
        debug!(target: LOG_TARGET, "Decoded WAV header: {:?}", descriptor);
        Ok(descriptor)
    }

    /// Byte offset just past the PCM data.
    pub fn data_end(&self) -> u64 {
        self.header_end.saturating_add(self.data_len)
    }

    /// Source offset for a playback position in milliseconds:
    /// `header_end + floor(ms / 1000 * byte_rate)`, rounded down to a whole
    /// frame and never before `header_end`.
    pub fn offset_for_ms(&self, ms: i64) -> u64 {
        let bytes = (i128::from(ms) * i128::from(self.byte_rate)).div_euclid(1000);
        if bytes <= 0 {
            return self.header_end;
        }
        let align = i128::from(self.block_align.max(1));
        let aligned = bytes - bytes % align;
        self.header_end.saturating_add(u64::try_from(aligned).unwrap_or(u64::MAX))
    }

    /// Playback time covered by `data_bytes` bytes of PCM data.
    pub fn duration_of(&self, data_bytes: u64) -> Duration {
        if self.byte_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(data_bytes as f64 / f64::from(self.byte_rate))
    }
}
