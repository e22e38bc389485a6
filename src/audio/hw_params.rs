use crate::audio::backend::{HwParamSteps, SampleFormat};
use crate::audio::error::PlaybackError;
use crate::audio::stream::StreamDescriptor;
use tracing::{debug, info, instrument, warn};

const LOG_TARGET: &str = "pcm_player::audio::hw_params";

/// Result of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub format: SampleFormat,
    pub channels: u32,
    /// Rate the device accepted; may differ from the stream's rate.
    pub rate: u32,
    /// Frames per hardware period.
    pub period_frames: usize,
}

/// Maps bits-per-sample to the device sample format.
pub fn sample_format(bits_per_sample: u16) -> Result<SampleFormat, PlaybackError> {
    match bits_per_sample {
        8 => Ok(SampleFormat::U8),
        16 => Ok(SampleFormat::S16Le),
        24 => Ok(SampleFormat::S24Le3),
        other => Err(PlaybackError::Format(format!(
            "{} bits per sample (expected 8, 16 or 24)",
            other
        ))),
    }
}

/// Configures a device for `descriptor`: interleaved access, sample format,
/// channel count, nearest supported rate, then commits. The first failing
/// step aborts with an error naming it.
#[instrument(skip(params, descriptor), fields(rate = descriptor.sample_rate, channels = descriptor.channels, bits = descriptor.bits_per_sample))]
pub fn negotiate<P: HwParamSteps>(params: &mut P, descriptor: &StreamDescriptor) -> Result<NegotiatedParams, PlaybackError> {
    let format = sample_format(descriptor.bits_per_sample)?;
    let channels = u32::from(descriptor.channels);

    params.set_access_interleaved()?;
    params.set_format(format)?;
    params.set_channels(channels)?;
    let rate = params.set_rate_near(descriptor.sample_rate)?;
    if rate != descriptor.sample_rate {
        warn!(
            target: LOG_TARGET,
            "Rate negotiation: requested={}, actual={}",
            descriptor.sample_rate, rate
        );
    } else {
        debug!(target: LOG_TARGET, "Rate set to {}", rate);
    }
    params.commit()?;
    let period_frames = params.period_size()?;

    info!(
        target: LOG_TARGET,
        "Hardware parameters applied: {:?}, {} channels, {} Hz, period {} frames",
        format, channels, rate, period_frames
    );
    Ok(NegotiatedParams {
        format,
        channels,
        rate,
        period_frames,
    })
}
