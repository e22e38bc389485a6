//! The seam between the playback engine and the native audio subsystem.
//!
//! [`AudioBackend`] opens device and mixer handles; everything the engine does
//! to a handle goes through [`PcmDevice`], [`HwParamSteps`] and
//! [`MixerControl`]. The ALSA implementation lives in
//! [`crate::audio::alsa_handler`].

use crate::audio::error::DeviceError;

/// PCM sample formats the engine can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit little-endian.
    S16Le,
    /// Signed 24-bit little-endian, packed in 3 bytes.
    S24Le3,
}

/// Mixer channels addressed by volume and mute operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerChannel {
    FrontLeft,
    FrontRight,
}

impl MixerChannel {
    pub const STEREO: [MixerChannel; 2] = [MixerChannel::FrontLeft, MixerChannel::FrontRight];
}

/// Hardware parameter configuration for one device, applied step by step.
/// Nothing reaches the hardware until [`HwParamSteps::commit`].
pub trait HwParamSteps {
    fn set_access_interleaved(&mut self) -> Result<(), DeviceError>;
    fn set_format(&mut self, format: SampleFormat) -> Result<(), DeviceError>;
    fn set_channels(&mut self, channels: u32) -> Result<(), DeviceError>;
    /// Returns the rate the device actually accepted.
    fn set_rate_near(&mut self, rate: u32) -> Result<u32, DeviceError>;
    fn commit(&mut self) -> Result<(), DeviceError>;
    /// Frames per hardware period; valid after `commit`.
    fn period_size(&self) -> Result<usize, DeviceError>;
}

/// An open playback device handle.
pub trait PcmDevice: Send {
    type HwParams<'a>: HwParamSteps
    where
        Self: 'a;

    fn hw_params(&mut self) -> Result<Self::HwParams<'_>, DeviceError>;

    /// Blocking interleaved write. `block` holds whole frames of
    /// `frame_bytes` each; returns the number of frames accepted.
    fn write_interleaved(&mut self, block: &[u8], frame_bytes: usize) -> Result<usize, DeviceError>;

    /// Discards any audio still buffered in the device.
    fn drop_buffer(&mut self) -> Result<(), DeviceError>;

    /// Makes the device writable again after a drop.
    fn prepare(&mut self) -> Result<(), DeviceError>;

    /// Blocks until buffered audio has played out.
    fn drain(&mut self) -> Result<(), DeviceError>;

    fn close(self) -> Result<(), DeviceError>;
}

/// An open mixer handle positioned on its first simple element.
pub trait MixerControl {
    fn playback_volume(&self, channel: MixerChannel) -> Result<i64, DeviceError>;
    fn set_playback_volume(&self, channel: MixerChannel, volume: i64) -> Result<(), DeviceError>;
    /// `true` when the channel's playback switch is on (not muted).
    fn playback_switch(&self, channel: MixerChannel) -> Result<bool, DeviceError>;
    fn set_playback_switch_all(&self, on: bool) -> Result<(), DeviceError>;
    fn close(self) -> Result<(), DeviceError>;
}

/// Factory for device and mixer handles.
pub trait AudioBackend: Send + Sync {
    type Device: PcmDevice;
    type Mixer: MixerControl;

    fn open_playback(&self, device_name: &str) -> Result<Self::Device, DeviceError>;

    /// Opens, attaches, registers and loads a mixer, failing if it exposes no
    /// simple element.
    fn open_mixer(&self, mixer_name: &str) -> Result<Self::Mixer, DeviceError>;
}
