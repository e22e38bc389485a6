use crate::audio::backend::{AudioBackend, HwParamSteps, MixerChannel, MixerControl, PcmDevice, SampleFormat};
use crate::audio::error::{DeviceError, DeviceOp};
use alsa::mixer::{Mixer, Selem, SelemChannelId};
use alsa::pcm::{Access, Format, HwParams, State as PcmState, PCM};
use alsa::{Direction, ValueOr};
use std::ffi::CString;
use tracing::{debug, info, instrument, trace};

const LOG_TARGET: &str = "pcm_player::audio::alsa_handler";

/// Tags an ALSA failure with the operation that produced it.
trait AlsaResultExt<T> {
    fn during(self, op: DeviceOp) -> Result<T, DeviceError>;
}

impl<T> AlsaResultExt<T> for alsa::Result<T> {
    fn during(self, op: DeviceOp) -> Result<T, DeviceError> {
        self.map_err(|e| DeviceError {
            op,
            code: -(e.errno() as i32),
            message: e.to_string(),
        })
    }
}

fn device_name(name: &str, op: DeviceOp) -> Result<CString, DeviceError> {
    CString::new(name).map_err(|_| DeviceError::from_code(op, libc::EINVAL))
}

/// ALSA implementation of [`AudioBackend`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaBackend;

impl AudioBackend for AlsaBackend {
    type Device = AlsaPcmDevice;
    type Mixer = AlsaMixer;

    #[instrument(skip(self))]
    fn open_playback(&self, device_name_str: &str) -> Result<AlsaPcmDevice, DeviceError> {
        info!(target: LOG_TARGET, "Opening ALSA playback device '{}'", device_name_str);
        let name = device_name(device_name_str, DeviceOp::OpenPlayback)?;
        let pcm = PCM::open(&name, Direction::Playback, false).during(DeviceOp::OpenPlayback)?; // Blocking mode
        Ok(AlsaPcmDevice {
            device_name: device_name_str.to_string(),
            pcm,
        })
    }

    fn open_mixer(&self, mixer_name: &str) -> Result<AlsaMixer, DeviceError> {
        debug!(target: LOG_TARGET, "Opening ALSA mixer '{}'", mixer_name);
        let name = device_name(mixer_name, DeviceOp::AttachMixer)?;
        let mut mixer = Mixer::open(false).during(DeviceOp::OpenMixer)?;
        mixer.attach(&name).during(DeviceOp::AttachMixer)?;
        Selem::register(&mut mixer).during(DeviceOp::RegisterMixer)?;
        mixer.load().during(DeviceOp::LoadMixer)?;

        let mixer = AlsaMixer { mixer };
        mixer.first_selem()?;
        Ok(mixer)
    }
}

/// An open ALSA PCM playback handle.
pub struct AlsaPcmDevice {
    device_name: String,
    pcm: PCM,
}

/// Hardware parameters being negotiated for an [`AlsaPcmDevice`].
pub struct AlsaHwParams<'a> {
    pcm: &'a PCM,
    hwp: HwParams<'a>,
}

impl HwParamSteps for AlsaHwParams<'_> {
    fn set_access_interleaved(&mut self) -> Result<(), DeviceError> {
        self.hwp.set_access(Access::RWInterleaved).during(DeviceOp::SetAccess)
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<(), DeviceError> {
        let format = match format {
            SampleFormat::U8 => Format::U8,
            SampleFormat::S16Le => Format::S16LE,
            SampleFormat::S24Le3 => Format::S243LE,
        };
        self.hwp.set_format(format).during(DeviceOp::SetFormat)
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), DeviceError> {
        self.hwp.set_channels(channels).during(DeviceOp::SetChannels)
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, DeviceError> {
        self.hwp.set_rate_near(rate, ValueOr::Nearest).during(DeviceOp::SetRate)
    }

    fn commit(&mut self) -> Result<(), DeviceError> {
        self.pcm.hw_params(&self.hwp).during(DeviceOp::CommitParams)
    }

    fn period_size(&self) -> Result<usize, DeviceError> {
        let frames = self.hwp.get_period_size().during(DeviceOp::GetPeriodSize)?;
        Ok(frames.max(1) as usize)
    }
}

impl PcmDevice for AlsaPcmDevice {
    type HwParams<'a> = AlsaHwParams<'a>
    where
        Self: 'a;

    fn hw_params(&mut self) -> Result<AlsaHwParams<'_>, DeviceError> {
        let hwp = HwParams::any(&self.pcm).during(DeviceOp::AllocateParams)?;
        Ok(AlsaHwParams { pcm: &self.pcm, hwp })
    }

    fn write_interleaved(&mut self, block: &[u8], _frame_bytes: usize) -> Result<usize, DeviceError> {
        self.pcm.io_bytes().writei(block).during(DeviceOp::Write)
    }

    fn drop_buffer(&mut self) -> Result<(), DeviceError> {
        trace!(target: LOG_TARGET, "Dropping ALSA buffer on '{}'", self.device_name);
        self.pcm.drop().during(DeviceOp::Drop)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.pcm.prepare().during(DeviceOp::Prepare)
    }

    /// Drains only a running or prepared stream; a dropped stream has nothing
    /// left to play.
    fn drain(&mut self) -> Result<(), DeviceError> {
        match self.pcm.state() {
            PcmState::Running | PcmState::Prepared => {
                debug!(target: LOG_TARGET, "Draining ALSA buffer.");
                self.pcm.drain().during(DeviceOp::Drain)
            }
            other => {
                debug!(target: LOG_TARGET, "ALSA in state {:?}, skipping drain.", other);
                Ok(())
            }
        }
    }

    fn close(self) -> Result<(), DeviceError> {
        debug!(target: LOG_TARGET, "Closing ALSA PCM device '{}' (state: {:?})", self.device_name, self.pcm.state());
        // snd_pcm_close runs when the handle drops
        drop(self.pcm);
        Ok(())
    }
}

/// An open ALSA mixer.
pub struct AlsaMixer {
    mixer: Mixer,
}

impl AlsaMixer {
    fn first_selem(&self) -> Result<Selem<'_>, DeviceError> {
        self.mixer
            .iter()
            .next()
            .and_then(Selem::new)
            .ok_or_else(|| DeviceError::from_code(DeviceOp::FindMixerElement, libc::ENOENT))
    }
}

fn selem_channel(channel: MixerChannel) -> SelemChannelId {
    match channel {
        MixerChannel::FrontLeft => SelemChannelId::FrontLeft,
        MixerChannel::FrontRight => SelemChannelId::FrontRight,
    }
}

impl MixerControl for AlsaMixer {
    fn playback_volume(&self, channel: MixerChannel) -> Result<i64, DeviceError> {
        self.first_selem()?
            .get_playback_volume(selem_channel(channel))
            .during(DeviceOp::GetVolume)
    }

    fn set_playback_volume(&self, channel: MixerChannel, volume: i64) -> Result<(), DeviceError> {
        self.first_selem()?
            .set_playback_volume(selem_channel(channel), volume)
            .during(DeviceOp::SetVolume)
    }

    fn playback_switch(&self, channel: MixerChannel) -> Result<bool, DeviceError> {
        let value = self
            .first_selem()?
            .get_playback_switch(selem_channel(channel))
            .during(DeviceOp::GetMute)?;
        Ok(value != 0)
    }

    fn set_playback_switch_all(&self, on: bool) -> Result<(), DeviceError> {
        self.first_selem()?
            .set_playback_switch_all(i32::from(on))
            .during(DeviceOp::SetMute)
    }

    fn close(self) -> Result<(), DeviceError> {
        drop(self.mixer);
        Ok(())
    }
}
