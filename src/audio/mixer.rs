use crate::audio::backend::{AudioBackend, MixerChannel, MixerControl};
use crate::audio::error::DeviceError;
use crate::audio::state_manager::lock;
use std::sync::Mutex;
use tracing::{debug, warn};

const LOG_TARGET: &str = "pcm_player::audio::mixer";

/// Volume and mute control. Every call opens the mixer, applies one
/// operation and closes it again; the handle is never kept between calls.
#[derive(Debug)]
pub struct VolumeMixerController {
    mixer_name: String,
    /// Exclusive section around the open/operate/close sequence.
    section: Mutex<()>,
}

impl VolumeMixerController {
    pub fn new(mixer_name: &str) -> Self {
        Self {
            mixer_name: mixer_name.to_string(),
            section: Mutex::new(()),
        }
    }

    /// Average of the left and right playback volumes.
    pub fn volume<B: AudioBackend>(&self, backend: &B) -> Result<i64, DeviceError> {
        self.with_mixer(backend, |mixer| {
            let left = mixer.playback_volume(MixerChannel::FrontLeft)?;
            let right = mixer.playback_volume(MixerChannel::FrontRight)?;
            Ok((left + right) / 2)
        })
    }

    /// Sets left and right to the same volume.
    pub fn set_volume<B: AudioBackend>(&self, backend: &B, volume: i64) -> Result<(), DeviceError> {
        self.with_mixer(backend, |mixer| {
            for channel in MixerChannel::STEREO {
                mixer.set_playback_volume(channel, volume)?;
            }
            debug!(target: LOG_TARGET, "Playback volume set to {}", volume);
            Ok(())
        })
    }

    /// `true` when playback is muted.
    pub fn mute<B: AudioBackend>(&self, backend: &B) -> Result<bool, DeviceError> {
        self.with_mixer(backend, |mixer| Ok(!mixer.playback_switch(MixerChannel::FrontLeft)?))
    }

    pub fn set_mute<B: AudioBackend>(&self, backend: &B, mute: bool) -> Result<(), DeviceError> {
        self.with_mixer(backend, |mixer| {
            mixer.set_playback_switch_all(!mute)?;
            debug!(target: LOG_TARGET, "Playback mute set to {}", mute);
            Ok(())
        })
    }

    /// Waits out any in-flight mixer call; after it returns no mixer handle
    /// is open.
    pub fn close(&self) {
        let _section = lock(&self.section);
    }

    fn with_mixer<B, T, F>(&self, backend: &B, op: F) -> Result<T, DeviceError>
    where
        B: AudioBackend,
        F: FnOnce(&B::Mixer) -> Result<T, DeviceError>,
    {
        let _section = lock(&self.section);
        let mixer = backend.open_mixer(&self.mixer_name)?;
        let result = op(&mixer);
        let closed = mixer.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(op_err), Ok(())) => Err(op_err),
            (Err(op_err), Err(close_err)) => {
                warn!(target: LOG_TARGET, "Closing mixer after failed operation also failed: {}", close_err);
                Err(op_err)
            }
        }
    }
}
