// src/audio/playback.rs
use crate::audio::{
    alsa_handler::AlsaBackend,
    backend::{AudioBackend, PcmDevice},
    error::PlaybackError,
    hw_params::{self, NegotiatedParams},
    loop_runner::{ActiveStream, FrameWriter, PlaybackLoopExitReason},
    mixer::VolumeMixerController,
    state_manager::{lock, CancellationToken, PlaybackPhase, PlaybackStateManager, Transport},
    stream::{PcmSource, StreamDescriptor},
};
use crate::config::Settings;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

const LOG_TARGET: &str = "pcm_player::audio::playback"; // Main session log target

/// A playback session bound to one output device and one mixer.
///
/// `play*` blocks the calling thread for the whole stream; every other method
/// may be called concurrently from other threads while it runs. Share the
/// session through an `Arc`.
pub struct PlaybackSession<B: AudioBackend> {
    backend: B,
    settings: Settings,
    /// Exclusive section guarding the device handle; `None` when closed.
    device: Mutex<Option<B::Device>>,
    stream: Mutex<Option<ActiveStream>>,
    state: PlaybackStateManager,
    mixer: VolumeMixerController,
}

impl PlaybackSession<AlsaBackend> {
    /// Creates a session on the ALSA devices named in `settings`.
    pub fn alsa(settings: Settings) -> Self {
        Self::new(AlsaBackend, settings)
    }
}

impl<B: AudioBackend> PlaybackSession<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        info!(
            target: LOG_TARGET,
            "Creating playback session (device '{}', mixer '{}')",
            settings.playback_device, settings.mixer_device
        );
        let mixer = VolumeMixerController::new(&settings.mixer_device);
        Self {
            backend,
            settings,
            device: Mutex::new(None),
            stream: Mutex::new(None),
            state: PlaybackStateManager::new(),
            mixer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Plays a WAV file until it ends.
    pub fn play_file<P: AsRef<Path>>(&self, path: P) -> Result<PlaybackLoopExitReason, PlaybackError> {
        self.play_file_with_cancel(path, &CancellationToken::new())
    }

    /// Plays a WAV file until it ends or `cancel` fires.
    pub fn play_file_with_cancel<P: AsRef<Path>>(
        &self,
        path: P,
        cancel: &CancellationToken,
    ) -> Result<PlaybackLoopExitReason, PlaybackError> {
        self.ensure_live()?;
        let file = File::open(path.as_ref())?;
        self.play_with_cancel(BufReader::new(file), cancel)
    }

    /// Plays a WAV stream until it ends.
    pub fn play<S: PcmSource + 'static>(&self, source: S) -> Result<PlaybackLoopExitReason, PlaybackError> {
        self.play_with_cancel(source, &CancellationToken::new())
    }

    /// Plays a WAV stream until it ends, `cancel` fires, or the session is
    /// disposed. The device is drained and closed before returning, also when
    /// the loop fails.
    #[instrument(skip(self, source, cancel), fields(device = %self.settings.playback_device))]
    pub fn play_with_cancel<S: PcmSource + 'static>(
        &self,
        source: S,
        cancel: &CancellationToken,
    ) -> Result<PlaybackLoopExitReason, PlaybackError> {
        self.ensure_live()?;
        let mut source: Box<dyn PcmSource> = Box::new(source);
        let descriptor = StreamDescriptor::from_source(&mut source)?;
        // Unsupported sample widths fail before any device is opened.
        hw_params::sample_format(descriptor.bits_per_sample)?;

        {
            // Transport is reset together with the install so that transport
            // calls made while the device opens are kept.
            let mut transport = self.state.transport();
            let mut stream = lock(&self.stream);
            if stream.is_some() {
                return Err(PlaybackError::InvalidState("a stream is already playing".to_string()));
            }
            *stream = Some(ActiveStream { source, descriptor });
            self.state.bump_generation();
            self.state.begin(&mut transport);
        }

        let result = self.open_and_negotiate(&descriptor).and_then(|negotiated| {
            FrameWriter::new(
                &self.device,
                &self.stream,
                &self.state,
                cancel,
                usize::from(descriptor.block_align),
                negotiated.period_frames,
            )
            .run()
        });

        {
            let mut transport = self.state.transport();
            *lock(&self.stream) = None;
            self.state.finish(&mut transport);
        }
        let closed = self.close_device();

        match (result, closed) {
            (Ok(reason), Ok(())) => {
                info!(target: LOG_TARGET, "Playback ended: {:?}", reason);
                Ok(reason)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                error!(target: LOG_TARGET, "Playback failed: {}", e);
                if let Err(close_err) = closed {
                    warn!(target: LOG_TARGET, "Closing device after failure also failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Stops feeding the device. The device buffer is dropped right after the
    /// in-flight write. Idempotent, and a no-op when nothing is playing.
    #[instrument(skip(self))]
    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        let mut transport = self.state.transport();
        if transport.phase != PlaybackPhase::Playing {
            debug!(target: LOG_TARGET, "Already paused ({:?})", transport.phase);
            return Ok(());
        }
        if lock(&self.stream).is_none() {
            debug!(target: LOG_TARGET, "Nothing playing, pause ignored.");
            return Ok(());
        }
        transport.tracker.stop();
        transport.phase = PlaybackPhase::JustPaused;
        self.state.close_gate(&mut transport);
        info!(target: LOG_TARGET, "Paused at {} ms", transport.tracker.elapsed_ms());
        Ok(())
    }

    /// Continues from the current elapsed position.
    #[instrument(skip(self))]
    pub fn resume(&self) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        let mut transport = self.state.transport();
        let ms = transport.tracker.elapsed_ms();
        self.play_from_locked(&mut transport, signed_ms(ms))
    }

    /// Restarts playback at `ms`, discarding audio buffered in the device.
    #[instrument(skip(self))]
    pub fn play_from(&self, ms: i64) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        let mut transport = self.state.transport();
        self.play_from_locked(&mut transport, ms)
    }

    /// Moves the position by `delta_ms`. While playing this restarts playback
    /// at the new position; while paused only the source moves and the device
    /// is left alone until resume.
    #[instrument(skip(self))]
    pub fn seek(&self, delta_ms: i64) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        let mut transport = self.state.transport();
        if lock(&self.stream).is_none() {
            return Err(PlaybackError::InvalidState("no active stream".to_string()));
        }
        transport.tracker.offset_by(delta_ms);
        let target = signed_ms(transport.tracker.elapsed_ms());
        match transport.phase {
            PlaybackPhase::Playing => self.play_from_locked(&mut transport, target),
            PlaybackPhase::JustPaused | PlaybackPhase::Paused => {
                let offset = self.reposition(target)?;
                debug!(target: LOG_TARGET, "Seek while paused to {} ms (offset {})", target, offset);
                Ok(())
            }
        }
    }

    /// Elapsed playback time in milliseconds, excluding paused time.
    pub fn elapsed_ms(&self) -> Result<u64, PlaybackError> {
        self.ensure_live()?;
        Ok(self.state.transport().tracker.elapsed_ms())
    }

    pub fn phase(&self) -> Result<PlaybackPhase, PlaybackError> {
        self.ensure_live()?;
        Ok(self.state.transport().phase)
    }

    /// Average of the left and right mixer volumes.
    pub fn playback_volume(&self) -> Result<i64, PlaybackError> {
        self.ensure_live()?;
        Ok(self.mixer.volume(&self.backend)?)
    }

    pub fn set_playback_volume(&self, volume: i64) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        Ok(self.mixer.set_volume(&self.backend, volume)?)
    }

    pub fn playback_mute(&self) -> Result<bool, PlaybackError> {
        self.ensure_live()?;
        Ok(self.mixer.mute(&self.backend)?)
    }

    pub fn set_playback_mute(&self, mute: bool) -> Result<(), PlaybackError> {
        self.ensure_live()?;
        Ok(self.mixer.set_mute(&self.backend, mute)?)
    }

    /// `true` while a stream is installed, from header decode until the
    /// writer loop has finished.
    pub fn is_active(&self) -> bool {
        lock(&self.stream).is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Stops the writer loop and releases the device and mixer. Waits for an
    /// in-flight write or mixer call to finish. Safe to call any number of
    /// times; failures while releasing are logged.
    #[instrument(skip(self))]
    pub fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        info!(target: LOG_TARGET, "Disposing playback session.");
        if let Err(e) = self.close_device() {
            warn!(target: LOG_TARGET, "Error releasing device during dispose (ignored): {}", e);
        }
        self.mixer.close();
    }

    fn ensure_live(&self) -> Result<(), PlaybackError> {
        if self.state.is_disposed() {
            return Err(PlaybackError::Disposed);
        }
        Ok(())
    }

    fn play_from_locked(&self, transport: &mut Transport, ms: i64) -> Result<(), PlaybackError> {
        let offset = self.reposition(ms)?;
        if let Some(device) = lock(&self.device).as_mut() {
            device.drop_buffer()?;
            device.prepare()?;
        }
        transport.phase = PlaybackPhase::Playing;
        transport.tracker.reset_to(u64::try_from(ms).unwrap_or(0));
        transport.tracker.start();
        self.state.open_gate(transport);
        info!(target: LOG_TARGET, "Playing from {} ms (offset {})", ms.max(0), offset);
        Ok(())
    }

    /// Moves the active stream to `ms` and invalidates blocks read before.
    fn reposition(&self, ms: i64) -> Result<u64, PlaybackError> {
        let mut stream = lock(&self.stream);
        let active = stream
            .as_mut()
            .ok_or_else(|| PlaybackError::InvalidState("no active stream".to_string()))?;
        let offset = active.reposition(ms)?;
        self.state.bump_generation();
        Ok(offset)
    }

    /// Opens the device if needed and negotiates hardware parameters for
    /// `descriptor`.
    fn open_and_negotiate(&self, descriptor: &StreamDescriptor) -> Result<NegotiatedParams, PlaybackError> {
        let mut guard = lock(&self.device);
        if self.state.is_disposed() {
            return Err(PlaybackError::Disposed);
        }
        let device = match guard.take() {
            Some(device) => device,
            None => self.backend.open_playback(&self.settings.playback_device)?,
        };
        let device = guard.insert(device);
        let mut params = device.hw_params()?;
        hw_params::negotiate(&mut params, descriptor)
    }

    /// Drains and closes the device if it is open.
    fn close_device(&self) -> Result<(), PlaybackError> {
        let Some(mut device) = lock(&self.device).take() else {
            return Ok(());
        };
        let drained = device.drain();
        let closed = device.close();
        debug!(target: LOG_TARGET, "Playback device closed.");
        drained?;
        closed?;
        Ok(())
    }
}

impl<B: AudioBackend> Drop for PlaybackSession<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn signed_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
