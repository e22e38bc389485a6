//! Audio playback module: streams WAV PCM data to an output device with
//! real-time transport control.

pub mod alsa_handler;
pub mod backend;
pub mod error;
pub mod hw_params;
pub mod loop_runner;
pub mod mixer;
mod playback;
pub mod progress;
pub mod state_manager;
pub mod stream;


pub use alsa_handler::AlsaBackend;
pub use backend::{AudioBackend, HwParamSteps, MixerChannel, MixerControl, PcmDevice, SampleFormat};
pub use error::{DeviceError, DeviceOp, PlaybackError};
pub use loop_runner::PlaybackLoopExitReason;
pub use playback::*;
pub use progress::PositionTracker;
pub use state_manager::{CancellationToken, PlaybackPhase};
pub use stream::{PcmSource, StreamDescriptor};
