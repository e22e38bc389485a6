use std::fmt;
use std::io;
use thiserror::Error;

/// Native operations that can fail with a device status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    OpenPlayback,
    AllocateParams,
    SetAccess,
    SetFormat,
    SetChannels,
    SetRate,
    CommitParams,
    GetPeriodSize,
    Write,
    Drop,
    Prepare,
    Drain,
    Close,
    OpenMixer,
    AttachMixer,
    RegisterMixer,
    LoadMixer,
    FindMixerElement,
    GetVolume,
    SetVolume,
    GetMute,
    SetMute,
    CloseMixer,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceOp::OpenPlayback => "Can not open playback device",
            DeviceOp::AllocateParams => "Can not allocate hardware parameters",
            DeviceOp::SetAccess => "Can not set access mode",
            DeviceOp::SetFormat => "Can not set sample format",
            DeviceOp::SetChannels => "Can not set channel count",
            DeviceOp::SetRate => "Can not set sample rate",
            DeviceOp::CommitParams => "Can not apply hardware parameters",
            DeviceOp::GetPeriodSize => "Can not get period size",
            DeviceOp::Write => "Can not write to device",
            DeviceOp::Drop => "Can not drop device buffer",
            DeviceOp::Prepare => "Can not prepare device",
            DeviceOp::Drain => "Can not drain device",
            DeviceOp::Close => "Can not close device",
            DeviceOp::OpenMixer => "Can not open mixer",
            DeviceOp::AttachMixer => "Can not attach mixer",
            DeviceOp::RegisterMixer => "Can not register mixer element class",
            DeviceOp::LoadMixer => "Can not load mixer",
            DeviceOp::FindMixerElement => "Can not find a mixer element",
            DeviceOp::GetVolume => "Can not get volume",
            DeviceOp::SetVolume => "Can not set volume",
            DeviceOp::GetMute => "Can not get mute switch",
            DeviceOp::SetMute => "Can not set mute switch",
            DeviceOp::CloseMixer => "Can not close mixer",
        };
        f.write_str(text)
    }
}

/// A negative status returned by the native audio subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op}. Error {code}. {message}.")]
pub struct DeviceError {
    pub op: DeviceOp,
    /// Negative errno-style status code.
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    /// Builds an error from a status code, resolving the message through the
    /// OS error table.
    pub fn from_code(op: DeviceOp, code: i32) -> Self {
        let code = -code.abs();
        let message = io::Error::from_raw_os_error(-code).to_string();
        DeviceError { op, code, message }
    }
}

/// Error types specific to audio playback.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Playback session has been disposed")]
    Disposed,
    #[error("Unsupported format: {0}")]
    Format(String),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<hound::Error> for PlaybackError {
    fn from(e: hound::Error) -> Self {
        match e {
            // hound reports a short read inside the header as `Other`.
            hound::Error::IoError(io)
                if matches!(io.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::Other) =>
            {
                PlaybackError::Format(format!("truncated WAV header ({})", io))
            }
            hound::Error::IoError(io) => PlaybackError::Io(io),
            other => PlaybackError::Format(other.to_string()),
        }
    }
}
