//! Command-line interface implementation

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use crate::audio::{PlaybackPhase, StreamDescriptor};

/// Command-line arguments for pcm-player
#[derive(Parser, Debug)]
#[command(author, version, about = "Play a WAV file on an ALSA device", long_about = None)]
pub struct Args {
    /// WAV file to play
    pub file: PathBuf,

    /// ALSA playback device (overrides the config file)
    #[arg(short = 'd', long, env = "PCM_PLAYER_DEVICE")]
    pub device: Option<String>,

    /// ALSA mixer device (overrides the config file)
    #[arg(short, long, env = "PCM_PLAYER_MIXER")]
    pub mixer: Option<String>,

    /// Config file path
    #[arg(short, long, env = "PCM_PLAYER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Start position in milliseconds
    #[arg(short, long, default_value_t = 0)]
    pub start_ms: i64,

    /// Set the mixer volume before playing
    #[arg(long)]
    pub volume: Option<i64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Interactive transport commands read from stdin while playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    PlayFrom(i64),
    Seek(i64),
    /// `None` reads the volume.
    Volume(Option<i64>),
    /// `None` reads the mute state.
    Mute(Option<bool>),
    Elapsed,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (type 'h' for help)")]
    Unknown(String),
    #[error("'{command}' expects {expected}, got '{value}'")]
    InvalidArgument {
        command: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
}

impl Command {
    /// Parses one input line such as `p`, `s -5000` or `v 80`.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?.to_lowercase();
        let arg = words.next();

        match name.as_str() {
            "p" | "pause" => Ok(Command::Pause),
            "r" | "resume" => Ok(Command::Resume),
            "f" | "from" => {
                let ms = arg.ok_or(CommandError::MissingArgument("from"))?;
                Ok(Command::PlayFrom(parse_ms("from", ms)?))
            }
            "s" | "seek" => {
                let ms = arg.ok_or(CommandError::MissingArgument("seek"))?;
                Ok(Command::Seek(parse_ms("seek", ms)?))
            }
            "v" | "volume" => match arg {
                None => Ok(Command::Volume(None)),
                Some(value) => value.parse().map(|v| Command::Volume(Some(v))).map_err(|_| {
                    CommandError::InvalidArgument {
                        command: "volume",
                        expected: "an integer",
                        value: value.to_string(),
                    }
                }),
            },
            "m" | "mute" => match arg.map(str::to_lowercase).as_deref() {
                None => Ok(Command::Mute(None)),
                Some("on") | Some("1") | Some("true") => Ok(Command::Mute(Some(true))),
                Some("off") | Some("0") | Some("false") => Ok(Command::Mute(Some(false))),
                Some(other) => Err(CommandError::InvalidArgument {
                    command: "mute",
                    expected: "on or off",
                    value: other.to_string(),
                }),
            },
            "t" | "time" => Ok(Command::Elapsed),
            "h" | "help" | "?" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_ms(command: &'static str, value: &str) -> Result<i64, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        expected: "milliseconds",
        value: value.to_string(),
    })
}

/// Formats milliseconds as `m:ss.mmm`.
pub fn format_position(ms: u64) -> String {
    format!("{}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}

/// CLI user interface for interacting with the application
pub struct Cli {
    pub args: Args,
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

impl Cli {
    /// Create a new CLI instance
    pub fn new() -> Self {
        Cli { args: Args::parse() }
    }

    /// Display the stream being played
    pub fn display_stream(&self, descriptor: &StreamDescriptor) {
        println!("\nNow playing: {}", self.args.file.display());
        println!(
            "{} Hz, {} channels, {} bits, {}",
            descriptor.sample_rate,
            descriptor.channels,
            descriptor.bits_per_sample,
            format_position(u64::try_from(descriptor.duration_of(descriptor.data_len).as_millis()).unwrap_or(u64::MAX))
        );
        println!("Type 'h' for commands.\n");
    }

    /// Display the interactive commands
    pub fn display_help(&self) {
        println!("Commands:");
        println!("  p            pause");
        println!("  r            resume");
        println!("  f <ms>       play from position");
        println!("  s <+/-ms>    seek relative to current position");
        println!("  v [n]        get or set volume");
        println!("  m [on|off]   get or set mute");
        println!("  t            show elapsed time");
        println!("  q            quit");
    }

    /// Display transport status
    pub fn display_status(&self, phase: PlaybackPhase, elapsed_ms: u64) {
        println!("[{:?}] {}", phase, format_position(elapsed_ms));
    }

    /// Display error messages
    pub fn display_error(&self, error: &dyn Error) {
        eprintln!("Error: {}", error);
    }
}
