use pcm_player::audio::{AlsaBackend, CancellationToken, PlaybackError, PlaybackSession, StreamDescriptor};
use pcm_player::config::Settings;
use pcm_player::init_app_dirs;
use pcm_player::ui::{Cli, Command};
use std::error::Error;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Session = PlaybackSession<AlsaBackend>;

fn init_tracing(verbose: bool) -> Result<(), Box<dyn Error>> {
    let default_directive = if verbose { "pcm_player=debug" } else { "pcm_player=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

/// Runs one transport command on a blocking thread; session calls may wait
/// for an in-flight device write.
async fn run_command(cli: &Cli, session: &Arc<Session>, command: Command) -> Result<(), Box<dyn Error>> {
    let session_clone = Arc::clone(session);
    let report = task::spawn_blocking(move || -> Result<Option<String>, PlaybackError> {
        let session = session_clone;
        match command {
            Command::Pause => session.pause().map(|_| None),
            Command::Resume => session.resume().map(|_| None),
            Command::PlayFrom(ms) => session.play_from(ms).map(|_| None),
            Command::Seek(delta) => session.seek(delta).map(|_| None),
            Command::Volume(None) => session.playback_volume().map(|v| Some(format!("Volume: {}", v))),
            Command::Volume(Some(v)) => session.set_playback_volume(v).map(|_| None),
            Command::Mute(None) => session.playback_mute().map(|m| Some(format!("Muted: {}", m))),
            Command::Mute(Some(m)) => session.set_playback_mute(m).map(|_| None),
            Command::Elapsed | Command::Help | Command::Quit => Ok(None),
        }
    })
    .await??;

    match command {
        Command::Elapsed => cli.display_status(session.phase()?, session.elapsed_ms()?),
        Command::Help => cli.display_help(),
        _ => {
            if let Some(line) = report {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments and initialize CLI
    let cli = Cli::new();
    let args = &cli.args;
    init_tracing(args.verbose)?;

    // Initialize application directories
    init_app_dirs()?;

    // Load configuration from file, then apply command-line overrides
    let config_path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)?;
    if let Some(device) = &args.device {
        settings.playback_device = device.clone();
    }
    if let Some(mixer) = &args.mixer {
        settings.mixer_device = mixer.clone();
    }
    settings.validate()?;
    debug!("Using settings {:?} from {}", settings, config_path.display());

    let descriptor = StreamDescriptor::from_source(&mut File::open(&args.file)?)?;
    cli.display_stream(&descriptor);

    let session = Arc::new(PlaybackSession::alsa(settings));
    if let Some(volume) = args.volume {
        session.set_playback_volume(volume)?;
    }

    let cancel = CancellationToken::new();
    let mut player = {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        let path = args.file.clone();
        task::spawn_blocking(move || session.play_file_with_cancel(path, &cancel))
    };

    if args.start_ms > 0 {
        while !session.is_active() && !player.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if session.is_active() {
            run_command(&cli, &session, Command::PlayFrom(args.start_ms)).await?;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let outcome = loop {
        tokio::select! {
            result = &mut player => break result,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping playback.");
                cancel.cancel();
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match Command::parse(&line) {
                    Ok(Command::Quit) => cancel.cancel(),
                    Ok(command) => {
                        if let Err(e) = run_command(&cli, &session, command).await {
                            cli.display_error(&*e);
                        }
                    }
                    Err(e) => cli.display_error(&e),
                },
                None => stdin_open = false,
            },
        }
    };

    session.dispose();
    match outcome? {
        Ok(reason) => {
            info!("Playback finished: {:?}", reason);
            Ok(())
        }
        Err(e) => {
            warn!("Playback failed: {}", e);
            Err(e.into())
        }
    }
}
