mod config;

use std::error::Error;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use libssapctl::Tv;
use serde_json::{Value, json};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

const YOUTUBE_APP_ID: &str = "youtube.leanback.v4";

/// ssapctl - control a webOS-style device over its SSAP websocket
#[derive(Parser)]
#[command(name = "ssapctl", version, about)]
struct Cli {
    /// Device host name or address (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Client key from `ssapctl auth` (overrides the config file)
    #[arg(long, global = true)]
    key: Option<String>,

    /// Use unencrypted ws:// on port 3000 instead of wss:// on port 3001
    #[arg(long, global = true)]
    insecure_plain: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pair with the device (confirm on screen) and print the client key
    Auth,

    /// Show a toast notification
    Notify { message: String },

    /// Show or change the volume
    Volume {
        #[command(subcommand)]
        action: Option<VolumeAction>,
    },

    /// Launch an app
    Launch {
        app: String,

        /// Content to open (e.g. a video URL)
        #[arg(long)]
        content_target: Option<String>,
    },

    /// Bring a running app to the foreground
    Open { app: String },

    /// Close an app
    Close { app: String },

    /// List installed apps
    Apps,

    /// Show the foreground app
    CurrentApp,

    /// List API services
    Services,

    /// Play a video in the YouTube app
    Youtube { url: String },

    /// Media playback controls
    Media { action: MediaAction },

    /// Change channel
    Channel { direction: Direction },

    /// Turn the device off
    PowerOff,

    /// Press remote buttons (UP, DOWN, LEFT, RIGHT, ENTER, BACK, HOME, ...)
    Button {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Send an arbitrary command and print the reply payload
    Raw {
        uri: String,

        /// JSON payload
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Set an absolute level
    Set {
        level: u8,

        /// Allow levels above `max_volume`
        #[arg(long)]
        force: bool,
    },
    Up,
    Down,
    Mute,
    Unmute,
}

#[derive(Clone, Copy, ValueEnum)]
enum MediaAction {
    Play,
    Pause,
    Stop,
    Rewind,
    FastForward,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Up,
    Down,
}

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load();
    debug!(?config, "config loaded");

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "ssapctl=debug,libssapctl=debug"
    } else {
        "ssapctl=warn,libssapctl=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: &Config) -> CliResult {
    if let Command::Auth = cli.command {
        return cmd_auth(cli, config);
    }

    let tv = connect_registered(cli, config)?;
    let result = run_command(&tv, &cli.command, config);
    if let Err(e) = tv.close() {
        debug!("close failed: {e}");
    }
    result
}

/// Open the control socket
fn connect(cli: &Cli, config: &Config) -> CliResult<Tv> {
    let host = cli
        .host
        .clone()
        .or_else(|| config.host.clone())
        .ok_or("no host given: pass --host or set `host` in the config file")?;

    let mut dial = config.dial_config();
    if cli.insecure_plain {
        dial.secure = false;
    }

    Tv::dial(&host, dial).map_err(|e| format!("could not connect to {host}: {e}").into())
}

/// Open the control socket and register with the stored key
fn connect_registered(cli: &Cli, config: &Config) -> CliResult<Tv> {
    let key = cli
        .key
        .clone()
        .or_else(|| config.client_key.clone())
        .ok_or("no client key: run `ssapctl auth` and store the key as `client_key`")?;

    let tv = connect(cli, config)?;
    tv.register_with_key(&key)
        .map_err(|e| format!("could not register with client key: {e}"))?;
    Ok(tv)
}

fn cmd_auth(cli: &Cli, config: &Config) -> CliResult {
    let tv = connect(cli, config)?;
    eprintln!("Accept the pairing request on the device screen...");

    let key = tv.register_with_prompt()?;
    println!("{key}");

    if let Some(path) = Config::config_path() {
        eprintln!("Store it as client_key in {}", path.display());
    }
    if let Err(e) = tv.notify("ssapctl paired") {
        warn!("could not show confirmation toast: {e}");
    }
    tv.close()?;
    Ok(())
}

fn run_command(tv: &Tv, command: &Command, config: &Config) -> CliResult {
    match command {
        Command::Auth => return Err("auth needs an unregistered session".into()),
        Command::Notify { message } => tv.notify(message)?,
        Command::Volume { action } => cmd_volume(tv, action.as_ref(), config)?,
        Command::Launch {
            app,
            content_target,
        } => match content_target {
            Some(target) => tv.launch_app_with(app, json!({ "contentTarget": target }))?,
            None => tv.launch_app(app)?,
        },
        Command::Open { app } => tv.open_app(app)?,
        Command::Close { app } => tv.close_app(app)?,
        Command::Apps => {
            for app in tv.list_apps()? {
                println!("{}\t{}", app.app_id, app.name.as_deref().unwrap_or(""));
            }
        }
        Command::CurrentApp => println!("{}", tv.current_app()?.app_id),
        Command::Services => {
            for service in tv.service_list()?.services {
                match service.version {
                    Some(v) => println!("{} (v{v})", service.name),
                    None => println!("{}", service.name),
                }
            }
        }
        Command::Youtube { url } => cmd_youtube(tv, url)?,
        Command::Media { action } => match action {
            MediaAction::Play => tv.play()?,
            MediaAction::Pause => tv.pause()?,
            MediaAction::Stop => tv.stop()?,
            MediaAction::Rewind => tv.rewind()?,
            MediaAction::FastForward => tv.fast_forward()?,
        },
        Command::Channel { direction } => match direction {
            Direction::Up => tv.channel_up()?,
            Direction::Down => tv.channel_down()?,
        },
        Command::PowerOff => tv.turn_off()?,
        Command::Button { names } => {
            for name in names {
                tv.send_button(&name.to_uppercase())?;
            }
        }
        Command::Raw { uri, payload } => {
            let payload = payload
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(|e| format!("payload is not valid JSON: {e}"))?;
            let reply = match config.command_timeout() {
                Some(timeout) => tv.command_with_timeout(uri, payload, timeout)?,
                None => tv.command(uri, payload)?,
            };
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}

fn cmd_volume(tv: &Tv, action: Option<&VolumeAction>, config: &Config) -> CliResult {
    match action {
        None => {
            let volume = tv.volume()?;
            if volume.muted {
                println!("{} (muted)", volume.volume);
            } else {
                println!("{}", volume.volume);
            }
        }
        Some(VolumeAction::Set { level, force }) => {
            check_volume(*level, config.max_volume, *force)?;
            tv.set_volume(*level)?;
        }
        Some(VolumeAction::Up) => tv.volume_up()?,
        Some(VolumeAction::Down) => tv.volume_down()?,
        Some(VolumeAction::Mute) => tv.mute()?,
        Some(VolumeAction::Unmute) => tv.unmute()?,
    }
    Ok(())
}

fn check_volume(level: u8, max: u8, force: bool) -> Result<(), String> {
    if level > max && !force {
        return Err(format!(
            "volume {level} is above max_volume ({max}); pass --force to set it anyway"
        ));
    }
    Ok(())
}

/// Open YouTube if needed, start the video, then dismiss the
/// "who's watching" screen with ENTER once the app has had time to load
fn cmd_youtube(tv: &Tv, url: &str) -> CliResult {
    let in_front = match tv.current_app() {
        Ok(app) => app.app_id == YOUTUBE_APP_ID,
        Err(e) => {
            warn!("could not read foreground app: {e}");
            false
        }
    };

    if !in_front {
        if let Err(e) = tv.open_app(YOUTUBE_APP_ID) {
            warn!("could not open YouTube: {e}");
        }
    }

    tv.launch_app_with(YOUTUBE_APP_ID, json!({ "contentTarget": url }))?;
    thread::sleep(youtube_settle_time(in_front));
    tv.key_enter()?;
    Ok(())
}

fn youtube_settle_time(already_in_front: bool) -> Duration {
    if already_in_front {
        Duration::from_secs(2)
    } else {
        Duration::from_secs(11)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_volume_set_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ssapctl", "volume", "set", "12", "--force", "--host", "10.0.0.9",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.9"));
        assert!(matches!(
            cli.command,
            Command::Volume {
                action: Some(VolumeAction::Set { level: 12, force: true })
            }
        ));
    }

    #[test]
    fn insecure_plain_flag() {
        let cli = Cli::try_parse_from(["ssapctl", "apps", "--insecure-plain"]).unwrap();
        assert!(cli.insecure_plain);
        assert!(Cli::try_parse_from(["ssapctl", "apps", "--plain"]).is_err());
    }

    #[test]
    fn button_requires_a_name() {
        assert!(Cli::try_parse_from(["ssapctl", "button"]).is_err());
    }

    #[test]
    fn volume_limit() {
        assert!(check_volume(20, 20, false).is_ok());
        assert!(check_volume(21, 20, false).is_err());
        assert!(check_volume(40, 20, true).is_ok());
    }

    #[test]
    fn youtube_waits_longer_when_cold() {
        assert!(youtube_settle_time(false) > youtube_settle_time(true));
    }
}
