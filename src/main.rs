//! voxkey binary entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use voxkey::config::{self, load_config, Config, DEFAULT_CONFIG};
use voxkey::daemon;
use voxkey::error::{Result, VoxkeyError, EXIT_OK};

#[derive(Parser)]
#[command(
    name = "voxkey",
    about = "Hands-free dictation for Wayland: hotkey, cloud STT, keystroke injection",
    version
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: ~/.config/voxkey/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dictation daemon (the default command)
    ///
    /// Must be started elevated: sudo -E voxkey
    Daemon {
        /// Override the STT websocket endpoint
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Override the activation key (evdev name, e.g. SCROLLLOCK)
        #[arg(long, value_name = "KEY")]
        hotkey: Option<String>,

        /// Override the audio input device
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
    },

    /// Capture a few seconds of audio and report input levels
    TestAudio {
        /// Override the audio input device
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
    },

    /// Run one full capture/stream/inject session without the hotkey
    ///
    /// Must be started elevated, like the daemon: sudo -E voxkey test-stt
    TestStt {
        /// Override the STT websocket endpoint
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Override the audio input device
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
    },

    /// Stream the microphone and print transcripts without injecting
    DebugStt {
        /// Override the STT websocket endpoint
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Override the audio input device
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Print the built-in default config instead
        #[arg(long)]
        default: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match run(cli) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("voxkey={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Command::Daemon {
        endpoint: None,
        hotkey: None,
        device: None,
    });

    match command {
        Command::Daemon {
            endpoint,
            hotkey,
            device,
        } => run_daemon(cli.config.as_deref(), endpoint, hotkey, device),
        Command::TestAudio { device } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(device) = device {
                config.audio.device = device;
            }
            runtime()?.block_on(daemon::run_test_audio(&config))
        }
        Command::TestStt { endpoint, device } => {
            run_test_stt(cli.config.as_deref(), endpoint, device)
        }
        Command::DebugStt { endpoint, device } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(endpoint) = endpoint {
                config.stt.endpoint = endpoint;
            }
            if let Some(device) = device {
                config.audio.device = device;
            }
            config::validate(&config)?;
            runtime()?.block_on(daemon::run_debug_stt(&config))
        }
        Command::Config { default } => show_config(cli.config.as_deref(), default),
    }
}

/// Elevated bootstrap, then config, then the async pipeline. The order
/// is deliberate: the virtual keyboard is created and privileges are
/// dropped before any file, audio, or network activity.
#[cfg(target_os = "linux")]
fn run_daemon(
    config_path: Option<&std::path::Path>,
    endpoint: Option<String>,
    hotkey: Option<String>,
    device: Option<String>,
) -> Result<()> {
    let (mut keyboard, user) = voxkey::privilege::bootstrap()?;

    // Config and credential now resolve in the invoking user's context
    let mut config = load_config(config_path)?;
    if let Some(endpoint) = endpoint {
        config.stt.endpoint = endpoint;
    }
    if let Some(hotkey) = hotkey {
        config.hotkey.key = hotkey;
    }
    if let Some(device) = device {
        config.audio.device = device;
    }
    config::validate(&config)?;

    if config.api_key().is_none() {
        return Err(VoxkeyError::Stt(voxkey::error::SttError::MissingCredential(
            config.stt.api_key_env.clone(),
        )));
    }

    keyboard.set_key_delay(std::time::Duration::from_millis(
        config.inject.key_delay_ms,
    ));

    tracing::debug!("Running as {} after privilege drop", user.name);
    runtime()?.block_on(daemon::run(config, Box::new(keyboard)))
}

/// Same bootstrap ordering as the daemon; test-stt injects, so it also
/// needs the virtual keyboard and the privilege drop.
#[cfg(target_os = "linux")]
fn run_test_stt(
    config_path: Option<&std::path::Path>,
    endpoint: Option<String>,
    device: Option<String>,
) -> Result<()> {
    let (mut keyboard, _user) = voxkey::privilege::bootstrap()?;

    let mut config = load_config(config_path)?;
    if let Some(endpoint) = endpoint {
        config.stt.endpoint = endpoint;
    }
    if let Some(device) = device {
        config.audio.device = device;
    }
    config::validate(&config)?;
    keyboard.set_key_delay(std::time::Duration::from_millis(
        config.inject.key_delay_ms,
    ));

    runtime()?.block_on(daemon::run_test_stt(&config, Box::new(keyboard)))
}

#[cfg(not(target_os = "linux"))]
fn run_test_stt(
    _config_path: Option<&std::path::Path>,
    _endpoint: Option<String>,
    _device: Option<String>,
) -> Result<()> {
    Err(VoxkeyError::Config(
        "test-stt requires Linux (uinput and evdev)".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn run_daemon(
    _config_path: Option<&std::path::Path>,
    _endpoint: Option<String>,
    _hotkey: Option<String>,
    _device: Option<String>,
) -> Result<()> {
    Err(VoxkeyError::Config(
        "the voxkey daemon requires Linux (uinput and evdev)".to_string(),
    ))
}

fn show_config(config_path: Option<&std::path::Path>, default: bool) -> Result<()> {
    if default {
        print!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    match config_path
        .map(|p| p.to_path_buf())
        .or_else(Config::default_path)
    {
        Some(path) if path.exists() => println!("# config file: {}", path.display()),
        Some(path) => println!("# config file: {} (not present, using defaults)", path.display()),
        None => println!("# no config directory available, using defaults"),
    }

    let config = load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| VoxkeyError::Config(format!("cannot render config: {}", e)))?;
    print!("{}", rendered);
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}
