//! robolink CLI - Command-line tool for uploading programs onto wired robots.
//!
//! ## Features
//!
//! - Upload a program to an mBot2 or a SPIKE Hub
//! - Start a stored program on a SPIKE Hub
//! - List supported robots and their link settings
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::Env;
use log::debug;
use robolink::{RobotType, SessionConfig};
use std::env;
use std::path::PathBuf;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::Config;

/// robolink - Upload programs onto wired robot controllers.
///
/// Environment variables:
///   ROBOLINK_PORT   - Serial port of the robot
///   ROBOLINK_ROBOT  - Robot type (mbot2, spike)
///   ROBOLINK_BAUD   - Baud rate override (default: 115200)
#[derive(Parser)]
#[command(name = "robolink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port the robot is connected to.
    #[arg(short, long, global = true, env = "ROBOLINK_PORT")]
    port: Option<String>,

    /// Robot type.
    #[arg(short, long, global = true, env = "ROBOLINK_ROBOT")]
    robot: Option<Robot>,

    /// Baud rate override.
    #[arg(short, long, global = true, env = "ROBOLINK_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported robot types.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Robot {
    /// Makeblock mBot2 (CyberPi).
    Mbot2,
    /// LEGO SPIKE Prime hub.
    Spike,
}

impl From<Robot> for RobotType {
    fn from(robot: Robot) -> Self {
        match robot {
            Robot::Mbot2 => RobotType::Mbot2,
            Robot::Spike => RobotType::SpikeHub,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a program to the robot.
    Upload {
        /// Program file (Python source).
        file: PathBuf,

        /// Switch off the mBot2 REPL before uploading.
        #[arg(long)]
        quiet_repl: bool,

        /// mBot2 block size in bytes.
        #[arg(long)]
        block_size: Option<usize>,
    },

    /// Start a program stored on a SPIKE Hub.
    Execute {
        /// Program slot.
        #[arg(long, default_value = "0")]
        slot: u8,
    },

    /// List supported robots.
    Robots {
        /// Output the list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions into your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() -> Result<()> {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "robolink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload {
            file,
            quiet_repl,
            block_size,
        } => {
            let mut session = session_config(&cli, &config);
            if *quiet_repl {
                session = session.with_quiet_repl(true);
            }
            if let Some(bytes) = block_size {
                session = session.with_max_body_chunk(*bytes);
            }
            commands::upload::cmd_upload(
                &cli,
                resolve_robot(&cli, &config)?,
                &resolve_port(&cli, &config)?,
                file,
                session,
            )?;
        },
        Commands::Execute { slot } => {
            commands::execute::cmd_execute(
                &cli,
                &resolve_port(&cli, &config)?,
                *slot,
                session_config(&cli, &config),
            )?;
        },
        Commands::Robots { json } => {
            commands::robots::cmd_robots(*json)?;
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)?;
            } else {
                let Some(shell) = shell else {
                    bail!(
                        "Specify a shell type, e.g.: robolink completions bash\n  \
                         Or use `robolink completions --install` to install them."
                    );
                };
                commands::completions::cmd_completions(*shell);
            }
        },
    }
    Ok(())
}

/// Serial port from CLI args, environment or config file.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
        .context("No serial port given. Use --port, ROBOLINK_PORT or [connection] serial in robolink.toml")
}

/// Robot type from CLI args, environment or config file.
fn resolve_robot(cli: &Cli, config: &Config) -> Result<RobotType> {
    if let Some(robot) = cli.robot {
        return Ok(robot.into());
    }
    match config
        .upload
        .robot
        .as_deref()
    {
        Some(name) => RobotType::from_name(name)
            .with_context(|| format!("Unknown robot type '{name}' in config (expected mbot2 or spike)")),
        None => bail!("No robot type given. Use --robot, ROBOLINK_ROBOT or [upload] robot in robolink.toml"),
    }
}

/// Session settings: config file values, then CLI overrides.
fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let session = config.session_config();
    match cli.baud {
        Some(baud) => session.with_baud(baud),
        None => session,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_robot_arg_conversion() {
        assert_eq!(RobotType::from(Robot::Mbot2), RobotType::Mbot2);
        assert_eq!(RobotType::from(Robot::Spike), RobotType::SpikeHub);
    }

    #[test]
    fn test_resolve_robot_prefers_cli() {
        let cli = Cli::parse_from(["robolink", "--robot", "spike", "robots"]);
        let mut config = Config::default();
        config.upload.robot = Some("mbot2".into());
        assert_eq!(resolve_robot(&cli, &config).unwrap(), RobotType::SpikeHub);
    }

    #[test]
    fn test_resolve_robot_from_config() {
        let cli = Cli::parse_from(["robolink", "robots"]);
        let mut config = Config::default();
        config.upload.robot = Some("mBot2".into());
        assert_eq!(resolve_robot(&cli, &config).unwrap(), RobotType::Mbot2);

        config.upload.robot = Some("ev3".into());
        assert!(resolve_robot(&cli, &config).is_err());
    }

    #[test]
    fn test_resolve_port_falls_back_to_config() {
        let cli = Cli::parse_from(["robolink", "robots"]);
        let mut config = Config::default();
        assert!(resolve_port(&cli, &config).is_err());

        config.connection.serial = Some("/dev/ttyACM1".into());
        assert_eq!(resolve_port(&cli, &config).unwrap(), "/dev/ttyACM1");
    }

    #[test]
    fn test_baud_flag_overrides_config() {
        let cli = Cli::parse_from(["robolink", "--baud", "57600", "robots"]);
        let mut config = Config::default();
        config.connection.baud = Some(9600);
        assert_eq!(session_config(&cli, &config).baud_rate, 57600);
    }
}
