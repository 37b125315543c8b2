//! rig - a CLI whose subcommands are published artifacts
//!
//! Each command is resolved from the registry, cached under the rig home,
//! installed or updated on demand, then run with the original arguments.

use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rigging_core::dispatch::INIT_COMMAND;
use rigging_core::{CommandMetadata, DispatchError, Dispatcher, Invocation, Settings};

mod cache_cli;
mod commands_cli;
mod env;
mod update_check;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "rig",
    about = "Run commands published as versioned registry artifacts",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Shorthand for --log-level debug
    #[clap(long, global = true)]
    debug: bool,

    /// Log output format
    #[clap(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Run the artifact found at this path instead of the managed cache
    #[clap(long, global = true)]
    target_path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Create a new project from the published init artifact
    Init {
        /// Name of the project directory to create
        project_name: Option<String>,

        /// Overwrite an existing directory
        #[clap(long)]
        force: bool,
    },

    /// Inspect the artifact cache
    Cache {
        #[clap(subcommand)]
        command: cache_cli::CacheCommand,
    },

    /// List commands and the artifacts behind them
    Commands {
        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Any command registered in config.yaml
    #[clap(external_subcommand)]
    External(Vec<String>),
}

/// Initialize tracing with CLI flags
///
/// Logs always go to stderr so artifacts own stdout.
fn initialize_tracing(log_level: &LogLevel, format: &LogFormat) {
    let filter = EnvFilter::try_from_env("RIG_LOG")
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level.clone()
    };
    initialize_tracing(&log_level, &cli.log_format);
    info!("rig v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        let dispatch_error = e.downcast_ref::<DispatchError>();

        // A failed artifact has already reported its own error
        if let Some(DispatchError::CommandFailed { code, .. }) = dispatch_error {
            debug!("{}", e);
            std::process::exit(code.unwrap_or(1));
        }

        eprintln!("Error: {e:#}");
        if let Some(hint) = dispatch_error.and_then(DispatchError::hint) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    env::check_root()?;
    env::load_user_dotenv();
    env::check_user_home()?;

    let settings = Settings::from_env()?.with_target_path(cli.target_path);

    match cli.command {
        Command::Cache { command } => cache_cli::execute(command, &settings),
        Command::Commands { json } => commands_cli::execute(&settings, json),
        Command::Init {
            project_name,
            force,
        } => {
            let mut command = CommandMetadata::new(INIT_COMMAND);
            command.operands.extend(project_name);
            command
                .options
                .insert("force".to_string(), serde_json::Value::Bool(force));

            let raw: Vec<String> = std::env::args().collect();
            let invocation = Invocation {
                args: args_after(INIT_COMMAND, &raw, &value_options()),
                command,
            };
            dispatch(settings, INIT_COMMAND, invocation).await
        }
        Command::External(args) => {
            let Some((name, rest)) = args.split_first() else {
                anyhow::bail!("No command given");
            };
            let invocation = Invocation {
                args: rest.to_vec(),
                command: parse_command(name, rest),
            };
            dispatch(settings, name, invocation).await
        }
    }
}

async fn dispatch(settings: Settings, name: &str, invocation: Invocation) -> Result<()> {
    let registry_url = settings.registry_url.clone();
    let dispatcher = Dispatcher::from_settings(settings)?;

    update_check::notify_if_outdated(&registry_url).await;

    dispatcher.dispatch(name, &invocation).await?;
    Ok(())
}

/// Spellings of the global options that consume the following argument
fn value_options() -> Vec<String> {
    Cli::command()
        .get_arguments()
        .filter(|arg| arg.get_action().takes_values())
        .flat_map(|arg| {
            let long = arg.get_long().map(|long| format!("--{long}"));
            let short = arg.get_short().map(|short| format!("-{short}"));
            long.into_iter().chain(short)
        })
        .collect()
}

/// Raw arguments following `command` in the subcommand position
///
/// Values of `value_options` are skipped, so `--target-path init init x`
/// yields `["x"]`.
fn args_after(command: &str, raw: &[String], value_options: &[String]) -> Vec<String> {
    let mut iter = raw.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == command {
            return iter.cloned().collect();
        }
        if value_options.contains(arg) {
            iter.next();
        }
    }
    Vec::new()
}

/// Split external command arguments into operands and options
///
/// `--name value` and `--name=value` become string options, a bare
/// `--flag` becomes `true`.
fn parse_command(name: &str, args: &[String]) -> CommandMetadata {
    let mut command = CommandMetadata::new(name);
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let Some(option) = arg.strip_prefix("--").filter(|o| !o.is_empty()) else {
            command.operands.push(arg.clone());
            continue;
        };

        let (key, value) = match option.split_once('=') {
            Some((key, value)) => (key, serde_json::Value::String(value.to_string())),
            None => match iter.next_if(|next| !next.starts_with('-')) {
                Some(value) => (option, serde_json::Value::String(value.clone())),
                None => (option, serde_json::Value::Bool(true)),
            },
        };
        command.options.insert(key.to_string(), value);
    }

    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_args_after_command() {
        let options = value_options();

        let raw = strings(&["rig", "--debug", "init", "my-app", "--force"]);
        assert_eq!(args_after("init", &raw, &options), strings(&["my-app", "--force"]));

        let raw = strings(&["rig", "init"]);
        assert!(args_after("init", &raw, &options).is_empty());
    }

    #[test]
    fn test_args_after_skips_option_values() {
        let options = value_options();

        let raw = strings(&["rig", "--target-path", "init", "init", "x"]);
        assert_eq!(args_after("init", &raw, &options), strings(&["x"]));

        let raw = strings(&["rig", "--log-level", "debug", "--log-format", "json", "init", "x"]);
        assert_eq!(args_after("init", &raw, &options), strings(&["x"]));

        // The `=` form is a single argument
        let raw = strings(&["rig", "--target-path=init", "init", "x", "y"]);
        assert_eq!(args_after("init", &raw, &options), strings(&["x", "y"]));
    }

    #[test]
    fn test_value_options_cover_globals() {
        let options = value_options();
        for option in ["--target-path", "--log-level", "--log-format"] {
            assert!(options.contains(&option.to_string()), "missing {option}");
        }
        assert!(!options.contains(&"--debug".to_string()));
    }

    #[test]
    fn test_parse_command() {
        let command = parse_command(
            "publish",
            &strings(&["pkg", "--tag", "beta", "--dry-run", "--access=public"]),
        );

        assert_eq!(command.name, "publish");
        assert_eq!(command.operands, strings(&["pkg"]));
        assert_eq!(command.options["tag"], "beta");
        assert_eq!(command.options["dry-run"], true);
        assert_eq!(command.options["access"], "public");
    }

    #[test]
    fn test_cli_parses_external_command() {
        let cli = Cli::parse_from(["rig", "publish", "pkg", "--tag", "beta"]);
        match cli.command {
            Command::External(args) => assert_eq!(args, strings(&["publish", "pkg", "--tag", "beta"])),
            other => panic!("expected external command, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_init() {
        let cli = Cli::parse_from(["rig", "--debug", "init", "my-app", "--force"]);
        assert!(cli.debug);
        match cli.command {
            Command::Init {
                project_name,
                force,
            } => {
                assert_eq!(project_name.as_deref(), Some("my-app"));
                assert!(force);
            }
            other => panic!("expected init, got {other:?}"),
        }
    }
}
