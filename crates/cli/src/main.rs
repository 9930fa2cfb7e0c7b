mod app;
mod channel_commands;
mod run_command;
mod terminal;
mod user_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    waigaya_common::ActionResult,
    waigaya_slack::ConnectionManager,
};

use crate::app::App;

#[derive(Parser)]
#[command(name = "waigaya", about = "Waigaya: Slack channels on a timed display", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Print command results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Custom config directory (overrides the per-user default).
    #[arg(long, global = true, env = "WAIGAYA_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides the per-user default).
    #[arg(long, global = true, env = "WAIGAYA_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and relay watched channels (default when no subcommand is given).
    Run,
    /// Check the configured tokens without opening a stream.
    Test,
    /// Channel listing and the watch list.
    Channels {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// The user identity cache.
    Users {
        #[command(subcommand)]
        action: user_commands::UserAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries displayed messages and command output.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Print an action outcome; failures exit with status 1.
pub(crate) fn report(result: &ActionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        let message = result.message.as_deref().unwrap_or_default();
        match result.code {
            None => println!("{message}"),
            Some(code) => eprintln!("error [{}]: {message}", code.as_str()),
        }
    }
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn test_credentials(app: &App, json: bool) -> anyhow::Result<()> {
    let (manager, _events) = ConnectionManager::new(app.api.clone(), app.connection_settings());
    let result = manager.test_connection(&app.credentials).await;
    report(
        &ActionResult::from_result(&result, |identity| {
            format!(
                "authenticated as {} in {}",
                identity.user,
                identity.team.as_deref().unwrap_or("workspace")
            )
        }),
        json,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "waigaya starting");

    let app = App::load(cli.config_dir.clone(), cli.data_dir.clone())?;

    match cli.command {
        None | Some(Commands::Run) => run_command::run(app).await,
        Some(Commands::Test) => test_credentials(&app, cli.json).await,
        Some(Commands::Channels { action }) => {
            channel_commands::handle_channels(&app, action, cli.json).await
        },
        Some(Commands::Users { action }) => {
            user_commands::handle_users(&app, action, cli.json).await
        },
    }
}
