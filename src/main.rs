//! Helpdesk - AI tech-support chat CLI
//!
#![doc = "Main entry point for the Helpdesk application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helpdesk::cli::{Cli, Commands};
use helpdesk::commands;
use helpdesk::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load and validate configuration
    let config_path = cli.config.as_deref().unwrap_or("config/helpdesk.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting service mode");
            commands::serve::run_serve(config).await
        }
        Commands::Chat { no_stream, new } => {
            if no_stream {
                tracing::debug!("Streaming disabled for this session");
            }
            commands::chat::run_chat(config, no_stream, new).await
        }
        Commands::Ask { prompt, no_stream } => {
            commands::ask::run_ask(config, prompt, no_stream).await
        }
        Commands::History { command } => {
            tracing::debug!("Starting history command");
            commands::history::handle_history(config, command)
        }
        Commands::Analytics { json } => commands::analytics::show_analytics(config, json),
        Commands::Reset { analytics } => commands::reset::run_reset(config, analytics),
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "helpdesk=debug" } else { "helpdesk=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
