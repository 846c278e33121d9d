mod commands;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use commands::DEFAULT_SERVER_URL;
use commands::validate::ValidateOptions;

// ============================================================================
// CLI Types
// ============================================================================

/// ProveIt - stress-test a product idea before you build it
#[derive(Parser, Debug)]
#[command(version = proveit::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "proveit.yaml")]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Get a quick verdict on an idea
    Fast {
        /// The idea, in plain words
        idea: String,

        /// Server URL
        #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
        server: String,
    },

    /// Run a multi-turn validation session, resuming the last one if unfinished
    Validate {
        /// Server URL
        #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
        server: String,

        /// Where the session is kept between runs
        #[arg(long, default_value = ".proveit")]
        data_dir: PathBuf,

        /// Discard any saved session and start over
        #[arg(long)]
        fresh: bool,

        /// Messages sent per turn
        #[arg(long, default_value_t = 48)]
        history_limit: usize,

        /// Give up on a web search after this many seconds (0 disables)
        #[arg(long, value_name = "SECONDS", default_value_t = 60)]
        search_timeout: u64,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => commands::serve::run(&config, host, port).await,
        Commands::Fast { idea, server } => commands::fast::run(&server, &idea).await,
        Commands::Validate {
            server,
            data_dir,
            fresh,
            history_limit,
            search_timeout,
        } => {
            commands::validate::run(ValidateOptions {
                server: &server,
                data_dir: &data_dir,
                fresh,
                history_limit,
                search_timeout: (search_timeout > 0).then(|| Duration::from_secs(search_timeout)),
            })
            .await
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
