use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use netd_domain::Config;
use netd_server::state::ServerState;

#[derive(Parser)]
#[command(name = "netd", version, about = "Network configuration daemon")]
struct Cli {
    /// Path to the daemon configuration file.
    #[arg(long, short, default_value = "/etc/netd/netd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (the default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Parse and validate the configuration file, then exit.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            serve(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            match Config::load(&cli.config) {
                Ok(_) => {
                    println!("{}: ok", cli.config.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}: {e}", cli.config.display());
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NETD_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "netd starting");

    let state = ServerState::build(&config)
        .await
        .context("building server state")?;
    tracing::info!(
        modules = state.registry.modules().len(),
        capabilities = state.capabilities.len(),
        "schema registry ready"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "signal handler failed");
        }
    };
    netd_server::serve::run(state, &config, shutdown).await
}
