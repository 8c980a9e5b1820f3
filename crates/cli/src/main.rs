//! netcli: interactive NETCONF client for netd.
//!
//! A thin REPL over the client library: one line per operation, data
//! rendered as XML, errors as one-liners (`-v` adds the cause chain).

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use netd_client::NetconfClient;
use netd_domain::config::ClientConfig;
use netd_yang::SchemaRegistry;

#[derive(Parser)]
#[command(name = "netcli", version, about = "Interactive NETCONF client for netd")]
struct Cli {
    /// Daemon socket to connect to.
    #[arg(long, short, default_value = "/var/run/netd.sock")]
    socket: PathBuf,

    /// Show error cause chains and session chatter.
    #[arg(long, short)]
    verbose: bool,

    /// Run one command and exit instead of starting the REPL.
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NETD_LOG").unwrap_or_else(|_| {
                EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(SchemaRegistry::bundled());
    let client = NetconfClient::connect_local(
        &cli.socket,
        registry,
        &ClientConfig::default(),
        16 * 1024 * 1024,
    )
    .await
    .with_context(|| format!("connecting to {}", cli.socket.display()))?;

    eprintln!(
        "connected to {} (session {})",
        cli.socket.display(),
        client.session_id()
    );

    let result = if cli.command.is_empty() {
        repl::run(&client, cli.verbose).await
    } else {
        repl::run_one(&client, &cli.command.join(" "), cli.verbose).await
    };

    let _ = client.close().await;
    result
}
