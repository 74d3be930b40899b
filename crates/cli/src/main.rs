//! CLI for the wecom-mediator service.

#![allow(clippy::print_stdout, reason = "CLI output")]
#![allow(clippy::print_stderr, reason = "CLI error output")]
#![allow(clippy::unwrap_used, reason = "CLI panics are acceptable")]
#![allow(clippy::missing_errors_doc, reason = "CLI functions")]
#![allow(clippy::implicit_return, reason = "Implicit return is idiomatic Rust")]
#![allow(clippy::question_mark_used, reason = "? operator is idiomatic Rust")]

mod commands;
mod storage;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wecom_mediator_core::MediatorConfig;

#[derive(Parser)]
#[command(name = "wecom-mediator")]
#[command(about = "Stateful chat-message mediation service between an IM webhook platform and an LLM Agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the webhook server, worker loop, and background tasks.
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short = 'H', long)]
        host: Option<String>,
    },
    /// Copies all KV/queue state from a SQLite database to a Postgres database.
    #[cfg(all(feature = "sqlite", feature = "postgres"))]
    Migrate {
        #[arg(long)]
        from_sqlite: String,
        #[arg(long)]
        to_postgres: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MediatorConfig::from_env();

    match cli.command {
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.bind_port);
            let host = host.unwrap_or_else(|| config.bind_host.clone());
            commands::serve::run(config, host, port).await?;
        },
        #[cfg(all(feature = "sqlite", feature = "postgres"))]
        Commands::Migrate { from_sqlite, to_postgres } => {
            commands::migrate::run(&from_sqlite, &to_postgres).await?;
        },
    }

    Ok(())
}
