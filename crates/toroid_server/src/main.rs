//! Toroid server binary.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use toroid_server::{
    ClientCommand, EventEnvelope, Server, ServerConfig, SessionRepository, StorageBackend,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,toroid_server=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            memory,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(&path)?,
                None => ServerConfig::default(),
            };
            config.apply_env()?;
            if let Some(host) = host {
                config = config.with_host(host);
            }
            if let Some(port) = port {
                config = config.with_port(port);
            }
            if memory {
                config = config.with_storage(StorageBackend::Memory);
            }
            config.validate()?;

            let addr = config.bind_address();
            info!(%addr, storage = %config.storage(), "Starting toroid server");
            let server = Server::build(config).await?;
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            server.serve(listener).await?;
        }

        Command::Schema => {
            let commands = schemars::schema_for!(ClientCommand);
            let events = schemars::schema_for!(EventEnvelope);
            let both = serde_json::json!({ "clientCommand": commands, "eventEnvelope": events });
            println!("{}", serde_json::to_string_pretty(&both)?);
        }

        Command::Replay { database, session } => {
            let repo = SessionRepository::open(&database)?;
            let record = repo
                .find_session(&session)?
                .with_context(|| format!("No session '{}' in {}", session, database))?;
            println!(
                "{} [{}] {}x{} code {}",
                record.id(),
                record.status(),
                record.board_width(),
                record.board_height(),
                record.code()
            );
            for entry in repo.moves_for_session(&session)? {
                let cell = match (entry.x(), entry.y()) {
                    (Some(x), Some(y)) => format!("({}, {})", x, y),
                    _ => "-".to_string(),
                };
                println!(
                    "{:>5} {:<3} {:<7} {:<10} {}-{}",
                    entry.sequence(),
                    entry.player(),
                    entry.kind(),
                    cell,
                    entry.score_one(),
                    entry.score_two()
                );
            }
        }
    }

    Ok(())
}
