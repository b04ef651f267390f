//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Toroid server
#[derive(Parser, Debug)]
#[command(name = "toroid")]
#[command(about = "Multiplayer session server for the toroidal capture game", version)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP and WebSocket server
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overriding the config
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, overriding the config
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep durable records in memory instead of SQLite
        #[arg(long)]
        memory: bool,
    },

    /// Print JSON schemas of client commands and server events
    Schema,

    /// Print the recorded move log of a session
    Replay {
        /// SQLite database file
        #[arg(short, long, default_value = "toroid.db")]
        database: String,

        /// Session id
        #[arg(short, long)]
        session: String,
    },
}
