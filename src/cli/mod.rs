pub mod backend;
pub mod clients;
pub mod doctor;
pub mod memory;
pub mod output;
pub mod serve;
pub mod verify;

use clap::{Parser, Subcommand};

/// Meta-manager and gateway for Model Context Protocol servers
#[derive(Parser)]
#[command(name = "mcp-gateway", version, about, long_about = None)]
pub struct Cli {
    /// Increase output verbosity
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to mcp-gateway.toml (defaults to the nearest ancestor directory)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway MCP server over stdio (default if no subcommand given)
    Serve(serve::Args),

    /// Manage backend server registrations
    Backend(backend::Args),

    /// Verify a backend launches and responds correctly
    Verify(verify::Args),

    /// Check the health of every registered backend
    Doctor(doctor::Args),

    /// Inspect or synchronize MCP config across host clients
    Clients(clients::Args),

    /// Inspect conversational memory and derived preferences
    Memory(memory::Args),
}
