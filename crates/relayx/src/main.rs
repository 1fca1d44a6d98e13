use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process;

mod commands;

/// Exit codes: 0 = OK, 1 = other, 2 = input error (400/404/415/422 or a
/// bad local file), 4 = auth (401/403), 5 = rate limit (429),
/// 6 = upstream unavailable (503).
const EXIT_OTHER: i32 = 1;
const EXIT_INPUT: i32 = 2;
const EXIT_AUTH: i32 = 4;
const EXIT_RATE: i32 = 5;
const EXIT_UNAVAILABLE: i32 = 6;

#[derive(Parser)]
#[command(name = "relayx", version, about = "Relay CLI: list adapters, execute tools, read the audit trail")]
struct Cli {
    /// Gateway URL (default: $RELAY_GATE_URL or http://localhost:3000)
    #[arg(long, env = "RELAY_GATE_URL")]
    gate: Option<String>,

    /// Caller id sent as X-Caller-Id (rate-limit bucket)
    #[arg(long, env = "RELAY_CALLER_ID")]
    caller: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered adapters
    Adapters,
    /// Show one adapter: tools, input schemas, circuit state
    Adapter {
        /// Adapter name
        name: String,
    },
    /// Execute a tool
    Exec {
        /// Adapter name
        adapter: String,
        /// Tool name
        tool: String,
        /// Path to parameters JSON file (or - for stdin); defaults to {}
        params: Option<String>,
        /// Optional metadata JSON object recorded in the audit trail
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Check gateway health
    Health,
    /// Get the audit report
    Audit,
}

/// Map error strings to exit codes based on HTTP status patterns.
fn exit_code_for(err: &str) -> i32 {
    if err.contains("HTTP 401") || err.contains("HTTP 403") {
        EXIT_AUTH
    } else if err.contains("HTTP 429") {
        EXIT_RATE
    } else if err.contains("HTTP 503") {
        EXIT_UNAVAILABLE
    } else if ["HTTP 400", "HTTP 404", "HTTP 415", "HTTP 422"]
        .iter()
        .any(|p| err.contains(p))
        || err.starts_with("read ")
        || err.starts_with("parse ")
    {
        EXIT_INPUT
    } else {
        EXIT_OTHER
    }
}

fn main() {
    let cli = Cli::parse();
    let gate = cli.gate.unwrap_or_else(|| relay_config::GATE_URL.clone());
    let client = commands::Client::new(&gate, cli.caller.as_deref());

    let result = match cli.command {
        Commands::Adapters => commands::adapters(&client),
        Commands::Adapter { name } => commands::adapter(&client, &name),
        Commands::Exec {
            adapter,
            tool,
            params,
            metadata,
        } => commands::exec(&client, &adapter, &tool, params.as_deref(), metadata.as_deref()),
        Commands::Health => commands::health(&client),
        Commands::Audit => commands::audit(&client),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(exit_code_for(&e));
    }
}
