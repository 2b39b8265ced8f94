use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "grelay", version, about = "Gemini generation relay with credential and egress rotation")]
pub struct Cli {
    /// Configuration file (toml, yaml or json). Environment variables
    /// prefixed with `GRELAY_` override it.
    #[arg(long, short, env = "GRELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, env = "GRELAY_LOG_JSON", global = true)]
    pub log_json: bool,
    /// Write logs to a daily rolling file in this directory instead of stderr.
    #[arg(long, env = "GRELAY_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP front-end.
    Serve(ServeArgs),
    /// Run a single generation and print the result as JSON.
    Generate(GenerateArgs),
    /// Print the credential table as JSON.
    Stats(StatsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "GRELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "GRELAY_PORT", default_value_t = 8787)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    pub prompt: String,
    #[arg(long, short)]
    pub model: Option<String>,
    /// JSON schema for structured output, inline or `@path`.
    #[arg(long)]
    pub schema: Option<String>,
    /// Attach the credential table to the result.
    #[arg(long)]
    pub return_stats: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long)]
    pub index: Option<usize>,
}
