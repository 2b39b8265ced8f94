use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod server;
mod settings;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_json, cli.log_dir.as_deref());
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("grelay failed: {err:#}");
            std::process::exit(1);
        }
    }
}

/// `Ok(false)` means the command ran but the generation did not succeed.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = settings::load(cli.config.as_deref())?;
    info!(
        event = "config_loaded",
        file = ?cli.config,
        strategy = config.content_strategy.as_str(),
        egress_mode = ?config.egress.mode
    );
    let gateway = Arc::new(settings::build_gateway(config)?);

    match cli.command {
        Command::Serve(args) => server::serve(gateway, args).await.map(|()| true),
        Command::Generate(args) => commands::generate(&gateway, args).await,
        Command::Stats(args) => commands::stats(&gateway, args).map(|()| true),
    }
}

fn init_tracing(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("grelay=info,tower_http=info"));
    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "grelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_dir.is_none());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    guard
}
