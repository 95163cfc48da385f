mod health;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use shades_contracts::{CursorStore, ProcessedStore};
use shades_engine::{
    BotConfig, Credentials, PipelineContext, Poller, ReplicateGenerator, XApiClient,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "shades",
    version,
    about = "Answers mentions with a sunglasses edit of the person"
)]
struct Cli {
    /// Load environment variables from this file instead of ./.env.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll forever.
    Run(RunArgs),
    /// Run a single poll cycle and exit.
    Once,
    /// Print the persisted cursor and processed-set size.
    Status,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    no_health: bool,
    #[arg(long)]
    health_port: Option<u16>,
}

type LivePoller = Poller<XApiClient, ReplicateGenerator>;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("shades error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    init_logging(cli.json_logs);
    match cli.command {
        Command::Run(args) => run_forever(args),
        Command::Once => run_once(),
        Command::Status => show_status(),
    }
}

fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }
    Ok(())
}

fn init_logging(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_pipeline() -> Result<(PipelineContext, LivePoller)> {
    let config = BotConfig::from_env()?;
    let credentials = Credentials::from_env()?;
    let api = XApiClient::new(&credentials)?;
    let generator = ReplicateGenerator::new(&credentials, &config.model_ref)?;
    let cursor = CursorStore::open(&config.cursor_file).with_context(|| {
        format!("failed to load cursor from {}", config.cursor_file.display())
    })?;
    let ctx = PipelineContext::open(config)?;
    Ok((ctx, Poller::new(api, generator, cursor)))
}

fn run_forever(args: RunArgs) -> Result<i32> {
    let (mut ctx, mut poller) = build_pipeline()?;
    if !args.no_health {
        let port = args.health_port.unwrap_or(ctx.config.health_port);
        health::spawn(port)?;
    }
    info!(
        handle = %ctx.config.bot_handle,
        session_id = %ctx.session_id(),
        processed = ctx.processed.len(),
        "bot starting"
    );
    poller.prepare(&mut ctx);
    poller.run_forever(&mut ctx)
}

fn run_once() -> Result<i32> {
    let (mut ctx, mut poller) = build_pipeline()?;
    poller.prepare(&mut ctx);
    let report = poller.run_cycle(&mut ctx)?;
    println!(
        "{}",
        json!({
            "fetched": report.fetched,
            "replied": report.replied,
            "skipped": report.skipped,
            "abandoned": report.abandoned,
            "cursor": report.cursor.map(|id| id.to_string()),
        })
    );
    Ok(if report.abandoned > 0 { 2 } else { 0 })
}

fn show_status() -> Result<i32> {
    let config = BotConfig::from_env()?;
    let cursor = CursorStore::open(&config.cursor_file)?;
    let processed = ProcessedStore::open(&config.processed_file, config.processed_capacity)?;
    println!(
        "{}",
        json!({
            "handle": config.bot_handle,
            "cursor": cursor.current().map(|id| id.to_string()),
            "processed": processed.len(),
            "capacity": processed.capacity(),
        })
    );
    Ok(0)
}
