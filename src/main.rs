//! glancehudd - replay-driven harness for the arbitration core.
//!
//! Feeds a JSON-lines provider timeline through the full pipeline and
//! prints every display-decision change, at real or scaled speed.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use glancehud::Config;
use glancehud::Engine;
use glancehud::EngineOutputs;
use glancehud::SlotActivity;
use glancehud::provider::StaticBatteryLevels;
use glancehud::replay;

/// Replay a provider event timeline through the arbitration core.
#[derive(Parser, Debug)]
#[command(name = "glancehudd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON-lines timeline file.
    timeline: PathBuf,

    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Time scale: 2.0 plays the timeline at double speed.
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// How long to keep running after the last timeline event, in seconds.
    #[arg(long, default_value = "3")]
    drain_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;
    info!("glancehudd v{} starting", env!("CARGO_PKG_VERSION"));

    if args.speed <= 0.0 {
        anyhow::bail!("--speed must be positive");
    }

    let config = Config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    let file = File::open(&args.timeline)
        .with_context(|| format!("Failed to open timeline: {}", args.timeline.display()))?;
    let events = replay::parse_timeline(BufReader::new(file))
        .with_context(|| format!("Failed to parse timeline: {}", args.timeline.display()))?;
    info!("Loaded {} timeline event(s)", events.len());

    let lookup = Arc::new(StaticBatteryLevels::new(config.accessory_battery.clone()));
    let (engine, channels, outputs) = Engine::new(&config, lookup);

    let shutdown = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(shutdown.clone()));
    let printer_task = tokio::spawn(print_decisions(outputs));

    tokio::select! {
        () = replay::play(&events, &channels, args.speed) => {
            info!(
                "Timeline finished, draining for {}s",
                args.drain_seconds
            );
            tokio::time::sleep(Duration::from_secs(args.drain_seconds)).await;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!("Interrupted");
        }
    }

    shutdown.cancel();
    printer_task.abort();
    engine_task.await.context("Engine task panicked")?;

    Ok(())
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("glancehud={level},glancehudd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Print every display-decision change as it happens.
async fn print_decisions(mut outputs: EngineOutputs) {
    loop {
        let decision = *outputs.decision.borrow_and_update();
        println!(
            "[DECISION] primary={} secondary={}",
            decision.primary.map_or("none", SlotActivity::as_str),
            decision.secondary.map_or("none", SlotActivity::as_str),
        );

        if outputs.decision.changed().await.is_err() {
            return;
        }
    }
}
