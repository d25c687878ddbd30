//! durian-live - continuous detection over a frame source
//!
//! Loads the configured model, then captures a frame every interval, runs
//! detection and logs the current view. Nothing is written to the history.
//! Runs until Ctrl-C or until `--seconds` have elapsed.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use durian_scan::config::AppConfig;
use durian_scan::{
    open_source, DetectionService, InMemoryPredictionStore, InferenceEngine, LiveDetector,
};

#[derive(Parser, Debug)]
#[command(name = "durian-live", version, about = "Live durian detection loop")]
struct Args {
    /// Frame source: a local image directory or stub://NAME (overrides config)
    #[arg(long, value_name = "SOURCE")]
    source: Option<String>,

    /// Milliseconds between frames (overrides config)
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// How often to log the live view
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    report_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AppConfig::load().context("failed to load configuration")?;
    if let Some(source) = args.source {
        cfg.live.source = source;
    }
    if let Some(ms) = args.interval_ms {
        if ms == 0 {
            return Err(anyhow!("interval must be >= 1 ms"));
        }
        cfg.live.interval = Duration::from_millis(ms);
    }

    let service = Arc::new(DetectionService::new(
        InferenceEngine::default(),
        cfg.postprocessor(),
        InMemoryPredictionStore::new(),
    ));
    service.load_model(cfg.model_info(), &cfg.model.backend)?;

    let source = open_source(&cfg.live.source)
        .with_context(|| format!("failed to open frame source {}", cfg.live.source))?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut live = LiveDetector::start(source, service.clone(), cfg.live.interval);
    let started = Instant::now();
    let deadline = args.seconds.map(Duration::from_secs);
    let report_every = Duration::from_millis(args.report_ms.max(100));
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= report_every {
            let state = live.snapshot();
            let best = state
                .detections
                .first()
                .map(|d| format!(" best={} {:.0}%", d.class_name, d.confidence * 100.0))
                .unwrap_or_default();
            log::info!(
                "fps={} detections={} captured={} processed={} skipped={} errors={}{}",
                state.fps,
                state.detections.len(),
                state.frames_captured,
                state.frames_processed,
                state.ticks_skipped,
                state.errors,
                best
            );
            last_report = Instant::now();
        }
    }

    live.stop();
    service.close()?;
    Ok(())
}
