use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pageflow_viewer::sim::{SimDocument, SimulatedBackend};
use pageflow_viewer::{EngineConfig, EngineEvent, EngineSnapshot, NavigationTarget, ViewerEngine};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SIM_SOURCE: &str = "sim://document";

#[derive(Debug, Parser)]
#[command(name = "pageflow")]
#[command(about = "Pageflow viewer engine driver")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a scroll/navigation scenario against a simulated document.
    Simulate {
        /// Number of pages in the simulated document.
        #[arg(long)]
        pages: u32,
        /// Unscaled page size as WIDTHxHEIGHT.
        #[arg(long, value_name = "WxH", default_value = "612x792", value_parser = parse_size)]
        page_size: (f32, f32),
        /// Scroll container size as WIDTHxHEIGHT.
        #[arg(long, value_name = "WxH", default_value = "900x1000", value_parser = parse_size)]
        viewport: (f32, f32),
        /// TOML configuration file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Requested render scale.
        #[arg(long)]
        scale: Option<f32>,
        /// Jump to the top of a page before the final target (repeatable).
        #[arg(long = "center", value_name = "PAGE")]
        centers: Vec<u32>,
        /// Wheel by this many pixels and let the window settle (repeatable).
        #[arg(long = "scroll", value_name = "DELTA", allow_hyphen_values = true)]
        scrolls: Vec<f32>,
        /// Final navigation target.
        #[arg(long, value_name = "PAGE:RATIO")]
        goto: Option<NavigationTarget>,
        /// Time to let background work run before the snapshot.
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
        /// Include the host event log in the output.
        #[arg(long)]
        events: bool,
    },
    /// Print the effective engine configuration.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct SimulationOutput {
    snapshot: EngineSnapshot,
    total_height: f32,
    preload: Option<PreloadSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<EngineEvent>>,
}

#[derive(Debug, Serialize)]
struct PreloadSummary {
    measured: usize,
    cancelled: bool,
}

struct Scenario {
    pages: u32,
    page_size: (f32, f32),
    viewport: (f32, f32),
    scale: Option<f32>,
    centers: Vec<u32>,
    scrolls: Vec<f32>,
    goto: Option<NavigationTarget>,
    settle: Duration,
    events: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Simulate {
            pages,
            page_size,
            viewport,
            config,
            scale,
            centers,
            scrolls,
            goto,
            settle_ms,
            events,
        } => {
            let config = load_config(config.as_deref())?;
            let scenario = Scenario {
                pages,
                page_size,
                viewport,
                scale,
                centers,
                scrolls,
                goto,
                settle: Duration::from_millis(settle_ms),
                events,
            };
            run_simulate(config, scenario)
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = std::env::var("PAGEFLOW_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            EngineConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let config = config
        .with_env_overrides()
        .context("invalid PAGEFLOW_* environment override")?;
    Ok(config.validate()?)
}

fn run_simulate(config: EngineConfig, scenario: Scenario) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let output = runtime.block_on(simulate(config, scenario))?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn simulate(config: EngineConfig, scenario: Scenario) -> Result<SimulationOutput> {
    let (width, height) = scenario.page_size;
    let backend = SimulatedBackend::new()
        .with_document(SIM_SOURCE, SimDocument::uniform(scenario.pages, width, height));
    let window_settle = config.debounce() + Duration::from_millis(50);

    let (engine, mut receiver) = ViewerEngine::builder(Arc::new(backend.clone()))
        .with_config(config)
        .with_render_surface(Arc::new(backend))
        .build()?;

    engine.set_container_size(scenario.viewport.0, scenario.viewport.1);
    if let Some(scale) = scenario.scale {
        engine.set_scale(scale);
    }
    let page_count = engine
        .load(SIM_SOURCE)
        .await
        .context("failed to load simulated document")?;
    info!(?page_count, "simulated document loaded");

    for page in scenario.centers {
        let outcome = navigate(&engine, NavigationTarget::new(page, 0.0)).await;
        debug!(page, ?outcome, "centered");
    }
    for delta in scenario.scrolls {
        engine.wheel(delta);
        tokio::time::sleep(window_settle).await;
    }
    if let Some(target) = scenario.goto {
        let outcome = navigate(&engine, target).await;
        debug!(%target, ?outcome, "navigated");
    }
    tokio::time::sleep(scenario.settle).await;

    let events = scenario.events.then(|| {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    });
    let preload = engine.preload_report().map(|report| PreloadSummary {
        measured: report.measured(),
        cancelled: report.cancelled,
    });

    Ok(SimulationOutput {
        snapshot: engine.snapshot(),
        total_height: engine.layout().total_height(),
        preload,
        events,
    })
}

async fn navigate(
    engine: &ViewerEngine,
    target: NavigationTarget,
) -> Option<pageflow_viewer::NavigationOutcome> {
    engine.navigate(target);
    engine.settle_navigation().await
}

fn parse_size(value: &str) -> Result<(f32, f32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f32>()
            .ok()
            .filter(|size| size.is_finite() && *size > 0.0)
            .ok_or_else(|| format!("invalid size component '{part}'"))
    };
    Ok((parse(width)?, parse(height)?))
}
