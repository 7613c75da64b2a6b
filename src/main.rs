//! CLI entry point for measure_daq
//!
//! Provides command-line interface for:
//! - Running a measurement against a simulated detector
//! - Checking and printing the effective configuration
//! - Writing a default configuration file
//!
//! # Usage
//!
//! ```bash
//! measure_daq run --config config/measure.toml --scan-count 3 --storage data/
//! measure_daq check-config --json
//! measure_daq init-config my_setup.toml
//! ```

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use tracing::{info, warn};

use measure_daq::channel::{ChannelOptions, ChannelRef, ChannelRegistry, Hint, StepSelector};
use measure_daq::config::{LimitConfig, MeasureConfig, DEFAULT_CONFIG_PATH};
use measure_daq::gate::Gates;
use measure_daq::logging::{self, TracingConfig};
use measure_daq::measure::{MeasurementBuilder, TracingStatus};
use measure_daq::simulation::SimulatedDetector;

#[derive(Parser)]
#[command(name = "measure_daq")]
#[command(about = "Measurement execution engine with a simulated detector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a measurement with the simulated detector
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the number of scan iterations
        #[arg(long)]
        scan_count: Option<usize>,

        /// Override the storage directory
        #[arg(long)]
        storage: Option<PathBuf>,
    },

    /// Validate and print the effective configuration
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Write the default configuration as TOML
    InitConfig {
        /// Destination file
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            scan_count,
            storage,
        } => run_measurement(&config, scan_count, storage).await,
        Commands::CheckConfig { config, json } => check_config(&config, json),
        Commands::InitConfig { path, force } => init_config(&path, force),
    }
}

fn load_config(path: &Path) -> Result<MeasureConfig> {
    let config = MeasureConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

struct Pipeline {
    registry: ChannelRegistry,
    detector: ChannelRef,
    mean: ChannelRef,
}

/// Detector channel plus a normalized and a per-step mean channel derived from it.
fn open_pipeline(config: &MeasureConfig) -> Result<Pipeline> {
    let registry = ChannelRegistry::new();
    let detector = registry.open("detector", ChannelOptions::default())?;
    detector
        .borrow_mut()
        .set_header_tag("Source", config.application.name.clone());

    let normalized = registry.open("normalized", ChannelOptions::default())?;
    normalized
        .borrow_mut()
        .set_computing(
            |args: &[f64]| {
                let raw = args.first().copied().ok_or_else(|| anyhow!("no detector sample"))?;
                Ok(raw / 100.0)
            },
            std::slice::from_ref(&detector),
        )?;

    let mean = registry.open(
        "detector_mean",
        ChannelOptions::default().with_hint(Hint::Indicator),
    )?;
    mean.borrow_mut().set_averaging(&detector)?;

    Ok(Pipeline {
        registry,
        detector,
        mean,
    })
}

async fn run_measurement(
    config_path: &Path,
    scan_count: Option<usize>,
    storage: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(scan_count) = scan_count {
        config.measurement.scan_count = scan_count;
    }
    if storage.is_some() {
        config.measurement.storage_root = storage;
    }
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;

    logging::init(TracingConfig::from_config(&config)?)?;

    // Channels and nodes are single-threaded, so the whole run lives on a LocalSet.
    let local = LocalSet::new();
    local.run_until(execute(config)).await
}

async fn execute(config: MeasureConfig) -> Result<()> {
    let gates = Gates::new();
    let pipeline = open_pipeline(&config)?;
    let detector = SimulatedDetector::from_config(
        pipeline.detector.clone(),
        gates.clone(),
        &config.simulation,
    );

    let measurement_config = &config.measurement;
    let mut builder = MeasurementBuilder::new(gates)
        .scan_count(measurement_config.scan_count)
        .channels(pipeline.registry.shared())
        .node(Rc::new(detector))
        .point_operator(measurement_config.points.operator())
        .scan_operator(measurement_config.scan_operator())
        .trigger_operator(measurement_config.trigger_operator())
        .limit_operator(measurement_config.limit.operator(&pipeline.detector))
        .status_operator(TracingStatus::new());

    if let Some(root) = &measurement_config.storage_root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create storage directory {}", root.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        builder = builder.storage_base(root.join(format!("measurement_{stamp}")));
    }

    let mut measurement = builder.build()?;

    if measurement_config.limit == LimitConfig::Manual {
        warn!("manual limit: steps only end on abort, press Ctrl-C to stop");
    }
    let handle = measurement.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, aborting measurement");
            handle.abort();
        }
    });

    measurement.execute().await?;

    let means = pipeline
        .mean
        .borrow()
        .get_data(StepSelector::All)
        .unwrap_or_default();
    for (step, value) in means.iter().enumerate() {
        info!(step, mean = value, "detector mean");
    }
    if measurement.is_aborting() {
        bail!("measurement aborted");
    }
    Ok(())
}

fn check_config(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("# effective configuration ({})", path.display());
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let text = MeasureConfig::default().to_toml()?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote default configuration to {}", path.display());
    Ok(())
}
