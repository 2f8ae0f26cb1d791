//! fieldmon - field sensor monitor entry point

use clap::{Parser, Subcommand};
use fieldmon::alerts::ThresholdSpec;
use fieldmon::config::MonitorConfig;
use fieldmon::monitor::{MonitorLoop, RunOptions, StopHandle};
use fieldmon::observability::init_from_config;
use fieldmon::protocol::TopicBuilder;
use fieldmon::sensors::SimulatedSource;
use fieldmon::session::ConnectionSession;
use fieldmon::transport::{MqttTransportBuilder, SimulatedTransportBuilder, TransportBuilder};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Field sensor monitor with debounced alerting and resilient MQTT telemetry
#[derive(Parser)]
#[command(name = "fieldmon")]
#[command(about = "Smart agriculture field sensor monitor")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Thresholds file overriding the [alerts] and [thresholds] tables
    #[arg(short, long, value_name = "FILE")]
    thresholds: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loop
    Run {
        /// Use the simulated transport and readings
        #[arg(short, long)]
        simulate: bool,

        /// Stop after this many seconds
        #[arg(short, long, value_name = "SECS")]
        duration: Option<u64>,

        /// Publish one test alert on the first reading
        #[arg(short = 'a', long)]
        force_alert: bool,
    },
    /// Connect to the broker once and report the result
    TestConnection {
        #[arg(short, long)]
        simulate: bool,
    },
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let simulate = match &cli.command {
        Commands::Run { simulate, .. } | Commands::TestConnection { simulate } => *simulate,
        Commands::Config { .. } => false,
    };

    let mut config = match load_configuration(cli.config.as_deref(), simulate) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    init_from_config(&config.logging);

    info!("Starting fieldmon v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run {
            duration,
            force_alert,
            ..
        } => {
            let options = RunOptions {
                duration: duration.map(Duration::from_secs),
                max_ticks: None,
                force_alert,
            };
            run_monitor(config, cli.thresholds.as_deref(), options).await
        }
        Commands::TestConnection { .. } => test_connection(config).await,
        Commands::Config { show } => handle_config_command(&config, cli.thresholds.as_deref(), show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>, simulate: bool) -> CliResult<MonitorConfig> {
    if let Some(path) = config_path {
        return Ok(MonitorConfig::load_with_simulation(path, simulate)?);
    }

    for candidate in ["fieldmon.toml", "config/fieldmon.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(MonitorConfig::load_with_simulation(path, simulate)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create fieldmon.toml".into())
}

fn load_thresholds(config: &MonitorConfig, path: Option<&Path>) -> CliResult<ThresholdSpec> {
    match path {
        Some(path) => {
            info!("Loading thresholds from: {}", path.display());
            Ok(ThresholdSpec::load_from_file(path)?)
        }
        None => Ok(config.threshold_spec()?),
    }
}

fn transport_builder(config: &MonitorConfig) -> Arc<dyn TransportBuilder> {
    if config.simulation.enabled {
        Arc::new(SimulatedTransportBuilder)
    } else {
        let topics = TopicBuilder::new(&config.publishing.topic_prefix, &config.device.id);
        Arc::new(MqttTransportBuilder::new(topics))
    }
}

async fn run_monitor(
    config: MonitorConfig,
    thresholds: Option<&Path>,
    options: RunOptions,
) -> CliResult<()> {
    let spec = load_thresholds(&config, thresholds)?;

    if !config.simulation.enabled {
        warn!("No hardware drivers are built in; readings come from the simulated source");
    }
    let source = SimulatedSource::new(&config.simulation, config.sensors.soil_moisture.calibration);

    let mut monitor = MonitorLoop::new(&config, spec, transport_builder(&config), Box::new(source))?;

    println!("Starting field sensor monitor...");
    println!("  Device ID: {}", config.device.id);
    println!(
        "  Location: {}",
        config.device.location.as_deref().unwrap_or("unknown")
    );
    println!("  Simulation Mode: {}", config.simulation.enabled);
    println!("  Publish Interval: {}s", config.publishing.interval_secs);
    if let Some(duration) = options.duration {
        println!("  Duration: {}s", duration.as_secs());
    }
    println!();
    println!("Press Ctrl+C to stop...");

    let signals = tokio::spawn(stop_on_signal(monitor.stop_handle()));
    let summary = monitor.run(options).await;
    signals.abort();
    let summary = summary?;

    println!();
    println!("Ticks: {}  Alerts: {}", summary.ticks, summary.alerts);
    println!(
        "Published: {}  Errors: {}  Success rate: {:.1}%",
        summary.metrics.publish_count,
        summary.metrics.error_count,
        summary.metrics.success_rate * 100.0
    );
    Ok(())
}

/// Trigger the stop handle on SIGINT or SIGTERM
async fn stop_on_signal(stop: StopHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
    stop.stop();
}

async fn test_connection(config: MonitorConfig) -> CliResult<()> {
    let session = ConnectionSession::new(config.connection_config(), transport_builder(&config));

    println!("Testing broker connection to {}...", config.broker.endpoint);
    if session.test_connection().await {
        println!("Broker connection successful");
        Ok(())
    } else {
        Err("broker connection failed".into())
    }
}

fn handle_config_command(
    config: &MonitorConfig,
    thresholds: Option<&Path>,
    show: bool,
) -> CliResult<()> {
    let spec = load_thresholds(config, thresholds)?;

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        device_id = %config.device.id,
        metrics = spec.metrics().count(),
        "Configuration validation complete"
    );
    Ok(())
}
