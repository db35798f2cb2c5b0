//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "binary"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Binary entrypoint for the pumpwatch daemon and offline tools."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pumpwatch_api::{spawn_api_server, ApiServer, ApiState};
use pumpwatch_common::config::AppConfig;
use pumpwatch_common::logging::init_tracing;
use pumpwatch_detect::{evaluate, pipeline, AlertAggregator, DetectionEngine, DetectorConfig};
use pumpwatch_metrics::{
    new_registry, spawn_http_server, BusMetrics, DaemonMetrics, DetectionMetrics, SharedRegistry,
    SimulationMetrics,
};
use pumpwatch_msg::{AlertEvent, InMemoryTransport, JsonlArchive, MessageBus, TopicKind};
use pumpwatch_rt::ServiceGroup;
use pumpwatch_sim::{ExecutorSettings, ScenarioDefinition, ScenarioExecutor, SimulationRegistry};
use serde::Serialize;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/pumpwatch.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pumpwatch simulation and detection daemon",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        default_value = DEFAULT_CONFIG,
        help = "Path to configuration file"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run simulators, detection and the control surface until Ctrl-C")]
    Run,
    #[command(about = "Run a scenario in virtual time and write telemetry as JSON lines")]
    Simulate {
        #[arg(long, value_name = "FILE", help = "Scenario JSON document")]
        scenario: PathBuf,
        #[arg(long, value_name = "FILE", help = "Output file; stdout when omitted")]
        out: Option<PathBuf>,
    },
    #[command(about = "Simulate a scenario, detect offline and print the evaluation report")]
    Evaluate {
        #[arg(long, value_name = "FILE", help = "Scenario JSON document")]
        scenario: PathBuf,
        #[arg(long, value_name = "FILE", help = "Detector rules; overrides detection.rules_path")]
        rules: Option<PathBuf>,
    },
    #[command(about = "Validate configuration, detector rules and autoload scenarios")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&[&cli.config])?;
    let load_duration = load_started.elapsed();
    let config = loaded.config;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("pumpwatchd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(path = %path.display(), "configuration loaded"),
                None => info!("no configuration file found; using defaults"),
            }
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(&registry)?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            run_daemon(config, registry).await?
        }
        // Offline tools write their results to stdout, so no stdout subscriber.
        Commands::Simulate { scenario, out } => simulate(&config, &scenario, out.as_deref())?,
        Commands::Evaluate { scenario, rules } => {
            let rules = rules.or_else(|| config.detection.rules_path.clone());
            evaluate_scenario(&config, &scenario, rules.as_deref())?
        }
        Commands::CheckConfig => check_config(&config, loaded.source.as_deref())?,
    }

    Ok(())
}

fn load_rules(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::from_path(path)
            .with_context(|| format!("failed to load detector rules {}", path.display())),
        None => Ok(DetectorConfig::default()),
    }
}

fn executor_settings(config: &AppConfig) -> ExecutorSettings {
    ExecutorSettings {
        tick_period: config.simulation.tick_period(),
        label_policy: config.simulation.label_policy,
    }
}

fn load_scenario(path: &Path) -> Result<ScenarioDefinition> {
    ScenarioDefinition::from_path(path)
        .with_context(|| format!("failed to load scenario {}", path.display()))
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let rules = load_rules(config.detection.rules_path.as_deref())?;

    let memory = Arc::new(InMemoryTransport::new());
    let detection_feed = memory.subscribe(&[TopicKind::Telemetry, TopicKind::Control]);
    let mut bus = MessageBus::new().with_metrics(BusMetrics::new(&metrics_registry)?);
    bus.register_transport(memory);
    if config.bus.archive_enabled {
        let archive = JsonlArchive::open(&config.bus.archive_dir).with_context(|| {
            format!(
                "failed to open message archive {}",
                config.bus.archive_dir.display()
            )
        })?;
        info!(directory = %config.bus.archive_dir.display(), "jsonl archive enabled");
        bus.register_transport(Arc::new(archive));
    }
    let bus = Arc::new(bus);

    let detection_metrics = DetectionMetrics::new(&metrics_registry)?;
    let aggregator = Arc::new(
        AlertAggregator::new(config.detection.cooldown)
            .with_bus(bus.clone())
            .with_metrics(detection_metrics.clone()),
    );
    let engine = DetectionEngine::new(rules, aggregator.clone()).with_metrics(detection_metrics);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut services = ServiceGroup::default();
    services.spawn("detection", async move {
        let (_, report) = pipeline::run(engine, detection_feed, shutdown_rx).await;
        info!(
            samples = report.samples,
            alerts = report.alerts,
            resets = report.resets,
            "detection pipeline drained"
        );
        Ok::<_, anyhow::Error>(())
    });

    let registry = Arc::new(
        SimulationRegistry::new(bus.clone(), executor_settings(&config))
            .with_metrics(SimulationMetrics::new(&metrics_registry)?),
    );

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(registry.clone(), aggregator.clone()));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    for path in &config.simulation.scenario_files {
        let loaded = match load_scenario(path) {
            Ok(definition) => registry.load(definition).await,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping scenario");
                continue;
            }
        };
        match loaded {
            Ok(ack) if config.simulation.autostart => {
                if let Err(err) = registry.start(&ack.asset_id).await {
                    warn!(asset_id = %ack.asset_id, error = %err, "autostart failed");
                }
            }
            Ok(ack) => info!(asset_id = %ack.asset_id, "scenario loaded"),
            Err(err) => warn!(path = %path.display(), error = %err, "scenario rejected"),
        }
    }

    info!(
        assets = registry.asset_ids().len(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    registry.stop_all().await;
    let _ = shutdown_tx.send(true);
    services.join().await?;

    let stats = bus.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        failed = stats.failed,
        "message bus closed"
    );

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    if let Some(server) = api_server {
        server.shutdown().await?;
    }

    Ok(())
}

fn simulate(config: &AppConfig, scenario: &Path, out: Option<&Path>) -> Result<()> {
    let definition = load_scenario(scenario)?;
    let mut executor = ScenarioExecutor::new(definition, executor_settings(config));
    let samples = executor.run_to_end(Utc::now())?;

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);
    for sample in &samples {
        serde_json::to_writer(&mut writer, sample)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    if let Some(path) = out {
        eprintln!("wrote {} samples to {}", samples.len(), path.display());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EvaluationOutput<'a> {
    scenario: &'a str,
    samples: usize,
    alerts: &'a [AlertEvent],
    report: pumpwatch_detect::EvaluationReport,
}

fn evaluate_scenario(config: &AppConfig, scenario: &Path, rules: Option<&Path>) -> Result<()> {
    let rules = load_rules(rules)?;
    let definition = load_scenario(scenario)?;
    let name = definition.name.clone();
    let mut executor = ScenarioExecutor::new(definition, executor_settings(config));
    let samples = executor.run_to_end(Utc::now())?;

    let aggregator = Arc::new(AlertAggregator::new(config.detection.cooldown));
    let mut engine = DetectionEngine::new(rules, aggregator);
    let alerts: Vec<AlertEvent> = samples.iter().filter_map(|s| engine.process(s)).collect();
    let report = evaluate(&samples, &alerts, config.detection.evaluation_grace);

    let output = EvaluationOutput {
        scenario: &name,
        samples: samples.len(),
        alerts: &alerts,
        report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn check_config(config: &AppConfig, source: Option<&Path>) -> Result<()> {
    config.validate()?;
    let rules = load_rules(config.detection.rules_path.as_deref())?;
    for path in &config.simulation.scenario_files {
        load_scenario(path)?;
    }
    match source {
        Some(path) => println!("configuration {} ok", path.display()),
        None => println!("no configuration file found; defaults ok"),
    }
    println!(
        "detector rules ok: {} threshold, {} adaptive, {} combination",
        rules.thresholds.len(),
        rules.adaptive.len(),
        rules.combinations.len()
    );
    println!(
        "{} autoload scenario(s) ok",
        config.simulation.scenario_files.len()
    );
    Ok(())
}
