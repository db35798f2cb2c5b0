//! ---
//! pw_section: "15-testing-qa-runbook"
//! pw_subsection: "integration-tests"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Per-asset isolation of simulators, detector state and alerts."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use pumpwatch_detect::{pipeline, AlertAggregator, DetectionEngine, DetectorConfig};
use pumpwatch_msg::{InMemoryTransport, MessageBus, Payload, SignalKind, TopicKind};
use chrono::Utc;
use pumpwatch_sim::{
    ExecutorSettings, ExecutorState, ScenarioDefinition, ScenarioExecutor, SimulationRegistry,
};
use serde_json::json;
use tokio::sync::watch;

fn scenario(asset: &str, faults: serde_json::Value) -> anyhow::Result<ScenarioDefinition> {
    Ok(ScenarioDefinition::from_value(json!({
        "name": format!("{asset}-run"),
        "asset_id": asset,
        "seed": 12345,
        "duration_sec": 60,
        "start_ts": "2024-05-01T00:00:00Z",
        "faults": faults,
    }))?)
}

#[tokio::test(start_paused = true)]
async fn faults_and_resets_stay_with_their_asset() -> anyhow::Result<()> {
    let memory = Arc::new(InMemoryTransport::new());
    let feed = memory.subscribe(&[TopicKind::Telemetry, TopicKind::Control]);
    let mut alerts = memory.subscribe(&[TopicKind::Alerts]);
    let mut bus = MessageBus::new();
    bus.register_transport(memory);
    let bus = Arc::new(bus);

    let aggregator = Arc::new(AlertAggregator::default().with_bus(bus.clone()));
    let engine = DetectionEngine::new(DetectorConfig::default(), aggregator);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let detection = pipeline::spawn(engine, feed, shutdown_rx);

    let registry = SimulationRegistry::new(bus.clone(), ExecutorSettings::default());
    registry.load(scenario("pump01", json!([]))?).await?;
    registry
        .load(scenario(
            "pump02",
            json!([{"type": "clogging", "start_time_sec": 5, "params": {"resistance_factor": 3.5}}]),
        )?)
        .await?;
    registry.start("pump01").await?;
    registry.start("pump02").await?;

    tokio::time::sleep(Duration::from_secs(65)).await;
    for status in registry.status(None)? {
        assert_eq!(status.state, ExecutorState::Completed, "{}", status.asset_id);
        assert_eq!(status.samples_emitted, 60);
    }
    registry.reset("pump01").await?;

    shutdown_tx.send(true)?;
    let (engine, report) = detection.await?;
    assert_eq!(report.samples, 120);
    assert_eq!(report.resets, 1);

    let alerted: Vec<String> = alerts
        .drain()
        .into_iter()
        .filter_map(|m| match m.payload {
            Payload::Alert(event) => Some(event.asset_id),
            _ => None,
        })
        .collect();
    assert!(!alerted.is_empty());
    assert!(alerted.iter().all(|asset| asset == "pump02"));

    assert!(engine.buffer().window("pump01", SignalKind::FlowM3h).is_none());
    assert!(engine.buffer().window("pump02", SignalKind::FlowM3h).is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restarting_one_asset_leaves_the_other_stream_untouched() -> anyhow::Result<()> {
    let memory = Arc::new(InMemoryTransport::new());
    let mut telemetry = memory.subscribe(&[TopicKind::Telemetry]);
    let mut bus = MessageBus::new();
    bus.register_transport(memory);
    let registry = SimulationRegistry::new(Arc::new(bus), ExecutorSettings::default());

    let clogged = scenario(
        "pump02",
        json!([{"type": "clogging", "start_time_sec": 5, "params": {"resistance_factor": 3.5}}]),
    )?;
    registry.load(scenario("pump01", json!([]))?).await?;
    registry.load(clogged.clone()).await?;
    registry.start("pump01").await?;
    registry.start("pump02").await?;

    tokio::time::sleep(Duration::from_secs(12)).await;
    registry.stop("pump01").await?;
    registry.reset("pump01").await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    registry.start("pump01").await?;
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert_eq!(
        registry.status(Some("pump02"))?[0].state,
        ExecutorState::Completed
    );

    let streamed = telemetry
        .drain()
        .into_iter()
        .filter_map(|m| match m.payload {
            Payload::Telemetry(sample) if sample.asset_id == "pump02" => Some(sample),
            _ => None,
        })
        .map(|sample| serde_json::to_string(&sample))
        .collect::<Result<Vec<_>, _>>()?;
    let solo = ScenarioExecutor::new(clogged, ExecutorSettings::default())
        .run_to_end(Utc::now())?
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(streamed.len(), 60);
    assert_eq!(streamed, solo);

    registry.stop_all().await;
    Ok(())
}
