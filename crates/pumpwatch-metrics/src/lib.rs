//! ---
//! pw_section: "03-persistence-logging"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Metrics collection and export utilities."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Render the registry in the prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    match render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "pumpwatchd_starts_total",
            "Total number of times the pumpwatch daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pumpwatchd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Per-asset simulation loop instrumentation.
#[derive(Clone)]
pub struct SimulationMetrics {
    samples_emitted: IntCounterVec,
    publish_failures: IntCounterVec,
    tick_lateness: Histogram,
    executors_running: IntGauge,
}

impl SimulationMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let samples_emitted = IntCounterVec::new(
            Opts::new(
                "pumpwatch_samples_emitted_total",
                "Telemetry samples produced by scenario executors",
            ),
            &["asset"],
        )?;
        registry.register(Box::new(samples_emitted.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new(
                "pumpwatch_publish_failures_total",
                "Telemetry samples the bus could not deliver to every transport",
            ),
            &["asset"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let tick_lateness = Histogram::with_opts(
            HistogramOpts::new(
                "pumpwatch_tick_lateness_seconds",
                "Delay between a tick deadline and the executor observing it",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_lateness.clone()))?;

        let executors_running = IntGauge::with_opts(Opts::new(
            "pumpwatch_executors_running",
            "Scenario executors currently ticking",
        ))?;
        registry.register(Box::new(executors_running.clone()))?;

        Ok(Self {
            samples_emitted,
            publish_failures,
            tick_lateness,
            executors_running,
        })
    }

    pub fn record_sample(&self, asset: &str) {
        self.samples_emitted.with_label_values(&[asset]).inc();
    }

    pub fn record_publish_failure(&self, asset: &str) {
        self.publish_failures.with_label_values(&[asset]).inc();
    }

    pub fn observe_lateness(&self, lateness: Duration) {
        self.tick_lateness.observe(lateness.as_secs_f64());
    }

    pub fn executor_started(&self) {
        self.executors_running.inc();
    }

    pub fn executor_finished(&self) {
        self.executors_running.dec();
    }
}

/// Message bus delivery counters keyed by topic kind and outcome.
#[derive(Clone)]
pub struct BusMetrics {
    messages: IntCounterVec,
}

impl BusMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let messages = IntCounterVec::new(
            Opts::new(
                "pumpwatch_bus_messages_total",
                "Messages handed to the bus by topic kind and delivery outcome",
            ),
            &["topic_kind", "outcome"],
        )?;
        registry.register(Box::new(messages.clone()))?;
        Ok(Self { messages })
    }

    pub fn record(&self, topic_kind: &str, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.messages.with_label_values(&[topic_kind, outcome]).inc();
    }
}

/// Detection stage counters.
#[derive(Clone)]
pub struct DetectionMetrics {
    samples_processed: IntCounter,
    alerts: IntCounterVec,
    suppressed: IntCounter,
}

impl DetectionMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let samples_processed = IntCounter::with_opts(Opts::new(
            "pumpwatch_detector_samples_total",
            "Telemetry samples evaluated by the detection engine",
        ))?;
        registry.register(Box::new(samples_processed.clone()))?;

        let alerts = IntCounterVec::new(
            Opts::new(
                "pumpwatch_alerts_total",
                "Alert details emitted by severity and method",
            ),
            &["severity", "method"],
        )?;
        registry.register(Box::new(alerts.clone()))?;

        let suppressed = IntCounter::with_opts(Opts::new(
            "pumpwatch_alerts_suppressed_total",
            "Alert details dropped by the per-signal cooldown",
        ))?;
        registry.register(Box::new(suppressed.clone()))?;

        Ok(Self {
            samples_processed,
            alerts,
            suppressed,
        })
    }

    pub fn record_sample(&self) {
        self.samples_processed.inc();
    }

    pub fn record_alert(&self, severity: &str, method: &str) {
        self.alerts.with_label_values(&[severity, method]).inc();
    }

    pub fn record_suppressed(&self) {
        self.suppressed.inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_render_with_labels() {
        let registry = new_registry();
        let sim = SimulationMetrics::new(&registry).unwrap();
        let detect = DetectionMetrics::new(&registry).unwrap();
        sim.record_sample("pump01");
        sim.record_sample("pump01");
        sim.observe_lateness(Duration::from_millis(3));
        detect.record_alert("warning", "threshold");

        let text = render(&registry).unwrap();
        assert!(text.contains("pumpwatch_samples_emitted_total{asset=\"pump01\"} 2"));
        let alert_line = text
            .lines()
            .find(|line| line.starts_with("pumpwatch_alerts_total{"))
            .unwrap();
        assert!(alert_line.contains("method=\"threshold\""));
        assert!(alert_line.ends_with(" 1"));
        assert!(text.contains("pumpwatch_tick_lateness_seconds_count 1"));
    }

    #[test]
    fn double_registration_is_an_error() {
        let registry = new_registry();
        BusMetrics::new(&registry).unwrap();
        assert!(BusMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn http_server_binds_ephemeral_port() {
        let registry = new_registry();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
