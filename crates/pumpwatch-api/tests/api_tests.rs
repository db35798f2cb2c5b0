//! ---
//! pw_section: "15-testing-qa-runbook"
//! pw_subsection: "integration"
//! pw_type: "test"
//! pw_scope: "code"
//! pw_description: "Control surface routes, status codes and manual alerts."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use pumpwatch_api::{router, ApiState};
use pumpwatch_detect::AlertAggregator;
use pumpwatch_msg::{InMemoryTransport, MessageBus, Payload, Subscription, TopicKind};
use pumpwatch_sim::{ExecutorSettings, SimulationRegistry};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, Arc<SimulationRegistry>, Subscription) {
    let memory = Arc::new(InMemoryTransport::new());
    let alerts = memory.subscribe(&[TopicKind::Alerts]);
    let mut bus = MessageBus::new();
    bus.register_transport(memory);
    let bus = Arc::new(bus);
    let registry = Arc::new(SimulationRegistry::new(bus.clone(), ExecutorSettings::default()));
    let aggregator = Arc::new(AlertAggregator::default().with_bus(bus));
    let state = Arc::new(ApiState::new(registry.clone(), aggregator));
    (router(state), registry, alerts)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn scenario() -> Value {
    json!({"name": "healthy", "asset_id": "pump01", "seed": 12345, "duration_sec": 600})
}

#[tokio::test]
async fn health_reports_loaded_assets() {
    let (app, _, _) = app();
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "assets": 0}));
}

#[tokio::test]
async fn scenario_lifecycle_over_http() {
    let (app, registry, _) = app();

    let (status, ack) = call(&app, Method::POST, "/api/scenarios", Some(scenario())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ack["action"], "loaded");

    let (status, ack) = call(&app, Method::POST, "/api/assets/pump01/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["state"], "running");

    let (status, _) = call(&app, Method::POST, "/api/assets/pump01/reset", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, Method::GET, "/api/assets/pump01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["scenario_name"], "healthy");

    let (status, ack) = call(&app, Method::POST, "/api/assets/pump01/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["state"], "stopped");

    let (status, _) = call(&app, Method::POST, "/api/assets/pump01/reset", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/api/assets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    registry.stop_all().await;
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let (app, _, _) = app();

    let invalid = json!({"name": "bad", "seed": 1, "duration_sec": -5});
    let (status, body) = call(&app, Method::POST, "/api/scenarios", Some(invalid)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("duration_sec"));

    let (status, _) = call(&app, Method::POST, "/api/assets/ghost/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::GET, "/api/assets/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_alert_is_published_with_flag() {
    let (app, _, mut alerts) = app();
    let manual = json!({
        "asset_id": "pump01",
        "signal": "vibration_rms",
        "severity": "critical",
        "score": 5.0,
        "method": "manual"
    });
    let (status, ack) = call(&app, Method::POST, "/api/alerts", Some(manual)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["published"], true);
    assert_eq!(ack["severity"], "critical");

    let message = alerts.try_recv().expect("alert on the bus");
    let Payload::Alert(event) = message.payload else {
        panic!("expected alert payload");
    };
    assert_eq!(event.alert_id.map(|id| id.to_string()), ack["alert_id"].as_str().map(str::to_owned));
    assert!(event.alerts[0].evidence.manual_trigger);
    assert_eq!(event.alerts[0].signal, "vibration_rms");
}
