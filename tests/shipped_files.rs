//! ---
//! pw_section: "15-testing-qa-runbook"
//! pw_subsection: "integration-tests"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Shipped configuration, rules and scenario documents stay loadable."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pumpwatch_common::config::AppConfig;
use pumpwatch_detect::{DetectorConfig, ManualAlert};
use pumpwatch_msg::{DetectionMethod, Severity};
use pumpwatch_sim::ScenarioDefinition;

fn path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

fn read(relative: &str) -> String {
    let full = path(relative);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn daemon_config_parses_and_points_at_shipped_files() {
    let config = AppConfig::from_str(&read("configs/pumpwatch.toml")).unwrap();
    config.validate().unwrap();
    let rules = config.detection.rules_path.expect("rules path");
    assert!(path(&rules.to_string_lossy()).is_file());
    assert!(!config.simulation.scenario_files.is_empty());
    for scenario in &config.simulation.scenario_files {
        assert!(
            path(&scenario.to_string_lossy()).is_file(),
            "missing autoload scenario {}",
            scenario.display()
        );
    }
}

#[test]
fn detector_rules_match_builtin_defaults() {
    let shipped = DetectorConfig::from_path(&path("configs/detector.toml")).unwrap();
    assert_eq!(shipped, DetectorConfig::default());
}

#[test]
fn scenarios_validate_with_distinct_assets() {
    let mut assets = Vec::new();
    for name in ["healthy_baseline", "bearing_wear", "clogging_step"] {
        let definition =
            ScenarioDefinition::from_path(&path(&format!("scenarios/{name}.json"))).unwrap();
        assert_eq!(definition.name, name);
        assets.push(definition.asset_id);
    }
    assets.sort();
    assets.dedup();
    assert_eq!(assets.len(), 3, "autoloaded scenarios must not share an asset");
}

#[test]
fn manual_alert_body_deserializes() {
    let manual: ManualAlert = serde_json::from_str(&read("scenarios/manual_alert.json")).unwrap();
    assert_eq!(manual.severity, Severity::Critical);
    assert_eq!(manual.method, Some(DetectionMethod::Manual));
}
