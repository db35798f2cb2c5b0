//! ---
//! pw_section: "12-detection"
//! pw_subsection: "11-evaluation"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Scores alerts against simulator ground truth."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pumpwatch_common::time::{offset_secs, seconds_between};
use pumpwatch_msg::{AlertEvent, FaultLabel, TelemetrySample};
use serde::Serialize;

/// A maximal run of samples with a fault asserted in ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub asset_id: String,
    /// Label of the first sample of the run.
    pub fault: FaultLabel,
    pub start: DateTime<Utc>,
    /// Timestamp of the last faulty sample.
    pub end: DateTime<Utc>,
    pub first_alert: Option<DateTime<Utc>>,
    pub latency_sec: Option<f64>,
}

impl Episode {
    fn covers(&self, ts: DateTime<Utc>, grace_sec: f64) -> bool {
        ts >= self.start && ts <= offset_secs(self.end, grace_sec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetEvaluation {
    pub asset_id: String,
    pub samples: usize,
    pub episodes: usize,
    pub detected_episodes: usize,
    pub alerts: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    /// `None` when the asset raised no alerts.
    pub precision: Option<f64>,
    /// `None` when the asset had no fault episodes.
    pub recall: Option<f64>,
    pub mean_latency_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub grace_sec: f64,
    pub assets: Vec<AssetEvaluation>,
    pub episodes: Vec<Episode>,
}

impl EvaluationReport {
    pub fn asset(&self, asset_id: &str) -> Option<&AssetEvaluation> {
        self.assets.iter().find(|a| a.asset_id == asset_id)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

fn stats_for<'a>(
    per_asset: &'a mut BTreeMap<String, AssetEvaluation>,
    asset: &str,
) -> &'a mut AssetEvaluation {
    per_asset
        .entry(asset.to_owned())
        .or_insert_with(|| AssetEvaluation {
            asset_id: asset.to_owned(),
            samples: 0,
            episodes: 0,
            detected_episodes: 0,
            alerts: 0,
            true_positives: 0,
            false_positives: 0,
            precision: None,
            recall: None,
            mean_latency_sec: None,
        })
}

/// Split each asset's samples into fault episodes.
pub fn episodes(samples: &[TelemetrySample]) -> Vec<Episode> {
    let mut open: BTreeMap<&str, Episode> = BTreeMap::new();
    let mut closed = Vec::new();
    for sample in samples {
        let asset = sample.asset_id.as_str();
        if sample.truth.is_faulty() {
            open.entry(asset)
                .and_modify(|e| e.end = sample.ts)
                .or_insert_with(|| Episode {
                    asset_id: sample.asset_id.clone(),
                    fault: sample.truth.fault,
                    start: sample.ts,
                    end: sample.ts,
                    first_alert: None,
                    latency_sec: None,
                });
        } else if let Some(episode) = open.remove(asset) {
            closed.push(episode);
        }
    }
    closed.extend(open.into_values());
    closed.sort_by(|a, b| (&a.asset_id, a.start).cmp(&(&b.asset_id, b.start)));
    closed
}

/// Compare emitted alerts with the ground truth carried by `samples`.
///
/// An alert is a true positive when it falls inside a fault episode whose
/// end is extended by `grace`. The latency of an episode is the delay to
/// its first matching alert.
pub fn evaluate(
    samples: &[TelemetrySample],
    alerts: &[AlertEvent],
    grace: Duration,
) -> EvaluationReport {
    let grace_sec = grace.as_secs_f64();
    let mut episodes = episodes(samples);

    let mut per_asset: BTreeMap<String, AssetEvaluation> = BTreeMap::new();
    for sample in samples {
        stats_for(&mut per_asset, &sample.asset_id).samples += 1;
    }

    let mut ordered: Vec<&AlertEvent> = alerts.iter().collect();
    ordered.sort_by_key(|a| a.ts);
    for alert in ordered {
        let hit = episodes
            .iter_mut()
            .find(|e| e.asset_id == alert.asset_id && e.covers(alert.ts, grace_sec));
        let stats = stats_for(&mut per_asset, &alert.asset_id);
        stats.alerts += 1;
        match hit {
            Some(episode) => {
                stats.true_positives += 1;
                if episode.first_alert.is_none() {
                    episode.first_alert = Some(alert.ts);
                    episode.latency_sec = Some(seconds_between(episode.start, alert.ts));
                }
            }
            None => stats.false_positives += 1,
        }
    }

    for episode in &episodes {
        let stats = stats_for(&mut per_asset, &episode.asset_id);
        stats.episodes += 1;
        if episode.first_alert.is_some() {
            stats.detected_episodes += 1;
        }
    }

    let mut assets: Vec<AssetEvaluation> = per_asset.into_values().collect();
    for stats in &mut assets {
        stats.precision = ratio(stats.true_positives, stats.alerts);
        stats.recall = ratio(stats.detected_episodes, stats.episodes);
        let latencies: Vec<f64> = episodes
            .iter()
            .filter(|e| e.asset_id == stats.asset_id)
            .filter_map(|e| e.latency_sec)
            .collect();
        stats.mean_latency_sec =
            (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);
    }

    EvaluationReport {
        grace_sec,
        assets,
        episodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pumpwatch_msg::{GroundTruth, Severity, SignalReadings};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_521_600 + secs, 0).unwrap()
    }

    fn sample(secs: i64, fault: FaultLabel) -> TelemetrySample {
        TelemetrySample {
            ts: at(secs),
            plant_id: "plant01".into(),
            asset_id: "pump01".into(),
            signals: SignalReadings::default(),
            truth: GroundTruth {
                fault,
                severity: if fault == FaultLabel::None { 0.0 } else { 1.0 },
            },
            warnings: Vec::new(),
        }
    }

    fn alert(secs: i64) -> AlertEvent {
        AlertEvent {
            ts: at(secs),
            plant_id: "plant01".into(),
            asset_id: "pump01".into(),
            severity: Severity::Warning,
            alerts: Vec::new(),
            alert_id: None,
        }
    }

    fn timeline() -> Vec<TelemetrySample> {
        (0..200)
            .map(|s| {
                let fault = match s {
                    10..=49 => FaultLabel::Clogging,
                    120..=129 => FaultLabel::NoiseBurst,
                    _ => FaultLabel::None,
                };
                sample(s, fault)
            })
            .collect()
    }

    #[test]
    fn episodes_are_maximal_faulty_runs() {
        let eps = episodes(&timeline());
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].fault, FaultLabel::Clogging);
        assert_eq!((eps[0].start, eps[0].end), (at(10), at(49)));
        assert_eq!(eps[1].start, at(120));
    }

    #[test]
    fn scores_precision_recall_and_latency() {
        let alerts = vec![alert(20), alert(70), alert(100), alert(5)];
        let report = evaluate(&timeline(), &alerts, Duration::from_secs(30));
        let stats = report.asset("pump01").unwrap();
        assert_eq!(stats.samples, 200);
        assert_eq!(stats.alerts, 4);
        // 20 is inside, 70 is within grace of the end at 49, 5 and 100 are not.
        assert_eq!(stats.true_positives, 2);
        assert_eq!(stats.false_positives, 2);
        assert_eq!(stats.precision, Some(0.5));
        assert_eq!(stats.recall, Some(0.5));
        assert_eq!(stats.mean_latency_sec, Some(10.0));
        assert_eq!(report.episodes[0].latency_sec, Some(10.0));
        assert_eq!(report.episodes[1].first_alert, None);
    }

    #[test]
    fn healthy_run_without_alerts_has_no_ratios() {
        let samples: Vec<_> = (0..60).map(|s| sample(s, FaultLabel::None)).collect();
        let report = evaluate(&samples, &[], Duration::from_secs(60));
        let stats = report.asset("pump01").unwrap();
        assert_eq!(stats.episodes, 0);
        assert_eq!(stats.precision, None);
        assert_eq!(stats.recall, None);
        assert!(report.episodes.is_empty());
    }
}
