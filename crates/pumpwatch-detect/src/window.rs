//! ---
//! pw_section: "12-detection"
//! pw_subsection: "03-windows"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Time-bounded sliding windows with O(1) mean, std and slope."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};

use pumpwatch_msg::SignalKind;

/// Inserts between exact recomputations of the running sums.
const RESYNC_EVERY: u32 = 1024;

/// Samples from the last `span_sec` seconds of one signal.
///
/// Running sums are kept relative to `origin` so that epoch-sized
/// timestamps do not swamp the slope computation.
#[derive(Debug, Clone)]
pub struct Window {
    span_sec: f64,
    samples: VecDeque<(f64, f64)>,
    origin: f64,
    sum_y: f64,
    sum_y2: f64,
    sum_t: f64,
    sum_t2: f64,
    sum_ty: f64,
    inserts: u32,
}

impl Window {
    pub fn new(span_sec: f64) -> Self {
        Self {
            span_sec,
            samples: VecDeque::new(),
            origin: 0.0,
            sum_y: 0.0,
            sum_y2: 0.0,
            sum_t: 0.0,
            sum_t2: 0.0,
            sum_ty: 0.0,
            inserts: 0,
        }
    }

    pub fn span_sec(&self) -> f64 {
        self.span_sec
    }

    /// Insert `(t, y)` and evict everything at or before `t - span`.
    ///
    /// A timestamp older than the newest sample clears the window first.
    pub fn push(&mut self, t: f64, y: f64) {
        if self.samples.back().is_some_and(|&(last, _)| t < last) {
            self.clear();
        }
        if self.samples.is_empty() {
            self.origin = t;
        }
        self.add(t, y);
        let cutoff = t - self.span_sec;
        while let Some(&(old_t, old_y)) = self.samples.front() {
            if old_t > cutoff {
                break;
            }
            self.samples.pop_front();
            self.remove(old_t, old_y);
        }

        self.inserts += 1;
        if self.inserts >= RESYNC_EVERY {
            self.resync();
        }
    }

    fn add(&mut self, t: f64, y: f64) {
        let x = t - self.origin;
        self.samples.push_back((t, y));
        self.sum_y += y;
        self.sum_y2 += y * y;
        self.sum_t += x;
        self.sum_t2 += x * x;
        self.sum_ty += x * y;
    }

    fn remove(&mut self, t: f64, y: f64) {
        let x = t - self.origin;
        self.sum_y -= y;
        self.sum_y2 -= y * y;
        self.sum_t -= x;
        self.sum_t2 -= x * x;
        self.sum_ty -= x * y;
    }

    /// Rebase on the oldest sample and rebuild the sums exactly.
    fn resync(&mut self) {
        self.inserts = 0;
        self.origin = self.samples.front().map_or(0.0, |&(t, _)| t);
        self.sum_y = 0.0;
        self.sum_y2 = 0.0;
        self.sum_t = 0.0;
        self.sum_t2 = 0.0;
        self.sum_ty = 0.0;
        for &(t, y) in &self.samples {
            let x = t - self.origin;
            self.sum_y += y;
            self.sum_y2 += y * y;
            self.sum_t += x;
            self.sum_t2 += x * x;
            self.sum_ty += x * y;
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum_y = 0.0;
        self.sum_y2 = 0.0;
        self.sum_t = 0.0;
        self.sum_t2 = 0.0;
        self.sum_ty = 0.0;
        self.inserts = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<(f64, f64)> {
        self.samples.front().copied()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.samples.back().copied()
    }

    /// Seconds between the oldest and newest sample.
    pub fn covered_sec(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some((a, _)), Some((b, _))) => b - a,
            _ => 0.0,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.sum_y / self.samples.len() as f64)
    }

    /// Sample standard deviation; zero with fewer than two samples.
    pub fn std(&self) -> Option<f64> {
        let n = self.samples.len() as f64;
        if n == 0.0 {
            return None;
        }
        if n < 2.0 {
            return Some(0.0);
        }
        let var = (self.sum_y2 - self.sum_y * self.sum_y / n) / (n - 1.0);
        Some(var.max(0.0).sqrt())
    }

    /// Least-squares slope in units per second.
    pub fn slope(&self) -> Option<f64> {
        let n = self.samples.len() as f64;
        if n < 2.0 {
            return None;
        }
        let denom = n * self.sum_t2 - self.sum_t * self.sum_t;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        Some((n * self.sum_ty - self.sum_t * self.sum_y) / denom)
    }
}

/// Sliding windows for every (asset, signal) pair.
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    spans: [f64; SignalKind::COUNT],
    windows: HashMap<(String, SignalKind), Window>,
}

impl TelemetryBuffer {
    /// `span_for` gives the window length of each signal.
    pub fn new(span_for: impl Fn(SignalKind) -> f64) -> Self {
        let mut spans = [0.0; SignalKind::COUNT];
        for kind in SignalKind::ALL {
            spans[kind.index()] = span_for(kind);
        }
        Self {
            spans,
            windows: HashMap::new(),
        }
    }

    /// Add one reading at `t` seconds and return the updated window.
    pub fn ingest(&mut self, asset_id: &str, signal: SignalKind, value: f64, t: f64) -> &Window {
        let span = self.spans[signal.index()];
        let window = self
            .windows
            .entry((asset_id.to_owned(), signal))
            .or_insert_with(|| Window::new(span));
        window.push(t, value);
        window
    }

    pub fn window(&self, asset_id: &str, signal: SignalKind) -> Option<&Window> {
        self.windows.get(&(asset_id.to_owned(), signal))
    }

    /// Drop every window of `asset_id`.
    pub fn reset_asset(&mut self, asset_id: &str) {
        self.windows.retain(|(asset, _), _| asset != asset_id);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
