//! ---
//! pw_section: "12-detection"
//! pw_subsection: "04-hysteresis"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Per-condition breach state machine with duration and recovery hysteresis."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use pumpwatch_msg::{AlertDetail, Severity};

/// A condition that just entered `Breached` or changed level inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    /// Cooldown key: the signal name, or the combination rule name.
    pub key: String,
    pub severity: Severity,
    pub detail: AlertDetail,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertState {
    Normal,
    /// Breaching since `since` but not yet for long enough.
    Pending { since: f64, level: Severity },
    Breached {
        level: Severity,
        since: f64,
        /// A different level waiting to be held for the minimum duration.
        candidate: Option<(Severity, f64)>,
    },
    /// Back within bounds since `since`, waiting out the recovery delay.
    /// `breached_since` is kept so a re-breach resumes the original breach.
    Recovering {
        level: Severity,
        since: f64,
        breached_since: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered(Severity),
    LevelChanged { from: Severity, to: Severity },
    Recovered,
}

impl Transition {
    /// Severity to alert at, for transitions that alert.
    pub fn alert_level(self) -> Option<Severity> {
        match self {
            Transition::Entered(level) => Some(level),
            Transition::LevelChanged { to, .. } => Some(to),
            Transition::Recovered => None,
        }
    }
}

/// `Normal -> Pending -> Breached -> (Recovering) -> Normal`.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    min_duration_sec: f64,
    recovery_sec: f64,
    state: AlertState,
}

impl Hysteresis {
    pub fn new(min_duration_sec: f64, recovery_sec: f64) -> Self {
        Self {
            min_duration_sec,
            recovery_sec,
            state: AlertState::Normal,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Seconds the current breach has been held at `t`, zero when normal.
    pub fn held_sec(&self, t: f64) -> f64 {
        match self.state {
            AlertState::Normal => 0.0,
            AlertState::Pending { since, .. } | AlertState::Breached { since, .. } => t - since,
            AlertState::Recovering { breached_since, .. } => t - breached_since,
        }
    }

    pub fn reset(&mut self) {
        self.state = AlertState::Normal;
    }

    /// Feed the condition level observed at `t`.
    pub fn update(&mut self, t: f64, observed: Option<Severity>) -> Option<Transition> {
        let (next, transition) = match (self.state, observed) {
            (AlertState::Normal, None) => (AlertState::Normal, None),
            (AlertState::Normal, Some(level)) => self.pending(t, t, level),
            (AlertState::Pending { .. }, None) => (AlertState::Normal, None),
            (AlertState::Pending { since, .. }, Some(level)) => self.pending(since, t, level),
            (
                AlertState::Breached {
                    level,
                    since,
                    candidate,
                },
                Some(observed),
            ) => self.breached(level, since, candidate, t, observed),
            (AlertState::Breached { level, since, .. }, None) => {
                if self.recovery_sec > 0.0 {
                    let state = AlertState::Recovering {
                        level,
                        since: t,
                        breached_since: since,
                    };
                    (state, None)
                } else {
                    (AlertState::Normal, Some(Transition::Recovered))
                }
            }
            (
                AlertState::Recovering {
                    level,
                    since,
                    breached_since,
                },
                None,
            ) => {
                if t - since >= self.recovery_sec {
                    (AlertState::Normal, Some(Transition::Recovered))
                } else {
                    let state = AlertState::Recovering {
                        level,
                        since,
                        breached_since,
                    };
                    (state, None)
                }
            }
            (
                AlertState::Recovering {
                    level,
                    breached_since,
                    ..
                },
                Some(observed),
            ) => self.breached(level, breached_since, None, t, observed),
        };
        self.state = next;
        transition
    }

    fn pending(&self, since: f64, t: f64, level: Severity) -> (AlertState, Option<Transition>) {
        if t - since >= self.min_duration_sec {
            (
                AlertState::Breached {
                    level,
                    since,
                    candidate: None,
                },
                Some(Transition::Entered(level)),
            )
        } else {
            (AlertState::Pending { since, level }, None)
        }
    }

    fn breached(
        &self,
        level: Severity,
        since: f64,
        candidate: Option<(Severity, f64)>,
        t: f64,
        observed: Severity,
    ) -> (AlertState, Option<Transition>) {
        if observed == level {
            let state = AlertState::Breached {
                level,
                since,
                candidate: None,
            };
            return (state, None);
        }
        let cand_since = match candidate {
            Some((cand, cand_since)) if cand == observed => cand_since,
            _ => t,
        };
        if t - cand_since >= self.min_duration_sec {
            let state = AlertState::Breached {
                level: observed,
                since,
                candidate: None,
            };
            (
                state,
                Some(Transition::LevelChanged {
                    from: level,
                    to: observed,
                }),
            )
        } else {
            let state = AlertState::Breached {
                level,
                since,
                candidate: Some((observed, cand_since)),
            };
            (state, None)
        }
    }
}
