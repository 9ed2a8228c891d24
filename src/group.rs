//! Group coordinator: picks the one unit a group of conditions is judged
//! against and runs the optional dwell timer.
//!
//! ```text
//! NoCandidate ──select──▶ Tracking(u) ──all complete──▶ Waiting(u, deadline)
//!      ▲                      ▲   │                         │        │
//!      └──── no winner ───────┘   └── duration == 0 ──▶ Done(u) ◀── deadline
//!                                 ◀────────── regression ──────┘
//! ```
//!
//! Winner selection is a pure function ([`select_winner`]) so its
//! tie-breaking order can be tested without a tree.

use serde::{Deserialize, Serialize};

use crate::state::{ParameterState, Timestamp};
use crate::unit::UnitId;

/// Coordinator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TrackingPhase {
    /// No unit is being tracked.
    #[default]
    NoCandidate,
    /// Tracking a unit that does not satisfy every child yet.
    Tracking {
        /// Tracked unit.
        unit: UnitId,
    },
    /// Every child is complete; waiting for the dwell deadline.
    Waiting {
        /// Tracked unit.
        unit: UnitId,
        /// Time at which the group completes.
        deadline: Timestamp,
    },
    /// Dwell elapsed with every child still complete.
    Done {
        /// Tracked unit.
        unit: UnitId,
    },
}

impl TrackingPhase {
    /// Tracked unit, if any.
    #[must_use]
    pub const fn unit(&self) -> Option<UnitId> {
        match self {
            Self::NoCandidate => None,
            Self::Tracking { unit } | Self::Waiting { unit, .. } | Self::Done { unit } => {
                Some(*unit)
            }
        }
    }

    /// Returns the snake-case name used in logs and save documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoCandidate => "no_candidate",
            Self::Tracking { .. } => "tracking",
            Self::Waiting { .. } => "waiting",
            Self::Done { .. } => "done",
        }
    }
}

/// Selection and dwell state of one group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coordinator {
    define: Option<String>,
    allowed: Vec<String>,
    exclusive: bool,
    duration: f64,
    phase: TrackingPhase,
}

impl Coordinator {
    /// Creates a coordinator with a dwell of `duration` seconds.
    #[must_use]
    pub const fn new(duration: f64) -> Self {
        Self {
            define: None,
            allowed: Vec::new(),
            exclusive: false,
            duration,
            phase: TrackingPhase::NoCandidate,
        }
    }

    /// Builder: names the winning unit on completion.
    #[must_use]
    pub fn with_define(mut self, name: impl Into<String>) -> Self {
        self.define = Some(name.into());
        self
    }

    /// Builder: restricts candidates to the named units.
    #[must_use]
    pub fn with_allowed(mut self, names: Vec<String>) -> Self {
        self.allowed = names;
        self
    }

    /// Builder: claims the tracked unit so other groups skip it.
    #[must_use]
    pub const fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Name the winner is associated with.
    #[must_use]
    pub fn define(&self) -> Option<&str> {
        self.define.as_deref()
    }

    /// Allow-list of unit names.
    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Whether the tracked unit is claimed exclusively.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Dwell duration in seconds.
    #[must_use]
    pub const fn duration(&self) -> f64 {
        self.duration
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> TrackingPhase {
        self.phase
    }

    /// Currently tracked unit.
    #[must_use]
    pub const fn tracked(&self) -> Option<UnitId> {
        self.phase.unit()
    }

    /// Restores a persisted phase.
    pub const fn restore_phase(&mut self, phase: TrackingPhase) {
        self.phase = phase;
    }

    /// Seconds left before the dwell elapses.
    #[must_use]
    pub fn remaining(&self, now: Timestamp) -> Option<f64> {
        match self.phase {
            TrackingPhase::Waiting { deadline, .. } => Some((deadline - now).max(0.0)),
            _ => None,
        }
    }

    /// Moves the state machine for the selected unit. Returns `true` if the
    /// phase changed.
    ///
    /// A wait for the same unit keeps its original deadline; a regression
    /// abandons it and the next qualifying transition re-arms a fresh one.
    pub fn advance(&mut self, unit: Option<UnitId>, all_complete: bool, now: Timestamp) -> bool {
        let next = match unit {
            None => TrackingPhase::NoCandidate,
            Some(unit) if !all_complete => TrackingPhase::Tracking { unit },
            Some(unit) if self.duration <= 0.0 => TrackingPhase::Done { unit },
            Some(unit) => match self.phase {
                TrackingPhase::Waiting {
                    unit: waiting,
                    deadline,
                } if waiting == unit => {
                    if now >= deadline {
                        TrackingPhase::Done { unit }
                    } else {
                        self.phase
                    }
                }
                TrackingPhase::Done { unit: done } if done == unit => self.phase,
                _ => TrackingPhase::Waiting {
                    unit,
                    deadline: now + self.duration,
                },
            },
        };
        let changed = next != self.phase;
        self.phase = next;
        changed
    }

    /// State the group node reports, given its children.
    #[must_use]
    pub fn node_state(&self, children: &[ParameterState]) -> ParameterState {
        if matches!(self.phase, TrackingPhase::Done { .. }) {
            ParameterState::Complete
        } else if children.iter().any(|s| s.is_failed()) {
            ParameterState::Failed
        } else {
            ParameterState::Incomplete
        }
    }
}

// ============================================================================
// Winner Selection
// ============================================================================

/// How a winner was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Previously tracked unit still satisfies every child.
    Kept(UnitId),
    /// First completing candidate that satisfies every child.
    Found(UnitId),
    /// Fallback to the host's focused unit.
    Focused(UnitId),
    /// Nothing eligible.
    None,
}

impl Selection {
    /// Selected unit.
    #[must_use]
    pub const fn unit(self) -> Option<UnitId> {
        match self {
            Self::Kept(u) | Self::Found(u) | Self::Focused(u) => Some(u),
            Self::None => None,
        }
    }
}

/// Picks the unit a group tracks.
///
/// Order: keep `tracked` if it still qualifies, else the first qualifying
/// entry of `candidates`, else `focused` if eligible, else nothing.
pub fn select_winner<I, E, S>(
    tracked: Option<UnitId>,
    candidates: I,
    focused: Option<UnitId>,
    eligible: E,
    satisfies: S,
) -> Selection
where
    I: IntoIterator<Item = UnitId>,
    E: Fn(UnitId) -> bool,
    S: Fn(UnitId) -> bool,
{
    if let Some(unit) = tracked
        && eligible(unit)
        && satisfies(unit)
    {
        return Selection::Kept(unit);
    }
    if let Some(unit) = candidates
        .into_iter()
        .find(|u| Some(*u) != tracked && eligible(*u) && satisfies(*u))
    {
        return Selection::Found(unit);
    }
    match focused {
        Some(unit) if eligible(unit) => Selection::Focused(unit),
        _ => Selection::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> UnitId {
        UnitId(uuid::Uuid::from_u128(n))
    }

    #[test]
    fn test_keeps_tracked_unit() {
        let tracked = Some(id(1));
        for _ in 0..3 {
            let pick = select_winner(tracked, [id(2), id(1)], None, |_| true, |_| true);
            assert_eq!(pick, Selection::Kept(id(1)));
        }
    }

    #[test]
    fn test_first_candidate_wins() {
        let pick = select_winner(None, [id(3), id(2)], Some(id(9)), |_| true, |_| true);
        assert_eq!(pick, Selection::Found(id(3)));
    }

    #[test]
    fn test_candidates_must_satisfy() {
        let pick = select_winner(
            Some(id(1)),
            [id(1), id(2), id(3)],
            None,
            |_| true,
            |u| u == id(3),
        );
        assert_eq!(pick, Selection::Found(id(3)));
    }

    #[test]
    fn test_focus_fallback_needs_eligibility() {
        let pick = select_winner(None, [], Some(id(5)), |_| true, |_| false);
        assert_eq!(pick, Selection::Focused(id(5)));
        let pick = select_winner(None, [], Some(id(5)), |u| u != id(5), |_| true);
        assert_eq!(pick, Selection::None);
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let mut group = Coordinator::new(0.0);
        assert!(group.advance(Some(id(1)), true, 0.0));
        assert_eq!(group.phase(), TrackingPhase::Done { unit: id(1) });
    }

    #[test]
    fn test_dwell_reaches_done_at_deadline() {
        let mut group = Coordinator::new(60.0);
        group.advance(Some(id(1)), true, 0.0);
        assert_eq!(
            group.phase(),
            TrackingPhase::Waiting {
                unit: id(1),
                deadline: 60.0
            }
        );
        assert!(!group.advance(Some(id(1)), true, 30.0));
        assert_eq!(group.remaining(30.0), Some(30.0));
        assert!(group.advance(Some(id(1)), true, 60.0));
        assert_eq!(group.phase(), TrackingPhase::Done { unit: id(1) });
    }

    #[test]
    fn test_regression_abandons_wait() {
        let mut group = Coordinator::new(60.0);
        group.advance(Some(id(1)), true, 0.0);
        group.advance(Some(id(1)), false, 59.0);
        assert_eq!(group.phase(), TrackingPhase::Tracking { unit: id(1) });
        group.advance(Some(id(1)), false, 60.0);
        assert_eq!(group.phase(), TrackingPhase::Tracking { unit: id(1) });
        // Re-arming starts a fresh wait
        group.advance(Some(id(1)), true, 61.0);
        assert_eq!(group.remaining(61.0), Some(60.0));
    }

    #[test]
    fn test_switching_unit_restarts_wait() {
        let mut group = Coordinator::new(10.0);
        group.advance(Some(id(1)), true, 0.0);
        group.advance(Some(id(2)), true, 5.0);
        assert_eq!(
            group.phase(),
            TrackingPhase::Waiting {
                unit: id(2),
                deadline: 15.0
            }
        );
    }

    #[test]
    fn test_node_state() {
        let mut group = Coordinator::new(0.0);
        assert_eq!(
            group.node_state(&[ParameterState::Complete]),
            ParameterState::Incomplete
        );
        assert_eq!(
            group.node_state(&[ParameterState::Failed]),
            ParameterState::Failed
        );
        group.advance(Some(id(1)), true, 0.0);
        assert_eq!(
            group.node_state(&[ParameterState::Complete]),
            ParameterState::Complete
        );
    }
}
