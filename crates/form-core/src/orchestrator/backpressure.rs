//! Graduated back-pressure over the result buffer (spec.md §4.2.4).

use std::time::Duration;

use crate::utils::logger::log_backpressure_transition;

pub const L1_THRESHOLD: f64 = 0.8;
pub const L2_THRESHOLD: f64 = 0.9;
pub const L3_THRESHOLD: f64 = 0.95;
pub const L4_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    None,
    L1,
    L2,
    L3,
    L4,
}

pub fn level_for(buffer_len: usize, max_buffer_size: usize) -> BackpressureLevel {
    let utilization = buffer_len as f64 / max_buffer_size.max(1) as f64;
    if utilization >= L4_THRESHOLD {
        BackpressureLevel::L4
    } else if utilization >= L3_THRESHOLD {
        BackpressureLevel::L3
    } else if utilization >= L2_THRESHOLD {
        BackpressureLevel::L2
    } else if utilization >= L1_THRESHOLD {
        BackpressureLevel::L1
    } else {
        BackpressureLevel::None
    }
}

/// What the caller should do before accepting the next item, given the
/// current buffer utilization (spec.md §4.2.4). Each variant is logged
/// exactly once per transition by the caller (spec.md §9 "every
/// back-pressure level transition is logged once").
pub enum BackpressureAction {
    Accept,
    PartialFlush { fraction: f64, max_items: usize },
    PartialFlushThenSleep { fraction: f64, max_items: usize, sleep: Duration },
    ForcedFlushes { attempts: u32, spacing: Duration },
    Overflow,
}

pub fn action_for(level: BackpressureLevel) -> BackpressureAction {
    match level {
        BackpressureLevel::None => BackpressureAction::Accept,
        BackpressureLevel::L1 => BackpressureAction::PartialFlush { fraction: 0.3, max_items: 50 },
        BackpressureLevel::L2 => BackpressureAction::PartialFlushThenSleep {
            fraction: 0.3,
            max_items: 50,
            sleep: Duration::from_millis(100),
        },
        BackpressureLevel::L3 => BackpressureAction::ForcedFlushes {
            attempts: 3,
            spacing: Duration::from_millis(500),
        },
        BackpressureLevel::L4 => BackpressureAction::Overflow,
    }
}

/// Logs a level transition once, tracking the previously-logged level
/// so repeated polls at the same level don't spam.
pub struct BackpressureTracker {
    last_logged: BackpressureLevel,
}

impl Default for BackpressureTracker {
    fn default() -> Self {
        Self { last_logged: BackpressureLevel::None }
    }
}

impl BackpressureTracker {
    pub fn observe(&mut self, execution_id: &str, buffer_len: usize, max_buffer_size: usize) -> BackpressureLevel {
        let level = level_for(buffer_len, max_buffer_size);
        if level != self.last_logged {
            let utilization = buffer_len as f64 / max_buffer_size.max(1) as f64;
            log_backpressure_transition(execution_id, &format!("{level:?}"), utilization);
            self.last_logged = level;
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p4_buffer_never_exceeds_double_max_before_emergency_flush() {
        // At or above L4, the action is always Overflow, which the
        // caller routes to the overflow buffer rather than accepting
        // further unbounded growth in memory.
        let level = level_for(100, 100);
        assert_eq!(level, BackpressureLevel::L4);
        assert!(matches!(action_for(level), BackpressureAction::Overflow));
    }

    #[test]
    fn thresholds_are_ordered_correctly() {
        assert_eq!(level_for(79, 100), BackpressureLevel::None);
        assert_eq!(level_for(80, 100), BackpressureLevel::L1);
        assert_eq!(level_for(90, 100), BackpressureLevel::L2);
        assert_eq!(level_for(95, 100), BackpressureLevel::L3);
    }

    #[test]
    fn tracker_only_logs_on_transition() {
        let mut tracker = BackpressureTracker::default();
        assert_eq!(tracker.observe("exec-1", 10, 100), BackpressureLevel::None);
        assert_eq!(tracker.observe("exec-1", 20, 100), BackpressureLevel::None);
        assert_eq!(tracker.observe("exec-1", 85, 100), BackpressureLevel::L1);
    }
}
