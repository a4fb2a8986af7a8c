use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Source of wall-clock time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Monotonic clock measured from its creation.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy)]
struct Frozen {
    logical: f64,
    since: f64,
}

/// Maps wall-clock readings onto song time:
/// `logical = (now - anchor) * speed - pause_offset`.
///
/// Every mutation recomputes `anchor` so the formula stays the single source
/// of truth. While frozen, reads return the value captured at the pause.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    anchor: f64,
    speed: f64,
    pause_offset: f64,
    frozen: Option<Frozen>,
}

impl LogicalClock {
    pub fn new(now: f64, speed: f64) -> Self {
        Self {
            anchor: now,
            speed,
            pause_offset: 0.0,
            frozen: None,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn logical_time(&self, now: f64) -> f64 {
        match self.frozen {
            Some(frozen) => frozen.logical,
            None => self.live(now),
        }
    }

    fn live(&self, now: f64) -> f64 {
        (now - self.anchor) * self.speed - self.pause_offset
    }

    /// Moves the anchor so the live formula yields `logical` at `at`.
    fn anchor_to(&mut self, at: f64, logical: f64) {
        self.anchor = at - (logical + self.pause_offset) / self.speed;
    }

    /// `speed` must be positive; callers clamp before getting here.
    pub fn set_speed(&mut self, now: f64, speed: f64) {
        let at = self.frozen.map_or(now, |f| f.since);
        let logical = self.logical_time(now);
        self.speed = speed;
        self.anchor_to(at, logical);
    }

    pub fn seek_to(&mut self, now: f64, logical: f64) {
        match &mut self.frozen {
            Some(frozen) => {
                frozen.logical = logical;
                let since = frozen.since;
                self.anchor_to(since, logical);
            }
            None => self.anchor_to(now, logical),
        }
    }

    pub fn freeze(&mut self, now: f64) {
        if self.frozen.is_none() {
            self.frozen = Some(Frozen {
                logical: self.live(now),
                since: now,
            });
        }
    }

    pub fn thaw(&mut self, now: f64) {
        if let Some(frozen) = self.frozen.take() {
            self.pause_offset += (now - frozen.since) * self.speed;
        }
    }

    pub fn restart(&mut self, now: f64) {
        self.anchor = now;
        self.pause_offset = 0.0;
        self.frozen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_runs_at_speed() {
        let clock = LogicalClock::new(10.0, 2.0);
        assert!((clock.logical_time(10.0)).abs() < EPS);
        assert!((clock.logical_time(11.5) - 3.0).abs() < EPS);
    }

    #[test]
    fn test_speed_change_is_continuous() {
        let mut clock = LogicalClock::new(0.0, 1.0);
        let before = clock.logical_time(4.0);
        clock.set_speed(4.0, 0.5);
        let after = clock.logical_time(4.0);
        assert!((before - after).abs() < EPS);
        assert!((clock.logical_time(6.0) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_pause_does_not_advance() {
        let mut clock = LogicalClock::new(0.0, 1.5);
        clock.freeze(2.0);
        let frozen = clock.logical_time(2.0);
        assert!((clock.logical_time(50.0) - frozen).abs() < EPS);

        clock.thaw(9.0);
        assert!((clock.logical_time(9.0) - frozen).abs() < EPS);
        assert!((clock.logical_time(10.0) - (frozen + 1.5)).abs() < EPS);
    }

    #[test]
    fn test_seek_sets_exact_target() {
        let mut clock = LogicalClock::new(0.0, 1.0);
        clock.freeze(1.0);
        clock.thaw(3.0);
        clock.seek_to(5.0, 0.25);
        assert!((clock.logical_time(5.0) - 0.25).abs() < EPS);
    }

    #[test]
    fn test_changes_while_frozen_resume_continuously() {
        let mut clock = LogicalClock::new(0.0, 1.0);
        clock.freeze(3.0);
        clock.set_speed(4.0, 2.0);
        clock.seek_to(5.0, 1.0);
        assert!((clock.logical_time(6.0) - 1.0).abs() < EPS);

        clock.thaw(8.0);
        assert!((clock.logical_time(8.0) - 1.0).abs() < EPS);
        assert!((clock.logical_time(9.0) - 3.0).abs() < EPS);
    }

    #[test]
    fn test_restart() {
        let mut clock = LogicalClock::new(0.0, 1.0);
        clock.freeze(1.0);
        clock.thaw(4.0);
        clock.restart(7.0);
        assert!(!clock.is_frozen());
        assert!(clock.logical_time(7.0).abs() < EPS);
    }

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(0.25);
        other.advance(0.5);
        assert!((clock.now() - 0.75).abs() < EPS);
        clock.set(2.0);
        assert_eq!(other.now(), 2.0);
    }
}
