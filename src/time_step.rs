//! C1: [`TimeStep`], the "fire every K units of scale S for up to L times" primitive.

/// The scale a [`TimeStep`] is measured against. `Iteration` and `Epoch` tick once per
/// training loop event; the lifecycle scales tick once per corresponding transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeScale {
    Iteration,
    Epoch,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
}

/// Whether advancing a [`TimeStep`] by one tick caused it to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotYet,
    Fired,
}

/// Immutable template `(scale, interval, live_time)` plus a mutable local countdown.
///
/// Invariant: `1 <= local_interval <= interval`. A hook fires when `local_interval`
/// reaches `0`, at which point it resets to `interval` and `local_live_time` is
/// decremented (unless it is `-1`, meaning unbounded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStep {
    scale: TimeScale,
    interval: u32,
    live_time: i64,
    local_interval: u32,
    local_live_time: i64,
}

impl TimeStep {
    /// Builds a new `TimeStep`. `interval` must be `>= 1`; `live_time` must be `>= -1`.
    pub fn new(scale: TimeScale, interval: u32, live_time: i64) -> Result<Self, String> {
        if interval == 0 {
            return Err("TimeStep interval must be >= 1".to_string());
        }
        if live_time < -1 {
            return Err("TimeStep live_time must be -1 (unbounded) or >= 0".to_string());
        }
        Ok(Self {
            scale,
            interval,
            live_time,
            local_interval: interval,
            local_live_time: live_time,
        })
    }

    /// Convenience constructor for an unbounded `TimeStep` firing every `interval` ticks.
    pub fn every(scale: TimeScale, interval: u32) -> Self {
        Self::new(scale, interval, -1).expect("interval is always >= 1 here")
    }

    pub fn scale(&self) -> TimeScale {
        self.scale
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn live_time(&self) -> i64 {
        self.live_time
    }

    pub fn local_live_time(&self) -> i64 {
        self.local_live_time
    }

    /// An independent copy with the local countdown reset to the template values.
    pub fn deep_copy(&self) -> Self {
        Self {
            scale: self.scale,
            interval: self.interval,
            live_time: self.live_time,
            local_interval: self.interval,
            local_live_time: self.live_time,
        }
    }

    /// A hook is dead once its local countdown of remaining fires reaches zero.
    pub fn is_dead(&self) -> bool {
        self.local_live_time == 0
    }

    /// Advances the local countdown by one tick. Returns [`TickOutcome::Fired`] when
    /// this tick causes the TimeStep to elapse; resets `local_interval` and decrements
    /// `local_live_time` (if bounded) on fire.
    ///
    /// A dead TimeStep (`local_live_time == 0`) never fires again; ticking it is a no-op
    /// that returns `NotYet`.
    pub fn tick(&mut self) -> TickOutcome {
        if self.is_dead() {
            return TickOutcome::NotYet;
        }
        self.local_interval -= 1;
        if self.local_interval != 0 {
            return TickOutcome::NotYet;
        }
        self.local_interval = self.interval;
        if self.local_live_time > 0 {
            self.local_live_time -= 1;
        }
        TickOutcome::Fired
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_every_interval_ticks() {
        let mut ts = TimeStep::every(TimeScale::Iteration, 3);
        assert_eq!(ts.tick(), TickOutcome::NotYet);
        assert_eq!(ts.tick(), TickOutcome::NotYet);
        assert_eq!(ts.tick(), TickOutcome::Fired);
        assert_eq!(ts.tick(), TickOutcome::NotYet);
    }

    #[test]
    fn interval_one_fires_every_tick() {
        let mut ts = TimeStep::every(TimeScale::Iteration, 1);
        for _ in 0..5 {
            assert_eq!(ts.tick(), TickOutcome::Fired);
        }
    }

    #[test]
    fn unbounded_live_time_never_dies() {
        let mut ts = TimeStep::every(TimeScale::Epoch, 1);
        for _ in 0..1000 {
            ts.tick();
        }
        assert!(!ts.is_dead());
    }

    #[test]
    fn bounded_live_time_fires_exactly_l_times_then_dies() {
        let mut ts = TimeStep::new(TimeScale::Iteration, 1, 3).unwrap();
        let mut fires = 0;
        for _ in 0..10 {
            if ts.tick() == TickOutcome::Fired {
                fires += 1;
            }
        }
        assert_eq!(fires, 3);
        assert!(ts.is_dead());
    }

    #[test]
    fn deep_copy_resets_local_state_independently() {
        let mut ts = TimeStep::every(TimeScale::Iteration, 5);
        ts.tick();
        ts.tick();
        let copy = ts.deep_copy();
        assert_eq!(copy.local_interval, copy.interval);
        assert_ne!(copy.local_interval, ts.local_interval);
    }

    #[test]
    fn rejects_invalid_construction() {
        assert!(TimeStep::new(TimeScale::Iteration, 0, -1).is_err());
        assert!(TimeStep::new(TimeScale::Iteration, 1, -2).is_err());
    }
}
