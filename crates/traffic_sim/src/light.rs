//! Traffic-light phase state machine.
//!
//! Every light cycles RED → GREEN → YELLOW → RED. Each call to
//! [`TrafficLight::update`] advances an internal timer by one; when the timer
//! reaches the duration of the current phase the light switches to the next
//! phase and the timer restarts at zero.
//!
//! A [`LightSchedule`] decides on which zone ticks a light is updated at all,
//! so lights in a grid can be staggered instead of switching in lockstep.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Signal phase of a traffic light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Red,
    Green,
    Yellow,
}

impl Phase {
    /// The phase that follows this one in the cycle.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Phase::Red => Phase::Green,
            Phase::Green => Phase::Yellow,
            Phase::Yellow => Phase::Red,
        }
    }

    /// Only a red light holds traffic back.
    #[must_use]
    pub const fn blocks(self) -> bool {
        matches!(self, Phase::Red)
    }
}

/// Number of updates each phase lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub red: u32,
    pub green: u32,
    pub yellow: u32,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            red: 3,
            green: 3,
            yellow: 1,
        }
    }
}

impl PhaseDurations {
    /// Create durations for each phase.
    #[must_use]
    pub const fn new(red: u32, green: u32, yellow: u32) -> Self {
        Self { red, green, yellow }
    }

    /// Duration of the given phase.
    #[must_use]
    pub const fn of(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Red => self.red,
            Phase::Green => self.green,
            Phase::Yellow => self.yellow,
        }
    }

    /// # Errors
    ///
    /// Returns [`SimError::InvalidDuration`] for the first zero-length phase.
    pub fn validate(&self) -> Result<(), SimError> {
        for phase in [Phase::Red, Phase::Green, Phase::Yellow] {
            if self.of(phase) == 0 {
                return Err(SimError::InvalidDuration(phase));
            }
        }
        Ok(())
    }
}

/// Which zone ticks a light is updated on: once every `every` ticks,
/// starting at tick `lag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSchedule {
    every: u32,
    lag: u64,
}

impl Default for LightSchedule {
    fn default() -> Self {
        Self { every: 1, lag: 0 }
    }
}

impl LightSchedule {
    /// # Errors
    ///
    /// Returns [`SimError::InvalidSchedule`] if `every` is zero.
    pub fn new(every: u32, lag: u64) -> Result<Self, SimError> {
        if every == 0 {
            return Err(SimError::InvalidSchedule);
        }
        Ok(Self { every, lag })
    }

    /// Returns `true` if the light should be updated on zone tick `tick`.
    #[must_use]
    pub fn is_due(&self, tick: u64) -> bool {
        tick >= self.lag && (tick - self.lag) % u64::from(self.every) == 0
    }

    #[must_use]
    pub fn every(&self) -> u32 {
        self.every
    }

    #[must_use]
    pub fn lag(&self) -> u64 {
        self.lag
    }
}

/// A single traffic signal.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLight {
    id: String,
    position: DVec2,
    phase: Phase,
    durations: PhaseDurations,
    timer: u32,
    schedule: LightSchedule,
}

impl TrafficLight {
    /// Create a light in the RED phase with a zeroed timer.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidDuration`] if any phase lasts zero ticks.
    pub fn new(
        id: impl Into<String>,
        position: DVec2,
        durations: PhaseDurations,
    ) -> Result<Self, SimError> {
        durations.validate()?;
        Ok(Self {
            id: id.into(),
            position,
            phase: Phase::Red,
            durations,
            timer: 0,
            schedule: LightSchedule::default(),
        })
    }

    /// Replace the update schedule of this light.
    #[must_use]
    pub fn with_schedule(mut self, schedule: LightSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Advance the timer by one and switch phase when it expires.
    ///
    /// Returns the new phase if a transition happened.
    pub fn update(&mut self) -> Option<Phase> {
        self.timer += 1;
        if self.timer >= self.durations.of(self.phase) {
            self.phase = self.phase.next();
            self.timer = 0;
            return Some(self.phase);
        }
        None
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn position(&self) -> DVec2 {
        self.position
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Updates spent in the current phase.
    #[must_use]
    pub fn timer(&self) -> u32 {
        self.timer
    }

    #[must_use]
    pub fn durations(&self) -> PhaseDurations {
        self.durations
    }

    #[must_use]
    pub fn schedule(&self) -> LightSchedule {
        self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(red: u32, green: u32, yellow: u32) -> TrafficLight {
        TrafficLight::new("T1", DVec2::ZERO, PhaseDurations::new(red, green, yellow)).unwrap()
    }

    #[test]
    fn test_initial_state_is_red() {
        let tl = light(3, 3, 1);
        assert_eq!(tl.phase(), Phase::Red);
        assert_eq!(tl.timer(), 0);
    }

    #[test]
    fn test_phase_cycle_never_skips() {
        let mut tl = light(4, 3, 2);
        let mut transitions = Vec::new();
        for _ in 0..(4 + 3 + 2) * 3 {
            let before = tl.phase();
            if let Some(after) = tl.update() {
                assert_eq!(after, before.next());
                assert_eq!(tl.timer(), 0, "timer must reset on every transition");
                transitions.push(after);
            }
        }
        assert_eq!(
            transitions,
            [
                Phase::Green,
                Phase::Yellow,
                Phase::Red,
                Phase::Green,
                Phase::Yellow,
                Phase::Red,
                Phase::Green,
                Phase::Yellow,
                Phase::Red,
            ]
        );
    }

    #[test]
    fn test_phase_lasts_configured_duration() {
        let mut tl = light(3, 2, 1);
        assert_eq!(tl.update(), None);
        assert_eq!(tl.update(), None);
        assert_eq!(tl.update(), Some(Phase::Green));
        assert_eq!(tl.update(), None);
        assert_eq!(tl.update(), Some(Phase::Yellow));
        assert_eq!(tl.update(), Some(Phase::Red));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let result = TrafficLight::new("T1", DVec2::ZERO, PhaseDurations::new(3, 0, 1));
        assert!(matches!(result, Err(SimError::InvalidDuration(Phase::Green))));
    }

    #[test]
    fn test_schedule_with_lag() {
        let schedule = LightSchedule::new(2, 3).unwrap();
        let due: Vec<u64> = (0..10).filter(|&t| schedule.is_due(t)).collect();
        assert_eq!(due, vec![3, 5, 7, 9]);
        assert!(LightSchedule::new(0, 0).is_err());
    }

    #[test]
    fn test_default_schedule_runs_every_tick() {
        let schedule = LightSchedule::default();
        assert!((0..5).all(|t| schedule.is_due(t)));
    }
}
