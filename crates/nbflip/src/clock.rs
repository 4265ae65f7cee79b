//! Frame/step bookkeeping and step-size selection.

use serde::{Deserialize, Serialize};

use crate::constants::FRAME_END_SLACK;

/// Step-size bounds and frame length, all in simulation time units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSettings {
    pub frame_length: f64,
    /// Nominal step (used for fixed stepping and degenerate velocities)
    pub timestep: f64,
    pub timestep_min: f64,
    pub timestep_max: f64,
    /// Max cells travelled per step; `<= 0` selects fixed stepping
    pub cfl: f64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            frame_length: 2.0,
            timestep: 1.0,
            timestep_min: 0.2,
            timestep_max: 2.0,
            cfl: 1.0,
        }
    }
}

/// Simulation clock: frame index, time within the frame, current step.
///
/// Step sizes within one frame sum to exactly `frame_length`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationClock {
    settings: ClockSettings,
    frame: u32,
    time_in_frame: f64,
    /// Step size chosen for the step in progress
    dt: f64,
    steps_in_frame: u32,
    total_time: f64,
}

impl SimulationClock {
    pub fn new(settings: ClockSettings) -> Self {
        Self {
            settings,
            frame: 0,
            time_in_frame: 0.0,
            dt: settings.timestep,
            steps_in_frame: 0,
            total_time: 0.0,
        }
    }

    pub fn settings(&self) -> &ClockSettings {
        &self.settings
    }

    #[inline]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    #[inline]
    pub fn time_in_frame(&self) -> f64 {
        self.time_in_frame
    }

    #[inline]
    pub fn steps_in_frame(&self) -> u32 {
        self.steps_in_frame
    }

    #[inline]
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    #[inline]
    pub fn remaining(&self) -> f64 {
        (self.settings.frame_length - self.time_in_frame).max(0.0)
    }

    pub fn is_frame_complete(&self) -> bool {
        self.time_in_frame >= self.settings.frame_length
    }

    /// Unclipped step size for the given maximum grid speed (cells per time unit).
    pub fn proposal(&self, max_vel: f32) -> f64 {
        let s = &self.settings;
        let max_vel = max_vel as f64;
        if s.cfl <= 0.0 || !max_vel.is_finite() || max_vel <= 0.0 {
            return s.timestep;
        }
        (s.cfl / max_vel).clamp(s.timestep_min, s.timestep_max)
    }

    /// Choose the step size for the next step and return it.
    ///
    /// The last step of a frame lands exactly on the frame boundary; when less
    /// than two steps remain the remainder is split into two equal halves.
    pub fn choose_step(&mut self, max_vel: f32) -> f64 {
        let remaining = self.remaining();
        let mut dt = self.proposal(max_vel);
        if self.time_in_frame + FRAME_END_SLACK * dt > self.settings.frame_length {
            dt = remaining;
        } else if self.time_in_frame + 2.0 * dt > self.settings.frame_length {
            dt = remaining * 0.5;
        }
        self.dt = dt;
        dt
    }

    /// Halve the pending step size (used when a step is retried).
    pub fn halve_step(&mut self) -> f64 {
        self.dt *= 0.5;
        self.dt
    }

    /// Advance time by the pending step.
    pub fn commit_step(&mut self) {
        let remaining = self.remaining();
        if self.dt >= remaining {
            self.time_in_frame = self.settings.frame_length;
            self.total_time += remaining;
        } else {
            self.time_in_frame += self.dt;
            self.total_time += self.dt;
        }
        self.steps_in_frame += 1;
    }

    /// Move on to the next frame once the current one is complete.
    pub fn start_next_frame(&mut self) {
        self.frame += 1;
        self.time_in_frame = 0.0;
        self.steps_in_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(cfl: f64) -> ClockSettings {
        ClockSettings {
            cfl,
            ..ClockSettings::default()
        }
    }

    #[test]
    fn test_proposal_fixed_and_degenerate() {
        let clock = SimulationClock::new(settings(0.0));
        assert_eq!(clock.proposal(3.0), 1.0);
        let clock = SimulationClock::new(settings(1.0));
        assert_eq!(clock.proposal(0.0), 1.0);
        assert_eq!(clock.proposal(f32::NAN), 1.0);
        assert_eq!(clock.proposal(f32::INFINITY), 1.0);
    }

    #[test]
    fn test_proposal_is_clamped() {
        let clock = SimulationClock::new(settings(1.0));
        assert_eq!(clock.proposal(0.01), 2.0);
        assert_eq!(clock.proposal(100.0), 0.2);
        assert!((clock.proposal(2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_steps_sum_to_frame_length() {
        for max_vel in [0.3f32, 0.7, 1.3, 2.9, 4.1, 11.0] {
            let mut clock = SimulationClock::new(settings(1.0));
            let mut sum = 0.0;
            let mut steps = 0;
            while !clock.is_frame_complete() {
                let dt = clock.choose_step(max_vel);
                assert!(dt > 0.0, "non-positive step {} at max_vel {}", dt, max_vel);
                sum += dt;
                clock.commit_step();
                steps += 1;
                assert!(steps < 100);
            }
            assert!((sum - 2.0).abs() < 1e-9, "sum {} for max_vel {}", sum, max_vel);
            assert_eq!(clock.time_in_frame(), 2.0);
        }
    }

    #[test]
    fn test_tail_is_split_in_halves() {
        let mut clock = SimulationClock::new(settings(1.0));
        // proposal 0.8: 0.8 + 0.8 < 2 but 0.8 + 1.6 > 2
        assert!((clock.choose_step(1.25) - 0.8).abs() < 1e-12);
        clock.commit_step();
        // remaining 1.2 < 2 * 0.8 -> split in halves
        assert!((clock.choose_step(1.25) - 0.6).abs() < 1e-12);
        clock.commit_step();
        assert!((clock.choose_step(1.25) - 0.6).abs() < 1e-12);
        clock.commit_step();
        assert!(clock.is_frame_complete());
        assert_eq!(clock.steps_in_frame(), 3);
    }

    #[test]
    fn test_next_frame_resets_time() {
        let mut clock = SimulationClock::new(settings(0.0));
        while !clock.is_frame_complete() {
            clock.choose_step(0.0);
            clock.commit_step();
        }
        clock.start_next_frame();
        assert_eq!(clock.frame(), 1);
        assert_eq!(clock.time_in_frame(), 0.0);
        assert!((clock.total_time() - 2.0).abs() < 1e-12);
    }
}
