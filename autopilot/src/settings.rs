//! Tuning parameters for the navigation core.
//!
//! Every numeric constant that shapes avoidance or control behavior lives here so
//! hosts can tune it without touching the algorithms.
//!
//! # Example
//!
//! ```
//! use autopilot::NavSettings;
//! use std::time::Duration;
//!
//! let settings = NavSettings::default()
//!     .with_max_alternates(40)
//!     .with_planet_time_slice(Duration::from_micros(500));
//! assert!(settings.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::{NavError, Result};

/// Autopilot-wide tuning parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavSettings {
    /// Ask the Pathfinder before moving; when false the Mover flies straight lines.
    pub collision_avoidance: bool,

    /// Minimum ticks between two direct path tests of the same run.
    pub path_test_interval_ticks: u64,
    /// Minimum ticks between two rotation tests.
    pub rotate_test_interval_ticks: u64,
    /// Ticks a run stays `PathBlocked` before it is retried as a new run.
    pub blocked_retry_ticks: u64,
    /// A destination that moves farther than this from where its run started
    /// begins a new run (meters).
    pub destination_change_tolerance: f32,

    /// Time horizon of the velocity look-ahead test (seconds).
    pub look_ahead_seconds: f32,
    /// Distance cap of the velocity look-ahead test (meters).
    pub look_ahead_distance: f32,
    /// Below this speed no velocity look-ahead test is queued (m/s).
    pub look_ahead_min_speed: f32,
    /// Lowest speed cap imposed by a blocked look-ahead test (m/s).
    pub min_capped_speed: f32,

    /// Non-static bodies lighter than this never obstruct (kg).
    pub min_obstruction_mass: f32,

    /// Path value penalty per meter of detour to an alternate waypoint.
    pub waypoint_distance_bias: f32,
    /// Alternates evaluated after the first viable one before the search stops.
    pub alternates_after_first_viable: u32,
    /// Total alternates evaluated before the search gives up.
    pub max_alternates: u32,
    /// Growth factor between successive rings of candidates around an obstruction.
    pub ring_radius_factor: f32,
    /// Number of rings tried around an obstruction.
    pub ring_steps: u32,
    /// Length of a short-hop candidate (meters); at least the vehicle's diameter.
    pub short_hop_distance: f32,

    /// Gravity (in g) at a path's closest approach to a planet must exceed the
    /// gravity at both endpoints by more than this to block the path.
    pub planet_gravity_threshold: f32,
    /// Wall-clock budget for draining the shared planet work queue each tick.
    pub planet_time_slice: Duration,

    /// Ticks after a rotation command during which observed angular acceleration is
    /// attributed to that command.
    pub gyro_staleness_ticks: u64,
    /// Ticks between two Mover control updates; also the horizon of the damping rule.
    pub control_period_ticks: u64,

    /// Absolute speed limit (m/s).
    pub max_speed: f32,
    /// Absolute angular speed limit (rad/s).
    pub max_angular_speed: f32,
    /// Target speeds below this in an axis hand the axis to the dampers (m/s or rad/s).
    pub near_zero_speed: f32,
    /// Global multiplier applied to every thruster's force.
    pub thrust_multiplier: f32,

    /// Capacity of each Pathfinder's high-priority queue.
    pub high_queue_capacity: usize,
    /// Worker threads of the latency-sensitive pool.
    pub high_threads: usize,
    /// Worker threads of the best-effort pool.
    pub low_threads: usize,
}

impl Default for NavSettings {
    fn default() -> Self {
        Self {
            collision_avoidance: true,
            path_test_interval_ticks: 10,
            rotate_test_interval_ticks: 60,
            blocked_retry_ticks: 600,
            destination_change_tolerance: 10.0,
            look_ahead_seconds: 10.0,
            look_ahead_distance: 1000.0,
            look_ahead_min_speed: 1.0,
            min_capped_speed: 1.0,
            min_obstruction_mass: 1000.0,
            waypoint_distance_bias: 0.05,
            alternates_after_first_viable: 10,
            max_alternates: 25,
            ring_radius_factor: 2.0,
            ring_steps: 3,
            short_hop_distance: 50.0,
            planet_gravity_threshold: 0.1,
            planet_time_slice: Duration::from_millis(1),
            gyro_staleness_ticks: 10,
            control_period_ticks: 6,
            max_speed: 100.0,
            max_angular_speed: 1.5,
            near_zero_speed: 0.1,
            thrust_multiplier: 1.0,
            high_queue_capacity: 8,
            high_threads: 1,
            low_threads: 3,
        }
    }
}

impl NavSettings {
    /// Enable or disable collision avoidance.
    #[must_use]
    pub fn with_collision_avoidance(mut self, enabled: bool) -> Self {
        self.collision_avoidance = enabled;
        self
    }

    /// Set the minimum ticks between direct path tests.
    #[must_use]
    pub fn with_path_test_interval(mut self, ticks: u64) -> Self {
        self.path_test_interval_ticks = ticks;
        self
    }

    /// Set the minimum ticks between rotation tests.
    #[must_use]
    pub fn with_rotate_test_interval(mut self, ticks: u64) -> Self {
        self.rotate_test_interval_ticks = ticks;
        self
    }

    /// Set the look-ahead horizon and distance cap.
    #[must_use]
    pub fn with_look_ahead(mut self, seconds: f32, distance: f32) -> Self {
        self.look_ahead_seconds = seconds;
        self.look_ahead_distance = distance;
        self
    }

    /// Set the detour penalty per meter.
    #[must_use]
    pub fn with_waypoint_distance_bias(mut self, bias: f32) -> Self {
        self.waypoint_distance_bias = bias;
        self
    }

    /// Set the total alternate budget.
    #[must_use]
    pub fn with_max_alternates(mut self, count: u32) -> Self {
        self.max_alternates = count;
        self
    }

    /// Set how many alternates are still evaluated after the first viable one.
    #[must_use]
    pub fn with_alternates_after_first_viable(mut self, count: u32) -> Self {
        self.alternates_after_first_viable = count;
        self
    }

    /// Set the short-hop candidate length.
    #[must_use]
    pub fn with_short_hop_distance(mut self, meters: f32) -> Self {
        self.short_hop_distance = meters;
        self
    }

    /// Set the planet queue's per-tick budget.
    #[must_use]
    pub fn with_planet_time_slice(mut self, slice: Duration) -> Self {
        self.planet_time_slice = slice;
        self
    }

    /// Set the planet gravity avoidance threshold (g).
    #[must_use]
    pub fn with_planet_gravity_threshold(mut self, threshold: f32) -> Self {
        self.planet_gravity_threshold = threshold;
        self
    }

    /// Set the minimum mass of an obstructing non-static body.
    #[must_use]
    pub fn with_min_obstruction_mass(mut self, kg: f32) -> Self {
        self.min_obstruction_mass = kg;
        self
    }

    /// Set the absolute speed limit.
    #[must_use]
    pub fn with_max_speed(mut self, speed: f32) -> Self {
        self.max_speed = speed;
        self
    }

    /// Set the control period.
    #[must_use]
    pub fn with_control_period(mut self, ticks: u64) -> Self {
        self.control_period_ticks = ticks;
        self
    }

    /// Set the worker counts of both pools.
    #[must_use]
    pub fn with_threads(mut self, high: usize, low: usize) -> Self {
        self.high_threads = high;
        self.low_threads = low;
        self
    }

    /// Check every field is within its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::InvalidSettings`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(NavError::InvalidSettings(format!(
                    "{name} must be positive, got {value}"
                )))
            }
        }
        fn non_negative(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(NavError::InvalidSettings(format!(
                    "{name} must not be negative, got {value}"
                )))
            }
        }

        positive("look_ahead_seconds", self.look_ahead_seconds)?;
        positive("look_ahead_distance", self.look_ahead_distance)?;
        non_negative("look_ahead_min_speed", self.look_ahead_min_speed)?;
        non_negative("min_capped_speed", self.min_capped_speed)?;
        non_negative("min_obstruction_mass", self.min_obstruction_mass)?;
        non_negative("waypoint_distance_bias", self.waypoint_distance_bias)?;
        non_negative(
            "destination_change_tolerance",
            self.destination_change_tolerance,
        )?;
        positive("short_hop_distance", self.short_hop_distance)?;
        non_negative("planet_gravity_threshold", self.planet_gravity_threshold)?;
        positive("max_speed", self.max_speed)?;
        positive("max_angular_speed", self.max_angular_speed)?;
        non_negative("near_zero_speed", self.near_zero_speed)?;
        positive("thrust_multiplier", self.thrust_multiplier)?;

        if self.ring_radius_factor <= 1.0 || !self.ring_radius_factor.is_finite() {
            return Err(NavError::InvalidSettings(format!(
                "ring_radius_factor must be greater than 1, got {}",
                self.ring_radius_factor
            )));
        }
        if self.max_alternates == 0 {
            return Err(NavError::InvalidSettings(
                "max_alternates must be at least 1".into(),
            ));
        }
        if self.path_test_interval_ticks == 0 || self.control_period_ticks == 0 {
            return Err(NavError::InvalidSettings(
                "tick intervals must be at least 1".into(),
            ));
        }
        if self.high_queue_capacity == 0 {
            return Err(NavError::InvalidSettings(
                "high_queue_capacity must be at least 1".into(),
            ));
        }
        if self.high_threads == 0 || self.low_threads == 0 {
            return Err(NavError::InvalidSettings(
                "both pools need at least one thread".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(NavSettings::default().validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let s = NavSettings::default()
            .with_max_alternates(7)
            .with_look_ahead(3.0, 200.0)
            .with_threads(2, 6);
        assert_eq!(s.max_alternates, 7);
        assert_eq!(s.look_ahead_seconds, 3.0);
        assert_eq!(s.look_ahead_distance, 200.0);
        assert_eq!((s.high_threads, s.low_threads), (2, 6));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(NavSettings::default().with_max_speed(0.0).validate().is_err());
        assert!(NavSettings::default().with_max_alternates(0).validate().is_err());
        assert!(
            NavSettings::default()
                .with_look_ahead(f32::NAN, 100.0)
                .validate()
                .is_err()
        );
        let mut s = NavSettings::default();
        s.ring_radius_factor = 1.0;
        assert!(s.validate().is_err());
    }
}
