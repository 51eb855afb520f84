//! Device-state constraints for scheduled work.
//!
//! Evaluation is a pure function of a [`DeviceState`] snapshot.

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{SiftError, SiftResult};
use crate::traits::DeviceState;

/// Conditions a unit of work needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkConstraints {
    /// Battery at or above this, or charging.
    pub min_battery_pct: Option<u8>,
    /// `min_battery_pct` follows `scheduler.battery_threshold_pct` at evaluation.
    #[serde(default)]
    pub battery_from_config: bool,
    pub requires_charging: bool,
    /// Screen off or keyguard locked.
    pub requires_screen_off: bool,
    pub requires_device_idle: bool,
    /// Inclusive local-hour window. A window with start > end wraps midnight.
    pub hours: Option<(u32, u32)>,
}

impl WorkConstraints {
    /// No constraints.
    pub fn expedited() -> Self {
        Self::default()
    }

    /// Medium work: enough battery (or charging) and no interactive use.
    pub fn deferrable(battery_threshold_pct: u8) -> Self {
        Self {
            min_battery_pct: Some(battery_threshold_pct),
            requires_screen_off: true,
            ..Self::default()
        }
    }

    /// Medium work whose battery floor is the configured threshold at run time.
    pub fn deferrable_from_config() -> Self {
        Self {
            battery_from_config: true,
            requires_screen_off: true,
            ..Self::default()
        }
    }

    /// Fill in the configured battery threshold, if this gate follows it.
    pub fn with_config(mut self, config: &SchedulerConfig) -> Self {
        if self.battery_from_config {
            self.min_battery_pct = Some(config.battery_threshold_pct);
        }
        self
    }

    /// Nightly training: charging, idle, screen off, inside the night window.
    pub fn nightly(start_hour: u32, end_hour: u32) -> Self {
        Self {
            requires_charging: true,
            requires_screen_off: true,
            requires_device_idle: true,
            hours: Some((start_hour, end_hour)),
            ..Self::default()
        }
    }

    /// The first unmet condition, if any.
    pub fn unmet(&self, state: &DeviceState) -> Option<&'static str> {
        if let Some(min) = self.min_battery_pct {
            if state.battery_pct < min && !state.charging {
                return Some("battery below threshold and not charging");
            }
        }
        if self.requires_charging && !state.charging {
            return Some("not charging");
        }
        if self.requires_screen_off && !state.is_screen_off_or_locked() {
            return Some("screen in interactive use");
        }
        if self.requires_device_idle && !state.device_idle {
            return Some("device not idle");
        }
        if let Some((start, end)) = self.hours {
            let hour = state.local_hour;
            let inside = if start <= end {
                (start..=end).contains(&hour)
            } else {
                hour >= start || hour <= end
            };
            if !inside {
                return Some("outside allowed hours");
            }
        }
        None
    }

    pub fn is_satisfied(&self, state: &DeviceState) -> bool {
        self.unmet(state).is_none()
    }

    /// `ConstraintUnmet` naming the first unmet condition.
    pub fn evaluate(&self, state: &DeviceState) -> SiftResult<()> {
        match self.unmet(state) {
            Some(reason) => Err(SiftError::constraint_unmet(reason)),
            None => Ok(()),
        }
    }
}
