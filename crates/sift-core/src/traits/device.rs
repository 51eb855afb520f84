//! Device-state queries consulted by the scheduler.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Point-in-time device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub battery_pct: u8,
    pub charging: bool,
    pub screen_interactive: bool,
    pub keyguard_locked: bool,
    /// OS-level idle (doze) state.
    pub device_idle: bool,
    /// Local hour of day, 0..=23.
    pub local_hour: u32,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            battery_pct: 100,
            charging: false,
            screen_interactive: true,
            keyguard_locked: false,
            device_idle: false,
            local_hour: 12,
        }
    }
}

impl DeviceState {
    /// The user is not interacting with the device.
    pub fn is_screen_off_or_locked(&self) -> bool {
        !self.screen_interactive || self.keyguard_locked
    }
}

/// Read-only source of device state.
pub trait DeviceStateProvider: Send + Sync {
    fn snapshot(&self) -> DeviceState;
}

/// Device state set by the host, for hosts that push state changes.
#[derive(Debug, Default)]
pub struct StaticDeviceState {
    state: RwLock<DeviceState>,
    local_clock: bool,
}

impl StaticDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self {
            state: RwLock::new(state),
            local_clock: false,
        }
    }

    /// Like `new`, but snapshots report the current local hour.
    pub fn with_local_clock(state: DeviceState) -> Self {
        Self {
            state: RwLock::new(state),
            local_clock: true,
        }
    }

    /// Replace the current state.
    pub fn set(&self, state: DeviceState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Edit the current state in place.
    pub fn update(&self, edit: impl FnOnce(&mut DeviceState)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard);
    }
}

impl DeviceStateProvider for StaticDeviceState {
    fn snapshot(&self) -> DeviceState {
        let mut state = *self.state.read().unwrap_or_else(PoisonError::into_inner);
        if self.local_clock {
            state.local_hour = Local::now().hour();
        }
        state
    }
}
