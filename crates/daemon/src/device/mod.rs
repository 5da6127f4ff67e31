// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial-attached G-code devices: per-printer sessions, telemetry line
//! classification and USB detection.

pub mod detector;
pub mod session;
pub mod telemetry;

pub use detector::{Detector, DetectorListener};
pub use session::DeviceSession;

use std::collections::BTreeMap;

use herd_proto::state::{DeviceState, SensorValue};

/// Observes one device session. Callbacks run on the normal reactor
/// thread, never on the realtime thread that drives the serial fd.
pub trait DeviceListener: Send + Sync {
    fn on_state_change(&self, device: &str, state: DeviceState);

    /// Progress updates coalesce: only the most recent pair is delivered
    /// when the listener lags behind.
    fn on_print_progress(&self, _device: &str, _percentage: u8, _remaining_minutes: u32) {}

    /// Level-triggered: `readings` is the full current set at dispatch time.
    fn on_sensor_update(&self, _device: &str, _readings: &BTreeMap<String, SensorValue>) {}
}
