// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device and print-result enums. The ordinals are wire-visible and must
//! never be reordered.

use std::fmt;

/// Externally visible state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DeviceState {
    Uninitialized = 0,
    /// Device file exists but is held by another program.
    Busy = 1,
    /// Ready to accept a print job.
    Ok = 2,
    Printing = 3,
    Error = 4,
    /// The device vanished (cable pulled, powered off).
    Disconnected = 5,
    /// Serial port is open, waiting for the device to become ready.
    InitDevice = 6,
    /// Terminal state. No transitions leave it.
    Shutdown = 7,
}

impl DeviceState {
    pub const COUNT: u8 = 8;

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::Busy),
            2 => Some(Self::Ok),
            3 => Some(Self::Printing),
            4 => Some(Self::Error),
            5 => Some(Self::Disconnected),
            6 => Some(Self::InitDevice),
            7 => Some(Self::Shutdown),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// A device in an operational state accepts commands or is actively
    /// processing them.
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Busy | Self::Ok | Self::Printing | Self::InitDevice)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Busy => "BUSY",
            Self::Ok => "OK",
            Self::Printing => "PRINTING",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
            Self::InitDevice => "INIT_DEVICE",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

/// Outcome of a print request, carried in `PRINT_RESPONSE` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrintResult {
    /// Placeholder; never returned by a device.
    Invalid = 0,
    Ok = 1,
    /// The device state does not allow accepting a job.
    ErrInvalidState = 2,
    /// A job is already loaded.
    ErrPrinting = 3,
    /// No such device on the answering daemon.
    NetErrNoDevice = 4,
    /// The request was never answered.
    NetErrTimeout = 5,
}

impl PrintResult {
    pub const COUNT: u8 = 6;

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Invalid),
            1 => Some(Self::Ok),
            2 => Some(Self::ErrInvalidState),
            3 => Some(Self::ErrPrinting),
            4 => Some(Self::NetErrNoDevice),
            5 => Some(Self::NetErrTimeout),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Ok => "OK",
            Self::ErrInvalidState => "ERR_INVALID_STATE",
            Self::ErrPrinting => "ERR_PRINTING",
            Self::NetErrNoDevice => "NET_ERR_NO_DEVICE",
            Self::NetErrTimeout => "NET_ERR_TIMEOUT",
        }
    }
}

impl fmt::Display for PrintResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sensor reading: the measured value plus an optional set-point and
/// unit label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorValue {
    pub current: f64,
    pub set_point: Option<f64>,
    pub unit: Option<String>,
}

impl SensorValue {
    pub fn new(current: f64) -> Self {
        Self { current, set_point: None, unit: None }
    }

    pub fn with_set_point(mut self, set_point: f64) -> Self {
        self.set_point = Some(set_point);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
