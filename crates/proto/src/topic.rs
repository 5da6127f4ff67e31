// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic grammar:
//!
//! ```text
//! <prefix>/clients/<client-id>/<device>/{state|print_progress|sensor_readings|print_request|print_response}
//! <prefix>/aliases/<client-id>[/set]
//! ```
//!
//! Device names never contain `/`.

use std::fmt;

/// Per-device channel leaf under `<prefix>/clients/<id>/<device>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChannel {
    State,
    PrintProgress,
    SensorReadings,
    PrintRequest,
    PrintResponse,
}

impl DeviceChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::PrintProgress => "print_progress",
            Self::SensorReadings => "sensor_readings",
            Self::PrintRequest => "print_request",
            Self::PrintResponse => "print_response",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "state" => Some(Self::State),
            "print_progress" => Some(Self::PrintProgress),
            "sensor_readings" => Some(Self::SensorReadings),
            "print_request" => Some(Self::PrintRequest),
            "print_response" => Some(Self::PrintResponse),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTopic {
    Device { provider: String, device: String, channel: DeviceChannel },
    Aliases { provider: String },
    AliasesSet { provider: String },
}

/// Builds and parses topics under one configured prefix.
#[derive(Debug, Clone)]
pub struct TopicSpace {
    prefix: String,
}

impl TopicSpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn device(&self, client_id: &str, device: &str, channel: DeviceChannel) -> String {
        format!("{}/clients/{client_id}/{device}/{channel}", self.prefix)
    }

    pub fn aliases(&self, client_id: &str) -> String {
        format!("{}/aliases/{client_id}", self.prefix)
    }

    pub fn aliases_set(&self, client_id: &str) -> String {
        format!("{}/aliases/{client_id}/set", self.prefix)
    }

    /// Subscription pattern for one channel across all providers/devices.
    pub fn any_device(&self, channel: DeviceChannel) -> String {
        format!("{}/clients/+/+/{channel}", self.prefix)
    }

    /// Subscription pattern for every provider's retained alias table.
    pub fn any_aliases(&self) -> String {
        format!("{}/aliases/+", self.prefix)
    }

    /// Subscription pattern for print requests addressed to one daemon.
    pub fn own_print_requests(&self, client_id: &str) -> String {
        format!("{}/clients/{client_id}/+/{}", self.prefix, DeviceChannel::PrintRequest)
    }

    pub fn parse(&self, topic: &str) -> Option<ParsedTopic> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        match parts.next()? {
            "clients" => {
                let provider = parts.next()?;
                let device = parts.next()?;
                let channel = DeviceChannel::from_str(parts.next()?)?;
                if parts.next().is_some() || provider.is_empty() || device.is_empty() {
                    return None;
                }
                Some(ParsedTopic::Device {
                    provider: provider.to_owned(),
                    device: device.to_owned(),
                    channel,
                })
            }
            "aliases" => {
                let provider = parts.next()?;
                if provider.is_empty() {
                    return None;
                }
                match parts.next() {
                    None => Some(ParsedTopic::Aliases { provider: provider.to_owned() }),
                    Some("set") if parts.next().is_none() => {
                        Some(ParsedTopic::AliasesSet { provider: provider.to_owned() })
                    }
                    Some(_) => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
