// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classification of unsolicited printer output lines into sensor readings
//! and print progress.

use herd_proto::state::SensorValue;
use regex::Regex;

// example: "T:21.6 /0.0 B:21.8 /0.0 T0:21.6 /0.0 @:0 B@:0 P:0.0 A:23.0"
const TEMP_ENTRY: &str = r"((T\d*)|(B\d*)|(B@)|@|P|A):\d+(\.\d+)?( /\d+\.\d)?\s*";

// example: "X:0.00 Y:0.00 Z:0.15 E:0.00 Count X: 0.00 Y:0.00 Z:0.15 E:0.00"
//                                             ^ (space!)
const POS_ENTRY: &str = r"(([XYZE]:\s?\d+(\.\d+))|Count)\s?";

// example: "E0:0 RPM PRN1:0 RPM E0@:0 PRN1@:0"
const FAN_ENTRY: &str = r"((E)|(PRN))\d@?:\d+( RPM)?\s?";

// example: "NORMAL MODE: Percent done: 0; print time remaining in mins: 24; Change in mins: -1"
const PROGRESS: &str = r"^NORMAL MODE: Percent done: (\d+); print time remaining in mins: (\d+);.*$";

/// One classified line.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Readings(Vec<(String, SensorValue)>),
    Progress { percentage: u8, remaining_minutes: u32 },
}

pub struct TelemetryParser {
    temp_full: Regex,
    temp: Regex,
    pos_full: Regex,
    pos: Regex,
    fan_full: Regex,
    fan: Regex,
    progress: Regex,
}

impl TelemetryParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            temp_full: Regex::new(&format!("^({TEMP_ENTRY})+$"))?,
            temp: Regex::new(TEMP_ENTRY)?,
            pos_full: Regex::new(&format!("^({POS_ENTRY}){{9}}$"))?,
            pos: Regex::new(POS_ENTRY)?,
            fan_full: Regex::new(&format!("^({FAN_ENTRY})+$"))?,
            fan: Regex::new(FAN_ENTRY)?,
            progress: Regex::new(PROGRESS)?,
        })
    }

    /// Classifies `line`, trying temperature, position, fan and finally
    /// progress. Returns `None` for anything else.
    pub fn classify(&self, line: &str) -> Option<Telemetry> {
        if self.temp_full.is_match(line) {
            return non_empty(self.parse_temp(line));
        }
        if self.pos_full.is_match(line) {
            return non_empty(self.parse_pos(line));
        }
        if self.fan_full.is_match(line) {
            return non_empty(self.parse_fan(line));
        }
        self.parse_progress(line)
    }

    fn parse_temp(&self, line: &str) -> Vec<(String, SensorValue)> {
        let mut readings = Vec::new();
        for entry in self.temp.find_iter(line) {
            let Some((kind, rest)) = entry.as_str().split_once(':') else { continue };
            let sensor = match kind {
                "T" => "temp_extruder",
                "B" => "temp_bed",
                "A" => "temp_ambient",
                // T0/T1..., B@, @, P carry no stable meaning here.
                _ => continue,
            };
            let Some(value) = parse_value_pair(rest) else { continue };
            readings.push((sensor.to_owned(), value.with_unit("C")));
        }
        readings
    }

    fn parse_pos(&self, line: &str) -> Vec<(String, SensorValue)> {
        let mut readings = Vec::new();
        for entry in self.pos.find_iter(line) {
            let token = entry.as_str().trim();
            // Everything after "Count" is stepper debug output.
            if token == "Count" {
                break;
            }
            let Some((axis, value)) = token.split_once(':') else { continue };
            let sensor = match axis.trim() {
                "X" => "pos_X",
                "Y" => "pos_Y",
                "Z" => "pos_Z",
                "E" => "pos_E",
                _ => continue,
            };
            let Ok(current) = value.trim().parse::<f64>() else { continue };
            readings.push((sensor.to_owned(), SensorValue::new(current).with_unit("mm")));
        }
        readings
    }

    fn parse_fan(&self, line: &str) -> Vec<(String, SensorValue)> {
        let mut readings = Vec::new();
        for entry in self.fan.find_iter(line) {
            let token = entry.as_str();
            // `E0@:` style entries are PWM values, not fan speeds.
            if token.contains('@') {
                continue;
            }
            let Some((name, rest)) = token.split_once(':') else { continue };
            let value = rest.trim_end().trim_end_matches(" RPM").trim();
            let Ok(current) = value.parse::<f64>() else { continue };
            readings.push((format!("rpm_{name}"), SensorValue::new(current).with_unit("RPM")));
        }
        readings
    }

    fn parse_progress(&self, line: &str) -> Option<Telemetry> {
        let caps = self.progress.captures(line)?;
        let percentage: u32 = caps.get(1)?.as_str().parse().ok()?;
        let remaining_minutes: u32 = caps.get(2)?.as_str().parse().ok()?;
        Some(Telemetry::Progress {
            percentage: percentage.min(100) as u8,
            remaining_minutes,
        })
    }
}

/// Parses `21.6 /0.0` style current/set-point pairs.
fn parse_value_pair(raw: &str) -> Option<SensorValue> {
    let raw = raw.trim();
    match raw.split_once('/') {
        Some((current, set_point)) => {
            let current: f64 = current.trim().parse().ok()?;
            let set_point: f64 = set_point.trim().parse().ok()?;
            Some(SensorValue::new(current).with_set_point(set_point))
        }
        None => {
            let current: f64 = raw.parse().ok()?;
            Some(SensorValue::new(current))
        }
    }
}

fn non_empty(readings: Vec<(String, SensorValue)>) -> Option<Telemetry> {
    if readings.is_empty() {
        None
    } else {
        Some(Telemetry::Readings(readings))
    }
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
