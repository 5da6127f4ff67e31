// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn parser() -> TelemetryParser {
    match TelemetryParser::new() {
        Ok(p) => p,
        Err(e) => unreachable!("static patterns must compile: {e}"),
    }
}

fn readings(t: Option<Telemetry>) -> Vec<(String, SensorValue)> {
    match t {
        Some(Telemetry::Readings(r)) => r,
        other => {
            assert!(other.is_none(), "expected readings, got {other:?}");
            Vec::new()
        }
    }
}

#[test]
fn temperature_line_yields_extruder_bed_and_ambient() {
    let p = parser();
    let line = "T:21.6 /0.0 B:21.8 /0.0 T0:21.6 /0.0 @:0 B@:0 P:0.0 A:23.0";
    let r = readings(p.classify(line));
    assert_eq!(r.len(), 3);
    assert_eq!(r[0].0, "temp_extruder");
    assert_eq!(r[0].1, SensorValue::new(21.6).with_set_point(0.0).with_unit("C"));
    assert_eq!(r[1].0, "temp_bed");
    assert_eq!(r[1].1, SensorValue::new(21.8).with_set_point(0.0).with_unit("C"));
    assert_eq!(r[2].0, "temp_ambient");
    assert_eq!(r[2].1, SensorValue::new(23.0).with_unit("C"));
}

#[test]
fn position_line_stops_at_count() {
    let p = parser();
    let line = "X:1.00 Y:2.00 Z:0.15 E:3.50 Count X: 9.00 Y:9.00 Z:9.15 E:9.00";
    let r = readings(p.classify(line));
    assert_eq!(
        r,
        vec![
            ("pos_X".to_owned(), SensorValue::new(1.0).with_unit("mm")),
            ("pos_Y".to_owned(), SensorValue::new(2.0).with_unit("mm")),
            ("pos_Z".to_owned(), SensorValue::new(0.15).with_unit("mm")),
            ("pos_E".to_owned(), SensorValue::new(3.5).with_unit("mm")),
        ]
    );
}

#[test]
fn fan_line_skips_pwm_entries() {
    let p = parser();
    let line = "E0:1200 RPM PRN1:0 RPM E0@:128 PRN1@:0";
    let r = readings(p.classify(line));
    assert_eq!(
        r,
        vec![
            ("rpm_E0".to_owned(), SensorValue::new(1200.0).with_unit("RPM")),
            ("rpm_PRN1".to_owned(), SensorValue::new(0.0).with_unit("RPM")),
        ]
    );
}

#[test]
fn progress_line_is_parsed() {
    let p = parser();
    let line = "NORMAL MODE: Percent done: 13; print time remaining in mins: 37; Change in mins: -1";
    assert_eq!(
        p.classify(line),
        Some(Telemetry::Progress { percentage: 13, remaining_minutes: 37 })
    );
}

#[test]
fn silent_mode_progress_is_ignored() {
    let p = parser();
    let line = "SILENT MODE: Percent done: 13; print time remaining in mins: 37; Change in mins: -1";
    assert_eq!(p.classify(line), None);
}

#[yare::parameterized(
    ok = { "ok" },
    start = { "start" },
    lcd = { "LCD status changed" },
    capability = { "Cap:AUTOREPORT_TEMP:1" },
    firmware = { "FIRMWARE_NAME:Prusa-Firmware 3.10.0" },
    empty = { "" },
)]
fn non_telemetry_lines_classify_to_none(line: &str) {
    assert_eq!(parser().classify(line), None);
}

#[test]
fn overlong_percentage_is_clamped() {
    let p = parser();
    let line = "NORMAL MODE: Percent done: 250; print time remaining in mins: 1;";
    assert_eq!(
        p.classify(line),
        Some(Telemetry::Progress { percentage: 100, remaining_minutes: 1 })
    );
}
