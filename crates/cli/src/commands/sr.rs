// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::view::{FleetView, SensorReadingRow};

pub fn run(view: &FleetView, hint: &str, resolve_aliases: bool) -> i32 {
    let rows = match view.sensor_readings(hint, resolve_aliases) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    for row in &rows {
        println!("{}", render_row(row));
    }
    0
}

fn render_row(row: &SensorReadingRow) -> String {
    let mut out = format!(
        "{}/{}\t{}\t{:.6}",
        row.provider_label, row.device_label, row.sensor_name, row.value.current
    );
    if let Some(set_point) = row.value.set_point {
        out.push_str(&format!(" (sp: {set_point:.6})"));
    }
    if let Some(unit) = &row.value.unit {
        out.push_str(&format!(" [{unit}]"));
    }
    out
}

#[cfg(test)]
#[path = "sr_tests.rs"]
mod tests;
