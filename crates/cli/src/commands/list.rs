// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use herd_proto::state::DeviceState;

use crate::view::{DeviceInfo, FleetView};

pub fn run(view: &FleetView, hint: &str, resolve_aliases: bool) -> i32 {
    let devices = match view.list(hint, resolve_aliases) {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    for device in &devices {
        println!("{}", render_row(device, resolve_aliases));
    }
    0
}

fn render_row(device: &DeviceInfo, resolve_aliases: bool) -> String {
    let mut out = format!(
        "{}/{} {}",
        device.provider_label(resolve_aliases),
        device.device_label(resolve_aliases),
        device.state
    );
    if device.state == DeviceState::Printing {
        let hours = device.print_remaining_time / 60;
        let minutes = device.print_remaining_time % 60;
        out.push_str(&format!(
            " ({}%, remaining {hours:02}:{minutes:02} [hh:mm])",
            device.print_percentage
        ));
    }
    out
}

#[cfg(test)]
#[path = "list_tests.rs"]
mod tests;
