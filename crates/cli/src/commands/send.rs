// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use herd_proto::gcode;

use crate::view::FleetView;

pub fn run(view: &FleetView, file: &Path, hint: &str, resolve_aliases: bool) -> i32 {
    let raw = match std::fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(_) => {
            eprintln!("Gcode file does not exist: {}", file.display());
            return 1;
        }
    };
    let payload = gcode::clean_for_dispatch(&raw);

    let devices = match view.list(hint, resolve_aliases) {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    if devices.is_empty() {
        eprintln!("No devices found.");
        return 1;
    }

    if devices.len() > 1 && !confirm_count(devices.len()) {
        return 1;
    }

    let done = Arc::new(AtomicUsize::new(0));
    for device in &devices {
        let done = Arc::clone(&done);
        view.print(
            device,
            &payload,
            Box::new(move |device, result| {
                println!(
                    "print {}/{} {}",
                    device.provider_label(resolve_aliases),
                    device.device_label(resolve_aliases),
                    result
                );
                done.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    // Every dispatch resolves: response, timeout or immediate rejection.
    while done.load(Ordering::SeqCst) < devices.len() {
        std::thread::sleep(Duration::from_millis(100));
    }
    0
}

/// More than one device matched: the operator confirms by typing the
/// matched device count.
fn confirm_count(count: usize) -> bool {
    println!(
        "Found {count} devices. If you want to send the gcode to all of these devices, \
         then enter the number of devices."
    );
    print!("No. of devices: ");
    use std::io::Write;
    let _ = std::io::stdout().flush();

    let mut input = String::new();
    if std::io::stdin().lock().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().parse::<usize>().map_or(false, |n| n == count)
}
