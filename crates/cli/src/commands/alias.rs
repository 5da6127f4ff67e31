// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::view::FleetView;

pub fn list(view: &FleetView) -> i32 {
    let provider_aliases = view.provider_aliases();
    if !provider_aliases.is_empty() {
        println!("Provider aliases:");
        for (provider, alias) in &provider_aliases {
            println!("  {provider} -> {alias}");
        }
    }
    let device_aliases = view.device_aliases();
    if !device_aliases.is_empty() {
        println!("Device aliases:");
        for (device, alias) in &device_aliases {
            println!("  {device} -> {alias}");
        }
    }
    0
}

/// `alias` absent clears the provider alias.
pub fn set_provider(view: &FleetView, hint: &str, alias: Option<&str>) -> i32 {
    let alias = alias.unwrap_or("");
    match view.set_provider_alias(hint, alias) {
        Ok(true) => 0,
        Ok(false) => {
            match view.providers(hint) {
                Ok(providers) if providers.is_empty() => {
                    eprintln!("No provider found which matches: '{hint}'");
                }
                Ok(providers) => {
                    eprintln!("More than one provider found which matches: '{hint}':");
                    for provider in providers {
                        eprintln!("  {provider}");
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
            1
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

/// `alias` absent removes the device alias.
pub fn set_device(view: &FleetView, hint: &str, alias: Option<&str>) -> i32 {
    let alias = alias.unwrap_or("");
    match view.set_device_alias(hint, alias) {
        Ok(true) => 0,
        Ok(false) => {
            match view.list(hint, false) {
                Ok(devices) if devices.is_empty() => {
                    eprintln!("No device found which matches: '{hint}'");
                }
                Ok(devices) => {
                    eprintln!("More than one device found which matches: '{hint}':");
                    for device in devices {
                        eprintln!("  {}/{}", device.provider, device.name);
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
            1
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
