// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! USB printer detection.
//!
//! Enumerates the tty class directory, resolves each entry's USB parent
//! and accepts devices whose uevent reports a cdc_acm interface with the
//! configured vendor/product pair. Accepted devices get a session named
//! `<provider-tag>-<serial>`. Directory create/attribute events re-run the
//! candidate check for just the named entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use herd_proto::state::DeviceState;

use super::session::DeviceSession;
use super::DeviceListener;
use crate::fswatch::{mask, FsListener, FsWatcher};
use crate::reactor::Reactor;

/// USB vendor/product filter. The default matches the Prusa CDC ACM port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    pub vid: u16,
    pub pid: u16,
}

impl Default for UsbFilter {
    fn default() -> Self {
        Self { vid: 0x2c99, pid: 0x0002 }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Prefix of the device name, e.g. `prusa` in `prusa-<serial>`.
    pub provider_tag: String,
    pub filter: UsbFilter,
    pub tty_class_dir: PathBuf,
    pub dev_dir: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            provider_tag: "prusa".to_owned(),
            filter: UsbFilter::default(),
            tty_class_dir: PathBuf::from("/sys/class/tty"),
            dev_dir: PathBuf::from("/dev"),
        }
    }
}

/// Notified for every device present at registration time and every device
/// detected afterwards. Subscribers attach their session listeners from
/// this callback; queued session events are delivered afterwards.
pub trait DetectorListener: Send + Sync {
    fn on_new_device(&self, session: &Arc<DeviceSession>);
}

struct DetectorInner {
    devices: BTreeMap<String, Arc<DeviceSession>>,
    listeners: Vec<Weak<dyn DetectorListener>>,
}

/// Owns every device session on this host.
pub struct Detector {
    config: DetectorConfig,
    rt: Arc<Reactor>,
    normal: Arc<Reactor>,
    inner: Mutex<DetectorInner>,
    self_weak: Weak<Detector>,
}

struct Candidate {
    device_name: String,
    device_file: PathBuf,
}

impl Detector {
    pub fn new(config: DetectorConfig, rt: Arc<Reactor>, normal: Arc<Reactor>) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            config,
            rt,
            normal,
            inner: Mutex::new(DetectorInner { devices: BTreeMap::new(), listeners: Vec::new() }),
            self_weak: self_weak.clone(),
        })
    }

    /// Watches the device directory and runs the initial scan.
    pub fn start(self: &Arc<Self>, watcher: &FsWatcher) -> anyhow::Result<()> {
        let as_listener: Arc<dyn FsListener> = Arc::clone(self) as Arc<dyn FsListener>;
        watcher.register(self.config.dev_dir.clone(), mask::CREATE | mask::ATTRIB, &as_listener)?;
        self.scan();
        Ok(())
    }

    /// Checks every entry under the tty class directory.
    pub fn scan(self: &Arc<Self>) {
        let entries = match std::fs::read_dir(&self.config.tty_class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.config.tty_class_dir.display(), "tty enumeration failed: {e}");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            self.check_candidate(&name.to_string_lossy());
        }
    }

    pub fn find_device(&self, name: &str) -> Option<Arc<DeviceSession>> {
        self.inner.lock().devices.get(name).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<DeviceSession>> {
        self.inner.lock().devices.values().cloned().collect()
    }

    /// Registers a subscriber and replays every known device to it.
    pub fn register_on_new_device(&self, listener: &Arc<dyn DetectorListener>) {
        let devices: Vec<Arc<DeviceSession>> = {
            let mut inner = self.inner.lock();
            inner.listeners.push(Arc::downgrade(listener));
            inner.devices.values().cloned().collect()
        };
        for device in devices {
            listener.on_new_device(&device);
        }
    }

    pub fn unregister_on_new_device(&self, listener: &Arc<dyn DetectorListener>) {
        let key = Arc::as_ptr(listener) as *const () as usize;
        self.inner
            .lock()
            .listeners
            .retain(|w| Weak::as_ptr(w) as *const () as usize != key);
    }

    /// Cooperatively shuts down every session.
    pub fn shutdown_all(&self) {
        let devices: Vec<Arc<DeviceSession>> = self.inner.lock().devices.values().cloned().collect();
        for device in devices {
            device.shutdown();
        }
        self.inner.lock().devices.clear();
    }

    fn check_candidate(self: &Arc<Self>, tty_name: &str) {
        let Some(candidate) = self.probe(tty_name) else { return };

        {
            let inner = self.inner.lock();
            if let Some(existing) = inner.devices.get(&candidate.device_name) {
                let existing = Arc::clone(existing);
                drop(inner);
                if existing.state() == DeviceState::Busy {
                    // The holder may have released the port; try again.
                    existing.initialize();
                }
                return;
            }
        }

        // Probe for access before committing to a session.
        if let Err(e) = test_open(&candidate.device_file) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                debug!(device = %candidate.device_file.display(), "no access, skipping");
                return;
            }
        }

        let session = match DeviceSession::open(
            &candidate.device_file,
            &candidate.device_name,
            Arc::clone(&self.rt),
            &self.normal,
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(device = %candidate.device_name, "session setup failed: {e}");
                return;
            }
        };

        let as_device_listener: Arc<dyn DeviceListener> = Arc::clone(self) as Arc<dyn DeviceListener>;
        session.register_listener(&as_device_listener);

        if !session.state().is_operational() {
            debug!(device = %candidate.device_name, state = %session.state(), "candidate not usable");
            return;
        }

        info!(device = %candidate.device_name, path = %candidate.device_file.display(), "new device");
        let listeners: Vec<Arc<dyn DetectorListener>> = {
            let mut inner = self.inner.lock();
            inner.devices.insert(candidate.device_name.clone(), Arc::clone(&session));
            inner.listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_new_device(&session);
        }
    }

    /// Resolves a tty entry to a matching USB device, or `None`.
    fn probe(&self, tty_name: &str) -> Option<Candidate> {
        let class_entry = self.config.tty_class_dir.join(tty_name);
        let resolved = std::fs::canonicalize(&class_entry).ok()?;
        // <...>/<interface>/tty/<ttyACMx> — two levels up is the USB
        // interface, three is the device carrying the serial attribute.
        let interface = resolved.parent()?.parent()?;
        let uevent = std::fs::read_to_string(interface.join("uevent")).ok()?;
        if !matches_uevent(&uevent, &self.config.filter) {
            return None;
        }

        let serial_path = interface.parent()?.join("serial");
        let serial = match std::fs::read_to_string(&serial_path) {
            Ok(s) => s.trim().to_owned(),
            Err(_) => {
                debug!(tty = tty_name, "matching interface without a serial attribute");
                return None;
            }
        };
        if serial.is_empty() {
            debug!(tty = tty_name, "empty serial attribute");
            return None;
        }

        Some(Candidate {
            device_name: format!("{}-{serial}", self.config.provider_tag),
            device_file: self.config.dev_dir.join(tty_name),
        })
    }
}

impl FsListener for Detector {
    fn on_fs_event(&self, _path: &Path, event_mask: u32, name: Option<&str>) {
        if event_mask & (mask::CREATE | mask::ATTRIB) == 0 || event_mask & mask::IS_DIR != 0 {
            return;
        }
        let Some(name) = name else { return };
        if let Some(this) = self.self_weak.upgrade() {
            this.check_candidate(name);
        }
    }
}

impl DeviceListener for Detector {
    fn on_state_change(&self, device: &str, state: DeviceState) {
        if state.is_operational() {
            return;
        }
        if self.inner.lock().devices.remove(device).is_some() {
            info!(device, state = %state, "device session retired");
        }
    }
}

/// uevent must report a cdc_acm USB interface with the configured
/// vendor/product pair (`PRODUCT=<vid>/<pid>/<rev>`, hex, no padding).
fn matches_uevent(contents: &str, filter: &UsbFilter) -> bool {
    let mut usb_interface = false;
    let mut cdc_acm = false;
    let mut product_matches = false;
    for line in contents.lines() {
        match line.trim() {
            "DEVTYPE=usb_interface" => usb_interface = true,
            "DRIVER=cdc_acm" => cdc_acm = true,
            other => {
                if let Some(product) = other.strip_prefix("PRODUCT=") {
                    let mut parts = product.split('/');
                    let vid = parts.next().and_then(|v| u16::from_str_radix(v, 16).ok());
                    let pid = parts.next().and_then(|p| u16::from_str_radix(p, 16).ok());
                    product_matches = vid == Some(filter.vid) && pid == Some(filter.pid);
                }
            }
        }
    }
    usb_interface && cdc_acm && product_matches
}

/// Read/write, non-blocking, no controlling terminal.
fn test_open(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
        .open(path)
        .map(|_| ())
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
