// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized fleet view.
//!
//! Subscribes to every daemon's state, progress, sensor and alias topics
//! and keeps three relations current: `devices` keyed by
//! `(provider, device)`, `provider_alias` keyed by provider, and
//! `sensor_readings` keyed by `(provider, device, sensor)`. All updates
//! are upserts; a sensor message replaces the device's full reading set.
//! Print requests are correlated by their 128-bit request code against a
//! pending table; a scanner pass every 100 ms fires `NET_ERR_TIMEOUT` for
//! entries past their deadline.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use herd_proto::state::{DeviceState, PrintResult, SensorValue};
use herd_proto::topic::{DeviceChannel, ParsedTopic, TopicSpace};
use herd_proto::transport::{Broker, MessageListener, MqttTransport};
use herd_proto::wire::{
    AliasesMsg, AliasesSetMsg, AliasesSetProviderMsg, DeviceStateMsg, PrintMsg, PrintProgressMsg,
    PrintResponseMsg, SensorReadingsMsg,
};

use crate::hint::Hint;

const SCANNER_INTERVAL: Duration = Duration::from_millis(100);

/// One fleet device as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub provider: String,
    pub name: String,
    pub state: DeviceState,
    pub print_percentage: u8,
    pub print_remaining_time: u32,
    pub device_alias: Option<String>,
    pub provider_alias: Option<String>,
}

impl DeviceInfo {
    pub fn provider_label(&self, resolve_aliases: bool) -> &str {
        if resolve_aliases {
            self.provider_alias.as_deref().unwrap_or(&self.provider)
        } else {
            &self.provider
        }
    }

    pub fn device_label(&self, resolve_aliases: bool) -> &str {
        if resolve_aliases {
            self.device_alias.as_deref().unwrap_or(&self.name)
        } else {
            &self.name
        }
    }
}

/// One sensor reading row produced by [`FleetView::sensor_readings`],
/// labels already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReadingRow {
    pub provider_label: String,
    pub device_label: String,
    pub sensor_name: String,
    pub value: SensorValue,
}

pub type PrintCallback = Box<dyn FnOnce(&DeviceInfo, PrintResult) + Send>;

#[derive(Debug, Default, Clone)]
struct DeviceRow {
    state: DeviceState,
    print_percentage: u8,
    print_remaining_time: u32,
    device_alias: Option<String>,
}

struct PendingPrint {
    deadline: Instant,
    device: DeviceInfo,
    callback: PrintCallback,
}

#[derive(Default)]
struct ViewInner {
    devices: BTreeMap<(String, String), DeviceRow>,
    provider_aliases: BTreeMap<String, String>,
    sensors: BTreeMap<(String, String, String), SensorValue>,
    pending: HashMap<(u64, u64), PendingPrint>,
}

/// Queryable materialization of the whole fleet.
pub struct FleetView {
    topics: TopicSpace,
    broker: Arc<dyn Broker>,
    print_timeout: Duration,
    inner: Mutex<ViewInner>,
    scanner_stop: Arc<AtomicBool>,
    scanner: Mutex<Option<JoinHandle<()>>>,
    self_weak: Weak<Self>,
}

impl FleetView {
    pub fn new(broker: Arc<dyn Broker>, topics: TopicSpace, print_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            topics,
            broker,
            print_timeout,
            inner: Mutex::new(ViewInner::default()),
            scanner_stop: Arc::new(AtomicBool::new(false)),
            scanner: Mutex::new(None),
            self_weak: self_weak.clone(),
        })
    }

    /// Wires the view to the transport and starts the timeout scanner.
    pub fn start(self: &Arc<Self>, transport: &MqttTransport) {
        transport.register_listener(Arc::clone(self) as Arc<dyn MessageListener>);
        self.subscribe_topics();
        self.start_scanner();
    }

    pub fn subscribe_topics(&self) {
        self.broker.subscribe(&self.topics.any_device(DeviceChannel::State));
        self.broker.subscribe(&self.topics.any_device(DeviceChannel::PrintResponse));
        self.broker.subscribe(&self.topics.any_device(DeviceChannel::PrintProgress));
        self.broker.subscribe(&self.topics.any_device(DeviceChannel::SensorReadings));
        self.broker.subscribe(&self.topics.any_aliases());
    }

    /// Spawns the pending-print timeout scanner. The scanner is the single
    /// cancellation authority: every expired entry fires exactly once.
    pub fn start_scanner(self: &Arc<Self>) {
        let mut scanner = self.scanner.lock();
        if scanner.is_some() {
            return;
        }
        self.scanner_stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.scanner_stop);
        let weak = Weak::clone(&self.self_weak);
        let handle = std::thread::Builder::new()
            .name("print-timeouts".to_owned())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(SCANNER_INTERVAL);
                    let Some(view) = weak.upgrade() else { break };
                    view.expire_pending();
                }
            });
        match handle {
            Ok(handle) => *scanner = Some(handle),
            Err(e) => warn!("timeout scanner not started: {e}"),
        }
    }

    pub fn stop(&self) {
        self.scanner_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scanner.lock().take() {
            let _ = handle.join();
        }
    }

    /// Devices matching `hint`, UNINITIALIZED rows excluded, ordered by
    /// `(device_alias, device, provider_alias, provider)` with absent
    /// aliases first.
    pub fn list(&self, hint: &str, resolve_aliases: bool) -> anyhow::Result<Vec<DeviceInfo>> {
        let hint = Hint::parse(hint)?;
        let mut rows: Vec<DeviceInfo> = {
            let inner = self.inner.lock();
            inner
                .devices
                .iter()
                .filter(|(_, row)| row.state != DeviceState::Uninitialized)
                .map(|((provider, device), row)| DeviceInfo {
                    provider: provider.clone(),
                    name: device.clone(),
                    state: row.state,
                    print_percentage: row.print_percentage,
                    print_remaining_time: row.print_remaining_time,
                    device_alias: row.device_alias.clone(),
                    provider_alias: inner.provider_aliases.get(provider).cloned(),
                })
                .filter(|info| {
                    hint.provider_matches(info.provider_label(resolve_aliases))
                        && hint.device_matches(info.device_label(resolve_aliases))
                })
                .collect()
        };
        rows.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        Ok(rows)
    }

    /// Distinct providers matching a provider-only hint (no `/` allowed).
    pub fn providers(&self, hint: &str) -> anyhow::Result<Vec<String>> {
        if hint.contains('/') {
            anyhow::bail!("HINT contains invalid characters ('/')");
        }
        let hint = Hint::parse(&format!("{hint}/*"))?;
        let inner = self.inner.lock();
        let mut providers: Vec<String> = inner
            .devices
            .keys()
            .map(|(provider, _)| provider.clone())
            .filter(|provider| hint.provider_matches(provider))
            .collect();
        providers.dedup();
        Ok(providers)
    }

    pub fn provider_aliases(&self) -> BTreeMap<String, String> {
        self.inner.lock().provider_aliases.clone()
    }

    /// Device-name → alias for every aliased device in the fleet.
    pub fn device_aliases(&self) -> BTreeMap<String, String> {
        self.inner
            .lock()
            .devices
            .iter()
            .filter_map(|((_, device), row)| {
                row.device_alias.as_ref().map(|alias| (device.clone(), alias.clone()))
            })
            .collect()
    }

    /// Sensor readings for matching devices, ordered like [`FleetView::list`]
    /// with the sensor name as final key.
    pub fn sensor_readings(
        &self,
        hint: &str,
        resolve_aliases: bool,
    ) -> anyhow::Result<Vec<SensorReadingRow>> {
        let devices = self.list(hint, resolve_aliases)?;
        let inner = self.inner.lock();
        let mut rows = Vec::new();
        for device in &devices {
            let lo = (device.provider.clone(), device.name.clone(), String::new());
            rows.extend(
                inner
                    .sensors
                    .range(lo..)
                    .take_while(|((p, d, _), _)| *p == device.provider && *d == device.name)
                    .map(|((_, _, sensor), value)| SensorReadingRow {
                        provider_label: device.provider_label(resolve_aliases).to_owned(),
                        device_label: device.device_label(resolve_aliases).to_owned(),
                        sensor_name: sensor.clone(),
                        value: value.clone(),
                    }),
            );
        }
        Ok(rows)
    }

    /// Dispatches a print request. The callback fires exactly once: with
    /// the daemon's response, or `NET_ERR_TIMEOUT` after the deadline, or
    /// `ERR_INVALID_STATE` immediately when the device is not ready.
    pub fn print(&self, device: &DeviceInfo, gcode: &str, callback: PrintCallback) {
        if device.state != DeviceState::Ok {
            callback(device, PrintResult::ErrInvalidState);
            return;
        }

        let msg = PrintMsg::new(gcode);
        let key = (msg.request_code.part1(), msg.request_code.part2());
        let mut payload = BytesMut::new();
        msg.encode(&mut payload);

        self.inner.lock().pending.insert(
            key,
            PendingPrint {
                deadline: Instant::now() + self.print_timeout,
                device: device.clone(),
                callback,
            },
        );

        let topic = self.topics.device(&device.provider, &device.name, DeviceChannel::PrintRequest);
        self.broker.publish(&topic, &payload, false);
    }

    /// Resolves `hint` against the raw provider set; on a unique match the
    /// provider-alias write is published to that daemon.
    pub fn set_provider_alias(&self, hint: &str, alias: &str) -> anyhow::Result<bool> {
        let providers = self.providers(hint)?;
        let [provider] = providers.as_slice() else {
            return Ok(false);
        };
        let mut payload = BytesMut::new();
        AliasesSetProviderMsg::new(alias).encode(&mut payload)?;
        self.broker.publish(&self.topics.aliases_set(provider), &payload, false);
        Ok(true)
    }

    /// Resolves `hint` against real names; on a unique match the device
    /// alias write is published to the owning daemon.
    pub fn set_device_alias(&self, hint: &str, alias: &str) -> anyhow::Result<bool> {
        let devices = self.list(hint, false)?;
        let [device] = devices.as_slice() else {
            return Ok(false);
        };
        let mut payload = BytesMut::new();
        AliasesSetMsg::new(&device.name, alias).encode(&mut payload)?;
        self.broker.publish(&self.topics.aliases_set(&device.provider), &payload, false);
        Ok(true)
    }

    fn expire_pending(&self) {
        let now = Instant::now();
        let expired: Vec<PendingPrint> = {
            let mut inner = self.inner.lock();
            let keys: Vec<(u64, u64)> = inner
                .pending
                .iter()
                .filter(|(_, p)| now > p.deadline)
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| inner.pending.remove(k)).collect()
        };
        for pending in expired {
            (pending.callback)(&pending.device, PrintResult::NetErrTimeout);
        }
    }

    fn handle_state(&self, provider: String, device: String, payload: &[u8]) {
        if payload.is_empty() {
            // Retained-state clear; the non-retained DISCONNECTED follows.
            return;
        }
        match DeviceStateMsg::decode(payload) {
            Ok((msg, _)) => {
                let mut inner = self.inner.lock();
                inner.devices.entry((provider, device)).or_default().state = msg.state;
            }
            Err(e) => debug!("dropping malformed state message: {e}"),
        }
    }

    fn handle_progress(&self, provider: String, device: String, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        match PrintProgressMsg::decode(payload) {
            Ok((msg, _)) => {
                let mut inner = self.inner.lock();
                let row = inner.devices.entry((provider, device)).or_default();
                row.print_percentage = msg.percentage;
                row.print_remaining_time = msg.remaining_time;
            }
            Err(e) => debug!("dropping malformed progress message: {e}"),
        }
    }

    fn handle_sensor_readings(&self, provider: String, device: String, payload: &[u8]) {
        let readings = if payload.is_empty() {
            BTreeMap::new()
        } else {
            match SensorReadingsMsg::decode(payload) {
                Ok((msg, _)) => msg.readings,
                Err(e) => {
                    debug!("dropping malformed sensor message: {e}");
                    return;
                }
            }
        };

        let mut inner = self.inner.lock();
        // The message replaces the device's full reading set.
        inner.sensors.retain(|(p, d, _), _| *p != provider || *d != device);
        for (sensor, value) in readings {
            inner.sensors.insert((provider.clone(), device.clone(), sensor), value);
        }
    }

    fn handle_print_response(&self, payload: &[u8]) {
        let msg = match PrintResponseMsg::decode(payload) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!("dropping malformed print response: {e}");
                return;
            }
        };
        let key = (msg.request_code.part1(), msg.request_code.part2());
        let pending = self.inner.lock().pending.remove(&key);
        match pending {
            Some(pending) => (pending.callback)(&pending.device, msg.result),
            // A response nobody waits for (already timed out, or another
            // client's request).
            None => debug!(request = %msg.request_code, "unmatched print response"),
        }
    }

    fn handle_aliases(&self, provider: String, payload: &[u8]) {
        let msg = match AliasesMsg::decode(payload) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!("dropping malformed aliases message: {e}");
                return;
            }
        };
        let mut inner = self.inner.lock();
        if msg.provider_alias.is_empty() {
            inner.provider_aliases.remove(&provider);
        } else {
            inner.provider_aliases.insert(provider.clone(), msg.provider_alias);
        }
        for (device, alias) in msg.aliases {
            inner
                .devices
                .entry((provider.clone(), device))
                .or_default()
                .device_alias = Some(alias);
        }
    }
}

impl MessageListener for FleetView {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        match self.topics.parse(topic) {
            Some(ParsedTopic::Device { provider, device, channel }) => match channel {
                DeviceChannel::State => self.handle_state(provider, device, payload),
                DeviceChannel::PrintProgress => self.handle_progress(provider, device, payload),
                DeviceChannel::SensorReadings => {
                    self.handle_sensor_readings(provider, device, payload)
                }
                DeviceChannel::PrintResponse => self.handle_print_response(payload),
                DeviceChannel::PrintRequest => {}
            },
            Some(ParsedTopic::Aliases { provider }) => self.handle_aliases(provider, payload),
            Some(ParsedTopic::AliasesSet { .. }) => {}
            None => debug!(topic, "message on unexpected topic"),
        }
    }
}

impl Drop for FleetView {
    fn drop(&mut self) {
        self.scanner_stop.store(true, Ordering::SeqCst);
    }
}

/// SQL-style ordering: absent aliases sort first.
fn order_key(info: &DeviceInfo) -> (Option<String>, String, Option<String>, String) {
    (
        info.device_alias.clone(),
        info.name.clone(),
        info.provider_alias.clone(),
        info.provider.clone(),
    )
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;
