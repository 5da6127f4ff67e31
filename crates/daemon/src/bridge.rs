// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge between local device sessions and the broker bus.
//!
//! Publishes retained state/progress/sensor messages under
//! `<prefix>/clients/<id>/<device>/...`, answers print requests, and keeps
//! the retained alias table current. The bridge tracks every retained
//! topic it ever set: a disconnecting device gets its `state` and
//! `print_progress` retained messages cleared (plus one non-retained
//! DISCONNECTED notification for live subscribers), and shutdown clears
//! the whole ledger so no stale fleet state survives the process.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use herd_proto::state::{DeviceState, PrintResult, SensorValue};
use herd_proto::topic::{DeviceChannel, ParsedTopic, TopicSpace};
use herd_proto::transport::{Broker, MessageListener, MqttTransport};
use herd_proto::wire::{
    AliasesMsg, AliasesSetMsg, AliasesSetProviderMsg, DeviceStateMsg, PrintMsg, PrintProgressMsg,
    PrintResponseMsg, SensorReadingsMsg,
};

use crate::aliases::{AliasListener, AliasStore};
use crate::device::{Detector, DetectorListener, DeviceListener, DeviceSession};

/// The bridge's view of the local device fleet: route a print job to a
/// device by name.
pub trait DeviceHost: Send + Sync {
    fn print(&self, device: &str, gcode: &str) -> PrintResult;
}

impl DeviceHost for Detector {
    fn print(&self, device: &str, gcode: &str) -> PrintResult {
        match self.find_device(device) {
            Some(session) => session.print(gcode),
            None => PrintResult::NetErrNoDevice,
        }
    }
}

/// Maps device sessions onto broker topics and back.
pub struct DaemonBridge {
    broker: Arc<dyn Broker>,
    host: Arc<dyn DeviceHost>,
    aliases: Arc<AliasStore>,
    topics: TopicSpace,
    client_id: String,
    retained: Mutex<BTreeSet<String>>,
    self_weak: Weak<Self>,
}

impl DaemonBridge {
    pub fn new(
        broker: Arc<dyn Broker>,
        host: Arc<dyn DeviceHost>,
        aliases: Arc<AliasStore>,
        topics: TopicSpace,
        client_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            broker,
            host,
            aliases,
            topics,
            client_id: client_id.into(),
            retained: Mutex::new(BTreeSet::new()),
            self_weak: self_weak.clone(),
        })
    }

    /// Subscribes the bridge everywhere it listens: broker inbound topics,
    /// the alias store, and the detector (which replays known devices).
    pub fn start(self: &Arc<Self>, transport: &MqttTransport, detector: &Arc<Detector>) {
        transport.register_listener(Arc::clone(self) as Arc<dyn MessageListener>);
        self.broker.subscribe(&self.topics.own_print_requests(&self.client_id));
        self.broker.subscribe(&self.topics.aliases_set(&self.client_id));

        let as_alias_listener: Arc<dyn AliasListener> = Arc::clone(self) as Arc<dyn AliasListener>;
        self.aliases.subscribe(&as_alias_listener);
        self.publish_aliases();

        let as_detector_listener: Arc<dyn DetectorListener> =
            Arc::clone(self) as Arc<dyn DetectorListener>;
        detector.register_on_new_device(&as_detector_listener);
        info!(client_id = %self.client_id, "daemon bridge started");
    }

    /// Clears every retained topic this process ever set.
    pub fn shutdown(&self) {
        let topics: Vec<String> = {
            let mut retained = self.retained.lock();
            std::mem::take(&mut *retained).into_iter().collect()
        };
        for topic in topics {
            self.broker.publish(&topic, &[], true);
        }
        info!(client_id = %self.client_id, "daemon bridge shut down, retained state cleared");
    }

    /// Republishes the full retained alias table.
    pub fn publish_aliases(&self) {
        let msg = AliasesMsg {
            provider_alias: self.aliases.provider_alias().unwrap_or_default(),
            aliases: self.aliases.get_all(),
        };
        let mut payload = BytesMut::new();
        if let Err(e) = msg.encode(&mut payload) {
            warn!("alias table not publishable: {e}");
            return;
        }
        let topic = self.topics.aliases(&self.client_id);
        self.broker.publish(&topic, &payload, true);
        self.retained.lock().insert(topic);
    }

    fn handle_print_request(&self, device: &str, payload: &[u8]) {
        let print = match PrintMsg::decode(payload) {
            Ok((msg, _)) => msg,
            Err(e) => {
                // No response: the requesting client will time out.
                warn!(device, "dropping undecodable print request: {e}");
                return;
            }
        };

        let result = self.host.print(device, &print.gcode);
        info!(device, request = %print.request_code, result = %result, "print request handled");

        let mut payload = BytesMut::new();
        PrintResponseMsg::new(print.request_code, result).encode(&mut payload);
        let topic = self.topics.device(&self.client_id, device, DeviceChannel::PrintResponse);
        self.broker.publish(&topic, &payload, false);
    }

    fn handle_alias_set(&self, payload: &[u8]) {
        if let Ok((msg, _)) = AliasesSetMsg::decode(payload) {
            if !self.aliases.set_alias(&msg.device_name, &msg.device_alias) {
                warn!(device = %msg.device_name, "alias write rejected");
            }
            return;
        }
        match AliasesSetProviderMsg::decode(payload) {
            Ok((msg, _)) => {
                if !self.aliases.set_provider_alias(&msg.provider_alias) {
                    warn!("provider alias write rejected");
                }
            }
            Err(e) => warn!("dropping undecodable alias-set message: {e}"),
        }
    }
}

impl DetectorListener for DaemonBridge {
    fn on_new_device(&self, session: &Arc<DeviceSession>) {
        if let Some(this) = self.self_weak.upgrade() {
            let as_listener: Arc<dyn DeviceListener> = this as Arc<dyn DeviceListener>;
            session.register_listener(&as_listener);
        }
        self.on_state_change(session.name(), session.state());
    }
}

impl DeviceListener for DaemonBridge {
    fn on_state_change(&self, device: &str, state: DeviceState) {
        let mut payload = BytesMut::new();
        DeviceStateMsg::new(state).encode(&mut payload);
        let state_topic = self.topics.device(&self.client_id, device, DeviceChannel::State);

        if state == DeviceState::Disconnected {
            let progress_topic =
                self.topics.device(&self.client_id, device, DeviceChannel::PrintProgress);
            self.broker.publish(&state_topic, &[], true);
            self.broker.publish(&progress_topic, &[], true);
            {
                let mut retained = self.retained.lock();
                retained.remove(&state_topic);
                retained.remove(&progress_topic);
            }
            // Live subscribers still need to hear about the disconnect.
            self.broker.publish(&state_topic, &payload, false);
        } else {
            self.broker.publish(&state_topic, &payload, true);
            self.retained.lock().insert(state_topic);
        }
    }

    fn on_print_progress(&self, device: &str, percentage: u8, remaining_minutes: u32) {
        let mut payload = BytesMut::new();
        PrintProgressMsg::new(percentage, remaining_minutes).encode(&mut payload);
        let topic = self.topics.device(&self.client_id, device, DeviceChannel::PrintProgress);
        self.broker.publish(&topic, &payload, true);
        self.retained.lock().insert(topic);
    }

    fn on_sensor_update(
        &self,
        device: &str,
        readings: &std::collections::BTreeMap<String, SensorValue>,
    ) {
        let msg = SensorReadingsMsg::new(readings.clone());
        let mut payload = BytesMut::new();
        if let Err(e) = msg.encode(&mut payload) {
            warn!(device, "sensor readings not publishable: {e}");
            return;
        }
        let topic = self.topics.device(&self.client_id, device, DeviceChannel::SensorReadings);
        self.broker.publish(&topic, &payload, true);
        self.retained.lock().insert(topic);
    }
}

impl AliasListener for DaemonBridge {
    fn on_alias_change(&self) {
        self.publish_aliases();
    }
}

impl MessageListener for DaemonBridge {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        match self.topics.parse(topic) {
            Some(ParsedTopic::Device { provider, device, channel: DeviceChannel::PrintRequest })
                if provider == self.client_id =>
            {
                self.handle_print_request(&device, payload);
            }
            Some(ParsedTopic::AliasesSet { provider }) if provider == self.client_id => {
                self.handle_alias_set(payload);
            }
            _ => debug!(topic, "message on unexpected topic"),
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
