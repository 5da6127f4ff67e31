// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing::{error, info, warn};

use herd_proto::topic::TopicSpace;
use herd_proto::transport::{Broker, MqttTransport};

use herdd::aliases::AliasStore;
use herdd::bridge::{DaemonBridge, DeviceHost};
use herdd::config::Config;
use herdd::device::Detector;
use herdd::fswatch::FsWatcher;
use herdd::reactor::{Policy, Reactor};

fn main() {
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    init_tracing(&config);

    if let Err(e) = run(config) {
        error!("fatal: {e:#}");
        std::process::exit(2);
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    // Block the shutdown signals before any worker thread spawns so they
    // are only ever delivered to the wait below.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;

    let client_id = config.client_id()?;
    info!(client_id = %client_id, "starting herdd");

    let normal = Reactor::new("herdd-events", Policy::Normal)?;
    let serial_policy = if config.no_realtime { Policy::Normal } else { Policy::Realtime };
    let rt = Reactor::new("herdd-serial", serial_policy)?;

    let watcher = FsWatcher::new(&normal)?;

    let aliases = AliasStore::open(config.aliases_file());
    if let Err(e) = aliases.watch_file(&watcher) {
        warn!("alias file not watched for external edits: {e}");
    }

    let detector = Detector::new(config.detector_config(), Arc::clone(&rt), Arc::clone(&normal));

    let transport = Arc::new(MqttTransport::connect(&config.broker_config(&client_id))?);
    let bridge = DaemonBridge::new(
        Arc::clone(&transport) as Arc<dyn Broker>,
        Arc::clone(&detector) as Arc<dyn DeviceHost>,
        Arc::clone(&aliases),
        TopicSpace::new(config.prefix.clone()),
        &client_id,
    );

    bridge.start(&transport, &detector);
    transport.start()?;
    detector.start(&watcher)?;

    let signal = signals.wait()?;
    info!(signal = %signal, "shutting down");

    detector.shutdown_all();
    bridge.shutdown();
    transport.stop();
    rt.shutdown();
    normal.shutdown();
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
