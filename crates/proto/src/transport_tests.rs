// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config() -> BrokerConfig {
    BrokerConfig {
        host: "localhost".to_owned(),
        port: 1883,
        client_id: "test-client".to_owned(),
        username: None,
        password: None,
        connect_retries: Some(1),
        tls: None,
    }
}

#[test]
fn connect_is_lazy_and_queues_requests() -> anyhow::Result<()> {
    // No broker is running; configuration and request queueing must still
    // work, the worker only fails once it is started.
    let transport = MqttTransport::connect(&config())?;
    transport.subscribe("herd/clients/+/+/state");
    transport.subscribe("herd/clients/+/+/state");
    transport.publish("herd/aliases/x", &[0x05, 0x00], true);
    assert_eq!(transport.shared.topics.lock().len(), 1);
    Ok(())
}

#[test]
fn tls_without_ca_is_rejected() {
    let tls = TlsOptions::default();
    let err = match build_tls(&tls) {
        Err(e) => e.to_string(),
        Ok(_) => String::new(),
    };
    assert!(err.contains("CA bundle"), "unexpected error: {err}");
}

#[test]
fn tls_cert_without_key_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ca = dir.path().join("ca.pem");
    std::fs::write(&ca, b"not a real cert")?;
    let tls = TlsOptions {
        ca: Some(ca.clone()),
        client_cert: Some(ca),
        client_key: None,
        insecure: false,
    };
    let err = match build_tls(&tls) {
        Err(e) => e.to_string(),
        Ok(_) => String::new(),
    };
    assert!(err.contains("together"), "unexpected error: {err}");
    Ok(())
}

#[test]
fn insecure_mode_needs_no_ca() {
    let tls = TlsOptions { insecure: true, ..TlsOptions::default() };
    assert!(build_tls(&tls).is_ok());
}

#[test]
fn ca_based_tls_reads_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ca = dir.path().join("ca.pem");
    std::fs::write(&ca, b"pem bytes")?;
    let tls = TlsOptions { ca: Some(ca), ..TlsOptions::default() };
    match build_tls(&tls)? {
        TlsConfiguration::Simple { ca, alpn, client_auth } => {
            assert_eq!(ca, b"pem bytes");
            assert!(alpn.is_none());
            assert!(client_auth.is_none());
        }
        _ => anyhow::bail!("expected the simple CA-based configuration"),
    }
    Ok(())
}
