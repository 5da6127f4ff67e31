// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> Config {
    match Config::try_parse_from(std::iter::once("herdd").chain(args.iter().copied())) {
        Ok(config) => config,
        Err(e) => unreachable!("arguments must parse: {e}"),
    }
}

#[test]
fn defaults_are_sensible() {
    let config = parse(&[]);
    assert_eq!(config.broker, "localhost");
    assert_eq!(config.port, 1883);
    assert_eq!(config.prefix, "herd");
    assert_eq!(config.usb_vid, 0x2c99);
    assert_eq!(config.usb_pid, 0x0002);
    assert!(!config.no_realtime);
    assert!(config.validate().is_ok());
    assert_eq!(config.id_file(), std::path::PathBuf::from("/var/lib/herdd/id"));
    assert_eq!(config.aliases_file(), std::path::PathBuf::from("/var/lib/herdd/aliases.json"));
}

#[test]
fn hex_ids_accept_an_0x_prefix() {
    let config = parse(&["--usb-vid", "0x2c99", "--usb-pid", "0x0001"]);
    assert_eq!(config.usb_vid, 0x2c99);
    assert_eq!(config.usb_pid, 0x0001);
}

#[test]
fn cert_without_key_fails_validation() {
    let config = parse(&["--tls-cert", "/tmp/cert.pem"]);
    assert!(config.validate().is_err());
}

#[test]
fn insecure_with_ca_fails_validation() {
    let config = parse(&["--tls-insecure", "--tls-ca", "/tmp/ca.pem"]);
    assert!(config.validate().is_err());
}

#[test]
fn bad_log_format_fails_validation() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn client_id_is_created_then_reloaded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = parse(&["--state-dir", &dir.path().to_string_lossy()]);

    let first = config.client_id()?;
    assert_eq!(first.len(), 32);
    assert!(first.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

    // Persisted without a trailing newline.
    let on_disk = std::fs::read(config.id_file())?;
    assert_eq!(on_disk, first.as_bytes());

    let second = config.client_id()?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn invalid_id_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let id_path = dir.path().join("id");
    std::fs::write(&id_path, "NOT-A-VALID-ID")?;
    let config = parse(&["--id-file", &id_path.to_string_lossy()]);
    assert!(config.client_id().is_err());
    Ok(())
}

#[test]
fn uppercase_hex_id_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let id_path = dir.path().join("id");
    std::fs::write(&id_path, "0123456789ABCDEF0123456789ABCDEF")?;
    let config = parse(&["--id-file", &id_path.to_string_lossy()]);
    assert!(config.client_id().is_err());
    Ok(())
}

#[test]
fn unwritable_id_location_falls_back_to_temp() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // A file where a directory is needed: creation can never succeed.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"")?;
    let id_path = blocker.join("id");
    let config = parse(&["--id-file", &id_path.to_string_lossy()]);

    let id = config.client_id()?;
    assert!(id.starts_with("temp-"));
    assert_eq!(id.len(), "temp-".len() + 32);
    Ok(())
}

#[test]
fn broker_config_collects_tls_options() {
    let config = parse(&["--tls-ca", "/tmp/ca.pem", "--user", "u", "--password", "pw"]);
    let broker = config.broker_config("0123456789abcdef0123456789abcdef");
    assert_eq!(broker.client_id, "0123456789abcdef0123456789abcdef");
    assert_eq!(broker.username.as_deref(), Some("u"));
    let Some(tls) = broker.tls else {
        unreachable!("TLS options must be collected");
    };
    assert_eq!(tls.ca, Some(std::path::PathBuf::from("/tmp/ca.pem")));
    assert!(!tls.insecure);
}

#[test]
fn detector_config_uses_overridden_paths() {
    let config = parse(&["--tty-class-dir", "/tmp/sys-tty", "--dev-dir", "/tmp/devs"]);
    let detector = config.detector_config();
    assert_eq!(detector.tty_class_dir, std::path::PathBuf::from("/tmp/sys-tty"));
    assert_eq!(detector.dev_dir, std::path::PathBuf::from("/tmp/devs"));
    assert_eq!(detector.provider_tag, "prusa");
}
