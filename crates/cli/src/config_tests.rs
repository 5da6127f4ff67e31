// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

#[derive(Parser)]
struct Wrapper {
    #[command(flatten)]
    config: Config,
}

fn parse(args: &[&str]) -> Config {
    match Wrapper::try_parse_from(std::iter::once("herd").chain(args.iter().copied())) {
        Ok(wrapper) => wrapper.config,
        Err(e) => unreachable!("arguments must parse: {e}"),
    }
}

#[test]
fn defaults_are_sensible() {
    let config = parse(&[]);
    assert_eq!(config.broker, "localhost");
    assert_eq!(config.port, 1883);
    assert_eq!(config.prefix, "herd");
    assert_eq!(config.connect_retries, 3);
    assert_eq!(config.settle_ms, 300);
    assert_eq!(config.print_timeout_ms, 1000);
    assert!(config.resolve_aliases());
    assert!(config.validate().is_ok());
}

#[test]
fn real_names_disables_alias_resolution() {
    let config = parse(&["-r"]);
    assert!(!config.resolve_aliases());
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
fn broker_config_carries_credentials_and_retry_cap() {
    let config = parse(&["--user", "u", "--password", "pw", "--connect-retries", "7"]);
    let broker = config.broker_config("herd-test");
    assert_eq!(broker.client_id, "herd-test");
    assert_eq!(broker.username.as_deref(), Some("u"));
    assert_eq!(broker.password.as_deref(), Some("pw"));
    assert_eq!(broker.connect_retries, Some(7));
    assert!(broker.tls.is_none());
}

#[test]
fn insecure_tls_is_collected() {
    let config = parse(&["--tls-insecure"]);
    let broker = config.broker_config("herd-test");
    let Some(tls) = broker.tls else {
        unreachable!("TLS options must be collected");
    };
    assert!(tls.insecure);
    assert!(tls.ca.is_none());
}
