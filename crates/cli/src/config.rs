// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use herd_proto::transport::{BrokerConfig, TlsOptions};

/// Shared flags of every `herd` invocation.
#[derive(Debug, Parser)]
pub struct Config {
    /// Hostname or IP of the MQTT broker.
    #[arg(short = 'b', long, env = "HERD_BROKER", default_value = "localhost")]
    pub broker: String,

    /// Port of the MQTT broker.
    #[arg(short = 'p', long, env = "HERD_PORT", default_value = "1883")]
    pub port: u16,

    /// Topic prefix the fleet is exposed under.
    #[arg(long, env = "HERD_PREFIX", default_value = "herd")]
    pub prefix: String,

    /// Username for the broker connection.
    #[arg(long, env = "HERD_USER")]
    pub user: Option<String>,

    /// Password for the broker connection.
    #[arg(long, env = "HERD_PASSWORD")]
    pub password: Option<String>,

    /// Give up after this many consecutive failed connect attempts.
    #[arg(long, env = "HERD_CONNECT_RETRIES", default_value = "3")]
    pub connect_retries: u32,

    /// CA bundle for TLS to the broker.
    #[arg(long, env = "HERD_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Client certificate (requires --tls-key).
    #[arg(long, env = "HERD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Client key (requires --tls-cert).
    #[arg(long, env = "HERD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Accept any broker certificate.
    #[arg(long, env = "HERD_TLS_INSECURE")]
    pub tls_insecure: bool,

    /// Do not resolve aliases; always show real device and provider names.
    #[arg(short = 'r', long, env = "HERD_REAL_NAMES")]
    pub real_names: bool,

    /// Time to gather the retained fleet state before running the command.
    #[arg(long, env = "HERD_SETTLE_MS", default_value = "300")]
    pub settle_ms: u64,

    /// Print request timeout.
    #[arg(long, env = "HERD_PRINT_TIMEOUT_MS", default_value = "1000")]
    pub print_timeout_ms: u64,

    /// Log level for diagnostics on stderr.
    #[arg(long, env = "HERD_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            anyhow::bail!("--tls-cert and --tls-key must be provided together");
        }
        if self.tls_insecure && self.tls_ca.is_some() {
            anyhow::bail!("--tls-insecure and --tls-ca are mutually exclusive");
        }
        Ok(())
    }

    pub fn resolve_aliases(&self) -> bool {
        !self.real_names
    }

    pub fn broker_config(&self, client_id: &str) -> BrokerConfig {
        let tls = if self.tls_insecure || self.tls_ca.is_some() || self.tls_cert.is_some() {
            Some(TlsOptions {
                ca: self.tls_ca.clone(),
                client_cert: self.tls_cert.clone(),
                client_key: self.tls_key.clone(),
                insecure: self.tls_insecure,
            })
        } else {
            None
        };
        BrokerConfig {
            host: self.broker.clone(),
            port: self.port,
            client_id: client_id.to_owned(),
            username: self.user.clone(),
            password: self.password.clone(),
            connect_retries: Some(self.connect_retries),
            tls,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
