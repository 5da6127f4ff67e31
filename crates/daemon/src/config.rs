// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::warn;
use uuid::Uuid;

use herd_proto::transport::{BrokerConfig, TlsOptions};

use crate::device::detector::{DetectorConfig, UsbFilter};

/// G-code fleet daemon: exposes serial printers over an MQTT bus.
#[derive(Debug, Parser)]
#[command(name = "herdd", version, about)]
pub struct Config {
    /// Hostname or IP of the MQTT broker.
    #[arg(short = 'b', long, env = "HERDD_BROKER", default_value = "localhost")]
    pub broker: String,

    /// Port of the MQTT broker.
    #[arg(short = 'p', long, env = "HERDD_PORT", default_value = "1883")]
    pub port: u16,

    /// Topic prefix the fleet is exposed under.
    #[arg(long, env = "HERDD_PREFIX", default_value = "herd")]
    pub prefix: String,

    /// Username for the broker connection.
    #[arg(long, env = "HERDD_USER")]
    pub user: Option<String>,

    /// Password for the broker connection.
    #[arg(long, env = "HERDD_PASSWORD")]
    pub password: Option<String>,

    /// Give up after this many consecutive failed connect attempts
    /// (default: retry forever).
    #[arg(long, env = "HERDD_CONNECT_RETRIES")]
    pub connect_retries: Option<u32>,

    /// CA bundle for TLS to the broker.
    #[arg(long, env = "HERDD_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Client certificate (requires --tls-key).
    #[arg(long, env = "HERDD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Client key (requires --tls-cert).
    #[arg(long, env = "HERDD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Accept any broker certificate.
    #[arg(long, env = "HERDD_TLS_INSECURE")]
    pub tls_insecure: bool,

    /// Directory holding the persistent id and alias files.
    #[arg(long, env = "HERDD_STATE_DIR", default_value = "/var/lib/herdd")]
    pub state_dir: PathBuf,

    /// Override the id file location.
    #[arg(long, env = "HERDD_ID_FILE")]
    pub id_file: Option<PathBuf>,

    /// Override the alias database location.
    #[arg(long, env = "HERDD_ALIASES_FILE")]
    pub aliases_file: Option<PathBuf>,

    /// USB vendor id of the printers to detect (hex).
    #[arg(long, env = "HERDD_USB_VID", default_value = "2c99", value_parser = parse_hex16)]
    pub usb_vid: u16,

    /// USB product id of the printers to detect (hex).
    #[arg(long, env = "HERDD_USB_PID", default_value = "0002", value_parser = parse_hex16)]
    pub usb_pid: u16,

    /// tty class directory to enumerate.
    #[arg(long, env = "HERDD_TTY_CLASS_DIR", default_value = "/sys/class/tty")]
    pub tty_class_dir: PathBuf,

    /// Device directory holding the tty nodes.
    #[arg(long, env = "HERDD_DEV_DIR", default_value = "/dev")]
    pub dev_dir: PathBuf,

    /// Keep the serial reactor at normal scheduling priority.
    #[arg(long, env = "HERDD_NO_REALTIME")]
    pub no_realtime: bool,

    /// Log format (json or text).
    #[arg(long, env = "HERDD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HERDD_LOG_LEVEL", default_value = "info")]
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
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        Ok(())
    }

    pub fn id_file(&self) -> PathBuf {
        self.id_file.clone().unwrap_or_else(|| self.state_dir.join("id"))
    }

    pub fn aliases_file(&self) -> PathBuf {
        self.aliases_file.clone().unwrap_or_else(|| self.state_dir.join("aliases.json"))
    }

    /// Loads the persistent client id, creating the id file on first start.
    /// When the file cannot be created a volatile `temp-` id is used
    /// instead. Invalid file content is an error so a corrupt id never
    /// silently forks the daemon's identity.
    pub fn client_id(&self) -> anyhow::Result<String> {
        let path = self.id_file();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let id = contents.trim_end().to_owned();
                if !valid_client_id(&id) {
                    anyhow::bail!(
                        "id file {} contains an invalid id; delete it to have a new one generated",
                        path.display()
                    );
                }
                Ok(id)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = Uuid::new_v4().simple().to_string();
                let written = path
                    .parent()
                    .map(std::fs::create_dir_all)
                    .unwrap_or(Ok(()))
                    .and_then(|()| std::fs::write(&path, id.as_bytes()));
                match written {
                    Ok(()) => Ok(id),
                    Err(e) => {
                        warn!(path = %path.display(), "cannot persist client id, using a temporary one: {e}");
                        Ok(format!("temp-{id}"))
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), "cannot read client id, using a temporary one: {e}");
                Ok(format!("temp-{}", Uuid::new_v4().simple()))
            }
        }
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
            connect_retries: self.connect_retries,
            tls,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            provider_tag: "prusa".to_owned(),
            filter: UsbFilter { vid: self.usb_vid, pid: self.usb_pid },
            tty_class_dir: self.tty_class_dir.clone(),
            dev_dir: self.dev_dir.clone(),
        }
    }
}

/// 32 lowercase hex characters.
fn valid_client_id(id: &str) -> bool {
    id.len() == 32 && id.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn parse_hex16(raw: &str) -> Result<u16, String> {
    let trimmed = raw.trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16).map_err(|e| format!("invalid hex value {raw:?}: {e}"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
