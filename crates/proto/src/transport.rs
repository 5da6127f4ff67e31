// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker transport facade.
//!
//! Wraps a synchronous MQTT client behind a minimal publish/subscribe
//! surface. The connection loop runs on a dedicated worker thread which
//! redelivers `on_message` callbacks, resubscribes the maintained topic set
//! after every (re)connect and retries failed connections indefinitely
//! unless a retry cap is configured. All traffic is QoS 0.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tracing::{debug, error, info, warn};

/// Publish/subscribe surface the bridge and the fleet view talk to.
pub trait Broker: Send + Sync {
    /// Fire-and-forget QoS 0 publish.
    fn publish(&self, topic: &str, payload: &[u8], retained: bool);

    /// Adds the topic to the maintained subscription set.
    fn subscribe(&self, topic: &str);
}

/// Receives every message delivered on a subscribed topic.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// TLS settings for the broker connection. Server trust comes from a CA
/// bundle, optionally with a client certificate/key pair; `insecure`
/// disables certificate verification entirely (self-signed brokers).
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure: bool,
}

/// Connection settings for [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Give up after this many consecutive failed connect attempts.
    /// `None` retries forever.
    pub connect_retries: Option<u32>,
    pub tls: Option<TlsOptions>,
}

const KEEPALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_QUEUE_CAP: usize = 100;

struct Shared {
    topics: Mutex<BTreeSet<String>>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    running: AtomicBool,
}

/// MQTT-backed [`Broker`] implementation.
pub struct MqttTransport {
    client: Client,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connect_retries: Option<u32>,
}

impl MqttTransport {
    pub fn connect(config: &BrokerConfig) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(KEEPALIVE);
        options.set_clean_session(true);
        if let Some(user) = &config.username {
            options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
        }
        if let Some(tls) = &config.tls {
            let tls_config = build_tls(tls)?;
            options.set_transport(Transport::tls_with_config(tls_config));
        }

        let (client, connection) = Client::new(options, REQUEST_QUEUE_CAP);
        info!(host = %config.host, port = config.port, client_id = %config.client_id, "broker transport configured");

        Ok(Self {
            client,
            shared: Arc::new(Shared {
                topics: Mutex::new(BTreeSet::new()),
                listeners: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
            connection: Mutex::new(Some(connection)),
            worker: Mutex::new(None),
            connect_retries: config.connect_retries,
        })
    }

    /// Registers a message listener. Listeners added after `start()` still
    /// receive subsequent messages.
    pub fn register_listener(&self, listener: Arc<dyn MessageListener>) {
        self.shared.listeners.lock().push(listener);
    }

    /// Spawns the connection worker. Idempotent.
    pub fn start(&self) -> anyhow::Result<()> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let client = self.client.clone();
        let retry_cap = self.connect_retries;
        let handle = std::thread::Builder::new()
            .name("broker".to_owned())
            .spawn(move || run_connection(connection, client, shared, retry_cap))
            .context("spawning broker worker")?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Disconnects and joins the worker thread.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            debug!("broker disconnect: {e}");
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("broker worker exited abnormally");
            }
        }
    }
}

impl Broker for MqttTransport {
    fn publish(&self, topic: &str, payload: &[u8], retained: bool) {
        // Best-effort: a publish while disconnected is dropped, the retained
        // fleet state is republished on the next state change anyway.
        if let Err(e) = self.client.try_publish(topic, QoS::AtMostOnce, retained, payload.to_vec()) {
            warn!(topic, "broker publish failed: {e}");
        }
    }

    fn subscribe(&self, topic: &str) {
        let inserted = self.shared.topics.lock().insert(topic.to_owned());
        if inserted {
            if let Err(e) = self.client.try_subscribe(topic, QoS::AtMostOnce) {
                debug!(topic, "subscribe deferred until (re)connect: {e}");
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

fn run_connection(
    mut connection: Connection,
    client: Client,
    shared: Arc<Shared>,
    retry_cap: Option<u32>,
) {
    let mut failures = 0u32;
    for event in connection.iter() {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                failures = 0;
                info!(session_present = ack.session_present, "broker connected");
                let topics: Vec<String> = shared.topics.lock().iter().cloned().collect();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(&topic, QoS::AtMostOnce) {
                        warn!(topic, "resubscribe failed: {e}");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let listeners: Vec<Arc<dyn MessageListener>> =
                    shared.listeners.lock().iter().cloned().collect();
                for listener in listeners {
                    listener.on_message(&publish.topic, &publish.payload);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // MQTT 3.1.1 brokers drop the connection on session
                // takeover instead of sending a reason code.
                info!("broker requested disconnect (session takeover); continuing");
            }
            Ok(_) => {}
            Err(e) => {
                failures = failures.saturating_add(1);
                if let Some(cap) = retry_cap {
                    if failures >= cap {
                        error!("broker unreachable after {failures} attempts, giving up: {e}");
                        break;
                    }
                }
                info!("broker connection lost, retrying: {e}");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    debug!("broker worker shutting down");
}

fn build_tls(tls: &TlsOptions) -> anyhow::Result<TlsConfiguration> {
    if tls.insecure {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(insecure::NoVerifier))
            .with_no_client_auth();
        return Ok(TlsConfiguration::Rustls(Arc::new(config)));
    }

    let ca_path = tls.ca.as_ref().context("TLS requires a CA bundle (or the insecure toggle)")?;
    let ca = std::fs::read(ca_path).with_context(|| format!("reading CA bundle {}", ca_path.display()))?;
    let client_auth = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let cert = std::fs::read(cert).with_context(|| format!("reading client cert {}", cert.display()))?;
            let key = std::fs::read(key).with_context(|| format!("reading client key {}", key.display()))?;
            Some((cert, key))
        }
        (None, None) => None,
        _ => anyhow::bail!("client certificate and key must be provided together"),
    };
    Ok(TlsConfiguration::Simple { ca, alpn: None, client_auth })
}

mod insecure {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate. Only reachable through the explicit
    /// insecure toggle.
    #[derive(Debug)]
    pub(super) struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
