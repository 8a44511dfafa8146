use log::{debug, info};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport as WireTransport,
};
use std::fs;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tokio::time::timeout;

use crate::config::ConnectionConfig;
use crate::error::{Result, TelemetryError};

// Bound on a single liveness poll, and on how many queued events one check drains
const LIVENESS_POLL: Duration = Duration::from_millis(50);
const LIVENESS_MAX_EVENTS: usize = 16;
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Network capabilities the session state machine drives, one attempt per call
///
/// Every operation is bounded by the implementation's own timeouts and is never
/// retried internally.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn associate_link(&mut self) -> Result<()>;
    fn install_trust_anchor(&mut self, pem: &[u8]) -> Result<()>;
    async fn secure_handshake(&mut self) -> Result<()>;
    async fn authenticate_broker(&mut self) -> Result<()>;
    async fn check_alive(&mut self) -> Result<()>;
    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
    /// Drop every session resource
    fn reset(&mut self);
}

/// Build a TLS connector that trusts only the given root certificates
pub fn create_ssl_connector(ca_certs: &[X509]) -> std::result::Result<SslConnector, String> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| format!("SSL builder error: {}", e))?;

    let mut store = X509StoreBuilder::new().map_err(|e| format!("X509 store error: {}", e))?;
    for cert in ca_certs {
        store
            .add_cert(cert.clone())
            .map_err(|e| format!("Error loading CA cert: {}", e))?;
    }
    builder.set_cert_store(store.build());
    builder.set_verify(SslVerifyMode::PEER);

    Ok(builder.build())
}

/// MQTT over TLS to the configured broker
pub struct MqttTransport {
    config: ConnectionConfig,
    broker_addr: Option<SocketAddr>,
    trust_anchor: Option<Vec<u8>>,
    connector: Option<SslConnector>,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
}

impl MqttTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        MqttTransport {
            config,
            broker_addr: None,
            trust_anchor: None,
            connector: None,
            client: None,
            eventloop: None,
        }
    }

    fn interface_up(&self) -> Result<()> {
        let Some(iface) = &self.config.link_interface else {
            return Ok(());
        };
        let path = format!("/sys/class/net/{}/operstate", iface);
        let state = fs::read_to_string(&path)
            .map_err(|e| TelemetryError::LinkFailure(format!("cannot read {}: {}", path, e)))?;
        if state.trim() == "up" {
            Ok(())
        } else {
            Err(TelemetryError::LinkFailure(format!(
                "interface {} is {}",
                iface,
                state.trim()
            )))
        }
    }
}

impl Transport for MqttTransport {
    async fn associate_link(&mut self) -> Result<()> {
        if let Some(ssid) = &self.config.wifi_ssid {
            debug!("Checking link on network '{}'", ssid);
        }
        self.interface_up()?;

        let host = self.config.broker_host.as_str();
        let port = self.config.broker_port;
        let mut addrs = match timeout(
            self.config.connect_timeout,
            tokio::net::lookup_host((host, port)),
        )
        .await
        {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                return Err(TelemetryError::LinkFailure(format!(
                    "cannot resolve {}: {}",
                    host, e
                )))
            }
            Err(_) => {
                return Err(TelemetryError::LinkFailure(format!(
                    "resolving {} timed out",
                    host
                )))
            }
        };

        let addr = addrs.next().ok_or_else(|| {
            TelemetryError::LinkFailure(format!("{} resolved to no addresses", host))
        })?;
        info!("Link up, broker {} at {}", host, addr);
        self.broker_addr = Some(addr);
        Ok(())
    }

    fn install_trust_anchor(&mut self, pem: &[u8]) -> Result<()> {
        let certs = X509::stack_from_pem(pem).map_err(|e| TelemetryError::TrustAnchor(e.to_string()))?;
        if certs.is_empty() {
            return Err(TelemetryError::TrustAnchor(
                "no certificate found in PEM".into(),
            ));
        }
        let connector = create_ssl_connector(&certs).map_err(TelemetryError::TrustAnchor)?;
        debug!("Installed {} trust anchor certificate(s)", certs.len());
        self.connector = Some(connector);
        self.trust_anchor = Some(pem.to_vec());
        Ok(())
    }

    async fn secure_handshake(&mut self) -> Result<()> {
        let addr = self.broker_addr.ok_or_else(|| {
            TelemetryError::SecureHandshakeFailure("link is not associated".into())
        })?;
        let connector = self.connector.clone().ok_or_else(|| {
            TelemetryError::SecureHandshakeFailure("no trust anchor installed".into())
        })?;
        let host = self.config.broker_host.clone();
        let connect_timeout = self.config.connect_timeout;

        // Blocking socket with its own timeouts, kept off the async thread
        let version = tokio::task::spawn_blocking(move || -> std::result::Result<String, String> {
            let stream = TcpStream::connect_timeout(&addr, connect_timeout)
                .map_err(|e| format!("TCP connect to {} failed: {}", addr, e))?;
            stream
                .set_read_timeout(Some(connect_timeout))
                .and_then(|_| stream.set_write_timeout(Some(connect_timeout)))
                .map_err(|e| format!("socket setup failed: {}", e))?;

            let mut tls = connector
                .connect(&host, stream)
                .map_err(|e| format!("TLS handshake with {} failed: {}", host, e))?;
            let version = tls.ssl().version_str().to_string();
            let _ = tls.shutdown();
            Ok(version)
        })
        .await
        .map_err(|e| TelemetryError::SecureHandshakeFailure(e.to_string()))?
        .map_err(TelemetryError::SecureHandshakeFailure)?;

        info!("Broker certificate verified ({})", version);
        Ok(())
    }

    async fn authenticate_broker(&mut self) -> Result<()> {
        let ca = self.trust_anchor.clone().ok_or_else(|| {
            TelemetryError::BrokerAuthFailure("no trust anchor installed".into())
        })?;

        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(&self.config.username, &self.config.password);
        options.set_transport(WireTransport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let connack = timeout(self.config.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(ack)) if ack.code == ConnectReturnCode::Success => {
                info!(
                    "Broker accepted client '{}' as '{}'",
                    self.config.client_id, self.config.username
                );
                self.client = Some(client);
                self.eventloop = Some(eventloop);
                Ok(())
            }
            Ok(Ok(ack)) => Err(TelemetryError::BrokerAuthFailure(format!(
                "broker refused connection: {:?}",
                ack.code
            ))),
            Ok(Err(e)) => Err(TelemetryError::BrokerAuthFailure(e.to_string())),
            Err(_) => Err(TelemetryError::BrokerAuthFailure(format!(
                "no CONNACK within {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    async fn check_alive(&mut self) -> Result<()> {
        self.interface_up()?;
        let eventloop = self.eventloop.as_mut().ok_or(TelemetryError::NotConnected)?;

        // Drain whatever is pending; a quiet connection is a live one
        for _ in 0..LIVENESS_MAX_EVENTS {
            match timeout(LIVENESS_POLL, eventloop.poll()).await {
                Err(_) => return Ok(()),
                Ok(Ok(event)) => debug!("Liveness event: {:?}", event),
                Ok(Err(e)) => {
                    return Err(TelemetryError::LinkFailure(format!(
                        "connection lost: {}",
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let client = self.client.as_ref().ok_or(TelemetryError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TelemetryError::PublishRejected(e.to_string()))?;

        let eventloop = self.eventloop.as_mut().ok_or(TelemetryError::NotConnected)?;
        let written = timeout(self.config.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TelemetryError::PublishRejected(e.to_string())),
            Err(_) => Err(TelemetryError::PublishRejected(
                "publish was not written before the timeout".into(),
            )),
        }
    }

    fn reset(&mut self) {
        self.client = None;
        self.eventloop = None;
        self.broker_addr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn connection(host: &str) -> ConnectionConfig {
        ConnectionConfig {
            wifi_ssid: None,
            link_interface: None,
            broker_host: host.to_string(),
            broker_port: 8883,
            client_id: "envoy-test".into(),
            username: "device".into(),
            password: "secret".into(),
            topic: "sensor/readings".into(),
            trust_anchor: Vec::new(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
        }
    }

    fn self_signed_pem() -> Vec<u8> {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "envoy-test-ca").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build().to_pem().unwrap()
    }

    #[test]
    fn valid_pem_installs_a_trust_anchor() {
        let mut transport = MqttTransport::new(connection("127.0.0.1"));
        transport.install_trust_anchor(&self_signed_pem()).unwrap();
        assert!(transport.connector.is_some());
    }

    #[test]
    fn malformed_or_empty_pem_is_a_trust_anchor_error() {
        let mut transport = MqttTransport::new(connection("127.0.0.1"));
        for pem in [&b""[..], &b"not a certificate"[..]] {
            let err = transport.install_trust_anchor(pem).unwrap_err();
            assert!(matches!(err, TelemetryError::TrustAnchor(_)));
        }
    }

    #[tokio::test]
    async fn link_resolves_a_literal_broker_address() {
        let mut transport = MqttTransport::new(connection("127.0.0.1"));
        transport.associate_link().await.unwrap();
        assert_eq!(
            transport.broker_addr,
            Some("127.0.0.1:8883".parse().unwrap())
        );

        transport.reset();
        assert_eq!(transport.broker_addr, None);
    }

    #[tokio::test]
    async fn handshake_requires_link_and_trust_anchor() {
        let mut transport = MqttTransport::new(connection("127.0.0.1"));
        let err = transport.secure_handshake().await.unwrap_err();
        assert!(matches!(err, TelemetryError::SecureHandshakeFailure(_)));

        transport.associate_link().await.unwrap();
        let err = transport.secure_handshake().await.unwrap_err();
        assert!(matches!(err, TelemetryError::SecureHandshakeFailure(_)));
    }

    #[tokio::test]
    async fn no_broker_session_means_not_alive_and_no_send() {
        let mut transport = MqttTransport::new(connection("127.0.0.1"));
        assert!(transport.check_alive().await.is_err());
        let err = transport.send("sensor/readings", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, TelemetryError::NotConnected));
    }
}
