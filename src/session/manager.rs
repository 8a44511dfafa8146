/// Network link, secure session and broker connection state machine
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::config::BackoffPolicy;
use crate::error::{Result, TelemetryError};
use crate::models::SessionState;
use crate::session::backoff::Backoff;
use crate::session::transport::Transport;

/// Sole owner of the session state and the transport handle
pub struct SessionManager<T: Transport> {
    transport: T,
    state: SessionState,
    trust_anchor: Vec<u8>,
    backoff: Backoff,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, trust_anchor: Vec<u8>, backoff: BackoffPolicy) -> Self {
        SessionManager {
            transport,
            state: SessionState::Disconnected,
            trust_anchor,
            backoff: Backoff::new(backoff),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Advance the session by at most one transition and report readiness
    ///
    /// Returns true only in `BrokerConnected`. When already connected only a
    /// liveness check runs. While a backoff delay is pending no attempt is made.
    pub async fn ensure_ready(&mut self) -> bool {
        let from = self.state;
        let attempt = match from {
            SessionState::Faulted => {
                debug!("Session is faulted, not attempting to connect");
                return false;
            }
            SessionState::BrokerConnected => {
                return match self.transport.check_alive().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Liveness check failed: {}", e);
                        self.drop_session();
                        false
                    }
                };
            }
            _ if !self.backoff.ready(Instant::now()) => {
                debug!("Reconnect backoff pending in state {}", from);
                return false;
            }
            SessionState::Disconnected => self
                .transport
                .associate_link()
                .await
                .map(|()| SessionState::LinkUp),
            SessionState::LinkUp => self.secure_session().await,
            SessionState::SecureSessionUp => self
                .transport
                .authenticate_broker()
                .await
                .map(|()| SessionState::BrokerConnected),
        };

        match attempt {
            Ok(next) => {
                info!("Session {} -> {}", from, next);
                self.backoff.reset();
                self.state = next;
            }
            Err(TelemetryError::TrustAnchor(reason)) => {
                error!("Trust anchor rejected, session faulted: {}", reason);
                self.transport.reset();
                self.state = SessionState::Faulted;
            }
            Err(e) => {
                let next = fallback(from);
                let delay = self.backoff.record_failure(Instant::now());
                warn!(
                    "{} (session {} -> {}, next attempt in {:?})",
                    e, from, next, delay
                );
                if next == SessionState::Disconnected {
                    self.transport.reset();
                }
                self.state = next;
            }
        }

        self.state == SessionState::BrokerConnected
    }

    /// Submit a payload over the live broker session
    ///
    /// A transport error tears the session down so the next `ensure_ready`
    /// starts over instead of trusting a stale connection.
    pub async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.state != SessionState::BrokerConnected {
            return Err(TelemetryError::NotConnected);
        }
        if let Err(e) = self.transport.send(topic, payload).await {
            self.drop_session();
            return Err(e);
        }
        Ok(())
    }

    async fn secure_session(&mut self) -> Result<SessionState> {
        self.transport.install_trust_anchor(&self.trust_anchor)?;
        self.transport.secure_handshake().await?;
        Ok(SessionState::SecureSessionUp)
    }

    fn drop_session(&mut self) {
        info!("Session {} -> {}", self.state, SessionState::Disconnected);
        self.transport.reset();
        self.state = SessionState::Disconnected;
    }
}

/// Where a failed attempt from `state` falls back to
fn fallback(state: SessionState) -> SessionState {
    match state {
        SessionState::SecureSessionUp => SessionState::LinkUp,
        SessionState::Faulted => SessionState::Faulted,
        _ => SessionState::Disconnected,
    }
}
