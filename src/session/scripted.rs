/// Transport double whose operations follow a per-operation script
use std::collections::VecDeque;

use crate::error::{Result, TelemetryError};
use crate::session::transport::Transport;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub link: usize,
    pub trust_anchor: usize,
    pub handshake: usize,
    pub auth: usize,
    pub alive: usize,
    pub send: usize,
    pub reset: usize,
}

/// Unscripted calls succeed
#[derive(Default)]
pub struct ScriptedTransport {
    pub link: VecDeque<Result<()>>,
    pub handshake: VecDeque<Result<()>>,
    pub auth: VecDeque<Result<()>>,
    pub alive: VecDeque<Result<()>>,
    pub send: VecDeque<Result<()>>,
    pub calls: Calls,
    pub sent: Vec<(String, Vec<u8>)>,
}

impl ScriptedTransport {
    pub fn link_down() -> Result<()> {
        Err(TelemetryError::LinkFailure("no carrier".into()))
    }
}

impl Transport for ScriptedTransport {
    async fn associate_link(&mut self) -> Result<()> {
        self.calls.link += 1;
        self.link.pop_front().unwrap_or(Ok(()))
    }

    fn install_trust_anchor(&mut self, pem: &[u8]) -> Result<()> {
        self.calls.trust_anchor += 1;
        if pem.is_empty() {
            return Err(TelemetryError::TrustAnchor("empty PEM".into()));
        }
        Ok(())
    }

    async fn secure_handshake(&mut self) -> Result<()> {
        self.calls.handshake += 1;
        self.handshake.pop_front().unwrap_or(Ok(()))
    }

    async fn authenticate_broker(&mut self) -> Result<()> {
        self.calls.auth += 1;
        self.auth.pop_front().unwrap_or(Ok(()))
    }

    async fn check_alive(&mut self) -> Result<()> {
        self.calls.alive += 1;
        self.alive.pop_front().unwrap_or(Ok(()))
    }

    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.calls.send += 1;
        let outcome = self.send.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.sent.push((topic.to_string(), payload));
        }
        outcome
    }

    fn reset(&mut self) {
        self.calls.reset += 1;
    }
}
