use serde::Serialize;
use std::fmt;

/// Sensor-level read failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// Temperature/humidity driver returned not-a-number (bus or read failure)
    SensorTimeout,
    /// Luminosity read error or raw value outside the declared range
    OutOfRange,
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorFault::SensorTimeout => write!(f, "sensor timeout"),
            SensorFault::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// One tick's worth of readings. Absent fields are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub luminosity: Option<f64>,
    pub fault: Option<SensorFault>,
}

/// Canonical wire record. Field order is the JSON field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub id: i64,
    pub timestamp: u64,
    pub temperature: f64,
    pub humidity: f64,
    pub luminosity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LinkUp,
    SecureSessionUp,
    BrokerConnected,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::LinkUp => "LinkUp",
            SessionState::SecureSessionUp => "SecureSessionUp",
            SessionState::BrokerConnected => "BrokerConnected",
            SessionState::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

/// What a single sampling tick ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotReady,
    SensorFault(SensorFault),
    PayloadRejected,
    Published,
    PublishFailed,
}
