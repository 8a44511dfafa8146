pub mod backoff;
pub mod manager;
pub mod transport;

#[cfg(test)]
pub mod scripted;

pub use manager::SessionManager;
pub use transport::{MqttTransport, Transport};
