/// Encoding and submission of telemetry records
use log::{error, info};

use crate::models::TelemetryRecord;
use crate::session::{SessionManager, Transport};
use crate::utils::format_unix;

pub struct Publisher {
    topic: String,
}

impl Publisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Publisher {
            topic: topic.into(),
        }
    }

    /// Encode the record and hand it to the session under the configured topic
    ///
    /// Returns true when the transport accepted the message for sending. There
    /// is no retry here; on failure the session has already been torn down and
    /// the caller reconnects through `ensure_ready` on a later tick.
    pub async fn publish<T: Transport>(
        &self,
        session: &mut SessionManager<T>,
        record: &TelemetryRecord,
    ) -> bool {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode record: {}", e);
                return false;
            }
        };
        let body = String::from_utf8_lossy(&payload).into_owned();

        match session.send(&self.topic, payload).await {
            Ok(()) => {
                info!(
                    "Message sent ({}) at {}: {}",
                    self.topic,
                    format_unix(record.timestamp),
                    body
                );
                true
            }
            Err(e) => {
                error!("Failed to publish to {}: {}", self.topic, e);
                false
            }
        }
    }
}
