/// Fixed-cadence sampling and publishing
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::TickPolicy;
use crate::models::TickOutcome;
use crate::payload::{self, Clock};
use crate::publisher::Publisher;
use crate::sensors::{SensorBackend, SensorReader};
use crate::session::{SessionManager, Transport};

pub struct Sampler<T: Transport, B: SensorBackend, C: Clock> {
    session: SessionManager<T>,
    reader: SensorReader<B>,
    publisher: Publisher,
    clock: C,
    device_id: i64,
    policy: TickPolicy,
}

impl<T: Transport, B: SensorBackend, C: Clock> Sampler<T, B, C> {
    pub fn new(
        session: SessionManager<T>,
        reader: SensorReader<B>,
        publisher: Publisher,
        clock: C,
        device_id: i64,
        policy: TickPolicy,
    ) -> Self {
        Sampler {
            session,
            reader,
            publisher,
            clock,
            device_id,
            policy,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    #[cfg(test)]
    pub fn session_mut(&mut self) -> &mut SessionManager<T> {
        &mut self.session
    }

    /// One pass of session check, sample, build, publish
    ///
    /// Each step runs only after the previous one returned and every failure
    /// ends the tick; nothing carries over except the session state.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.session.ensure_ready().await {
            if self.policy.read_when_offline {
                let sample = self.reader.read_sample();
                info!(
                    "Offline reading: temperature={:?} humidity={:?} luminosity={:?} fault={:?}",
                    sample.temperature, sample.humidity, sample.luminosity, sample.fault
                );
            }
            return TickOutcome::NotReady;
        }

        let sample = self.reader.read_sample();
        if let Some(fault) = sample.fault {
            return TickOutcome::SensorFault(fault);
        }

        let record = match payload::build(&sample, self.device_id, &self.clock) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping sample: {}", e);
                return TickOutcome::PayloadRejected;
            }
        };

        if self.publisher.publish(&mut self.session, &record).await {
            TickOutcome::Published
        } else {
            TickOutcome::PublishFailed
        }
    }

    /// Tick forever at the given cadence
    pub async fn run(&mut self, every: Duration) {
        info!("Sampling every {:?}", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.tick().await {
                TickOutcome::NotReady => {
                    debug!("Session {} not ready, skipping tick", self.session.state())
                }
                TickOutcome::SensorFault(fault) => warn!("Skipping tick, sensor fault: {}", fault),
                TickOutcome::PayloadRejected => warn!("Skipping tick, payload rejected"),
                TickOutcome::Published => debug!("Tick published"),
                TickOutcome::PublishFailed => warn!("Tick publish failed, will reconnect"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffPolicy;
    use crate::error::TelemetryError;
    use crate::models::{SensorFault, SessionState, TelemetryRecord};
    use crate::payload::FixedClock;
    use crate::sensors::backend::FixedSensors;
    use crate::session::scripted::ScriptedTransport;

    type TestSampler = Sampler<ScriptedTransport, FixedSensors, FixedClock>;

    fn sampler(transport: ScriptedTransport, sensors: FixedSensors, policy: TickPolicy) -> TestSampler {
        let session = SessionManager::new(
            transport,
            b"pem".to_vec(),
            BackoffPolicy::Fixed(Duration::ZERO),
        );
        Sampler::new(
            session,
            SensorReader::new(sensors, None, policy),
            Publisher::new("sensor/readings"),
            FixedClock::at(1_700_000_000),
            1,
            policy,
        )
    }

    async fn connect(sampler: &mut TestSampler) {
        while !sampler.session_mut().ensure_ready().await {}
    }

    fn good_sensors() -> FixedSensors {
        FixedSensors::new(22.5, 48.0, Some(512.0))
    }

    #[tokio::test]
    async fn nan_temperature_produces_no_publish() {
        let mut s = sampler(
            ScriptedTransport::default(),
            FixedSensors::new(f64::NAN, 48.0, Some(512.0)),
            TickPolicy::default(),
        );
        connect(&mut s).await;

        assert_eq!(s.tick().await, TickOutcome::SensorFault(SensorFault::SensorTimeout));
        assert_eq!(s.session().transport().calls.send, 0);
    }

    #[tokio::test]
    async fn valid_sample_is_published_exactly_once() {
        let mut s = sampler(ScriptedTransport::default(), good_sensors(), TickPolicy::default());
        connect(&mut s).await;

        assert_eq!(s.tick().await, TickOutcome::Published);

        let sent = &s.session().transport().sent;
        assert_eq!(sent.len(), 1);
        let record: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        let expected = TelemetryRecord {
            id: 1,
            timestamp: 1_700_000_000,
            temperature: 22.5,
            humidity: 48.0,
            luminosity: 512.0,
        };
        assert_eq!(record, serde_json::to_value(&expected).unwrap());
    }

    #[tokio::test]
    async fn unreachable_link_skips_ticks_without_publishing() {
        let mut transport = ScriptedTransport::default();
        for _ in 0..3 {
            transport.link.push_back(ScriptedTransport::link_down());
        }
        let mut s = sampler(transport, good_sensors(), TickPolicy::default());

        for _ in 0..3 {
            assert_eq!(s.tick().await, TickOutcome::NotReady);
            assert_eq!(s.session().state(), SessionState::Disconnected);
        }
        assert_eq!(s.session().transport().calls.send, 0);
        // Strict policy: sensors are not even read while offline
        assert_eq!(s.reader.backend().reads, 0);
    }

    #[tokio::test]
    async fn offline_reading_policy_reads_but_never_publishes() {
        let policy = TickPolicy {
            read_when_offline: true,
            sensor_fail_fast: false,
        };
        let mut s = sampler(ScriptedTransport::default(), good_sensors(), policy);

        assert_eq!(s.tick().await, TickOutcome::NotReady);
        assert_eq!(s.reader.backend().reads, 3);
        assert_eq!(s.session().transport().calls.send, 0);
    }

    #[tokio::test]
    async fn publish_failure_forces_reverification_next_tick() {
        let mut s = sampler(ScriptedTransport::default(), good_sensors(), TickPolicy::default());
        connect(&mut s).await;

        let transport = s.session_mut().transport_mut();
        transport
            .send
            .push_back(Err(TelemetryError::PublishRejected("connection reset".into())));
        transport.link.push_back(ScriptedTransport::link_down());

        assert_eq!(s.tick().await, TickOutcome::PublishFailed);

        // Link is gone: no stale readiness, no publish
        assert_eq!(s.tick().await, TickOutcome::NotReady);
        assert_eq!(s.session().state(), SessionState::Disconnected);
        assert_eq!(s.session().transport().calls.send, 1);
    }

    #[tokio::test]
    async fn publish_only_follows_a_ready_check_in_the_same_tick() {
        let mut s = sampler(ScriptedTransport::default(), good_sensors(), TickPolicy::default());

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(s.tick().await);
        }
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::NotReady,
                TickOutcome::NotReady,
                TickOutcome::Published,
                TickOutcome::Published,
                TickOutcome::Published,
            ]
        );
        let calls = s.session().transport().calls;
        assert_eq!(calls.send, 3);
        assert_eq!(calls.alive, 2);
    }

    #[tokio::test]
    async fn lost_liveness_skips_the_tick() {
        let mut s = sampler(ScriptedTransport::default(), good_sensors(), TickPolicy::default());
        connect(&mut s).await;
        s.session_mut()
            .transport_mut()
            .alive
            .push_back(ScriptedTransport::link_down());

        assert_eq!(s.tick().await, TickOutcome::NotReady);
        assert_eq!(s.session().transport().calls.send, 0);
    }
}
