mod config;
mod error;
mod models;
mod payload;
mod publisher;
mod sampling;
mod sensors;
mod session;
mod utils;

use log::{error, info};

use config::{AgentConfig, SensorBackendKind};
use payload::{MonotonicClock, SystemClock};
use publisher::Publisher;
use sampling::Sampler;
use sensors::{IioSensors, SensorBackend, SensorReader, SimulatedSensors};
use session::{MqttTransport, SessionManager};

async fn main_loop<B: SensorBackend>(config: AgentConfig, backend: B) {
    info!("Starting telemetry agent for device {}", config.device_id);

    let trust_anchor = config.connection.trust_anchor.clone();
    let publisher = Publisher::new(config.connection.topic.clone());
    let session = SessionManager::new(
        MqttTransport::new(config.connection),
        trust_anchor,
        config.backoff,
    );
    let reader = SensorReader::new(backend, config.sensor_pins.ldr_raw_max, config.tick_policy);

    let mut sampler = Sampler::new(
        session,
        reader,
        publisher,
        MonotonicClock::new(SystemClock),
        config.device_id,
        config.tick_policy,
    );
    sampler.run(config.sample_interval).await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match AgentConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let agent = async move {
        match config.sensor_backend {
            SensorBackendKind::Iio => {
                let backend = IioSensors::new(&config.sensor_pins);
                main_loop(config, backend).await
            }
            SensorBackendKind::Simulated => {
                info!("Using simulated sensor readings");
                main_loop(config, SimulatedSensors).await
            }
        }
    };

    // Run the agent until Ctrl+C
    tokio::select! {
        _ = agent => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Agent terminated by user. Exiting.");
        }
    }

    Ok(())
}
