/// Sensor sampling and per-sensor validation
use log::{debug, warn};

use crate::config::TickPolicy;
use crate::models::{Sample, SensorFault};
use crate::sensors::backend::SensorBackend;

pub struct SensorReader<B: SensorBackend> {
    backend: B,
    ldr_raw_max: Option<f64>,
    fail_fast: bool,
}

impl<B: SensorBackend> SensorReader<B> {
    pub fn new(backend: B, ldr_raw_max: Option<f64>, policy: TickPolicy) -> Self {
        SensorReader {
            backend,
            ldr_raw_max,
            fail_fast: policy.sensor_fail_fast,
        }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read every sensor once and validate each reading independently
    ///
    /// The returned sample has `fault == None` only if all three readings are
    /// usable. Unusable readings are left absent and the first fault seen is
    /// recorded. Nothing is retried here; the next tick reads again.
    pub fn read_sample(&mut self) -> Sample {
        let mut sample = Sample::default();

        let temperature = self.backend.read_temperature();
        if temperature.is_finite() {
            sample.temperature = Some(temperature);
        } else {
            warn!("Failed to read temperature from DHT sensor");
            sample.fault = Some(SensorFault::SensorTimeout);
            if self.fail_fast {
                return sample;
            }
        }

        let humidity = self.backend.read_humidity();
        if humidity.is_finite() {
            sample.humidity = Some(humidity);
        } else {
            warn!("Failed to read humidity from DHT sensor");
            sample.fault.get_or_insert(SensorFault::SensorTimeout);
            if self.fail_fast {
                return sample;
            }
        }

        match self.backend.read_luminosity() {
            Ok(raw) if self.luminosity_in_range(raw) => sample.luminosity = Some(raw),
            Ok(raw) => {
                warn!("Luminosity raw value {} outside the valid range", raw);
                sample.fault.get_or_insert(SensorFault::OutOfRange);
            }
            Err(e) => {
                warn!("Failed to read luminosity from LDR sensor: {}", e);
                sample.fault.get_or_insert(SensorFault::OutOfRange);
            }
        }

        debug!(
            "Sample: temperature={:?} humidity={:?} luminosity={:?} fault={:?}",
            sample.temperature, sample.humidity, sample.luminosity, sample.fault
        );
        sample
    }

    fn luminosity_in_range(&self, raw: f64) -> bool {
        if !raw.is_finite() {
            return false;
        }
        match self.ldr_raw_max {
            Some(max) => (0.0..=max).contains(&raw),
            None => true,
        }
    }
}
