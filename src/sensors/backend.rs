/// Sensor backends: Linux IIO sysfs drivers and a simulated source for bench runs
use log::debug;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SensorPins;
use crate::error::{Result, TelemetryError};
use crate::models::SensorFault;

// DHT11/DHT22 IIO driver attributes, reported in milli-units
const DHT_TEMPERATURE_ATTR: &str = "in_temp_input";
const DHT_HUMIDITY_ATTR: &str = "in_humidityrelative_input";
const MILLI: f64 = 1000.0;

/// One physical conversion per call; implementations must not retry
pub trait SensorBackend {
    /// Degrees Celsius, NaN when the driver could not complete a read
    fn read_temperature(&mut self) -> f64;
    /// Relative humidity in percent, NaN when the driver could not complete a read
    fn read_humidity(&mut self) -> f64;
    /// Raw analog reading of the light sensor
    fn read_luminosity(&mut self) -> Result<f64>;
}

/// Sensors exposed by kernel drivers under /sys/bus/iio
pub struct IioSensors {
    dht_device: PathBuf,
    ldr_attr: PathBuf,
}

impl IioSensors {
    pub fn new(pins: &SensorPins) -> Self {
        let ldr_attr = pins
            .ldr_device
            .join(format!("in_voltage{}_raw", pins.ldr_channel));
        IioSensors {
            dht_device: pins.dht_device.clone(),
            ldr_attr,
        }
    }
}

/// Read a sysfs attribute holding a single number
fn read_attr(path: &Path) -> std::result::Result<f64, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| format!("bad value '{}' in {}: {}", raw.trim(), path.display(), e))
}

impl SensorBackend for IioSensors {
    fn read_temperature(&mut self) -> f64 {
        match read_attr(&self.dht_device.join(DHT_TEMPERATURE_ATTR)) {
            Ok(milli) => milli / MILLI,
            Err(e) => {
                debug!("Temperature read failed: {}", e);
                f64::NAN
            }
        }
    }

    fn read_humidity(&mut self) -> f64 {
        match read_attr(&self.dht_device.join(DHT_HUMIDITY_ATTR)) {
            Ok(milli) => milli / MILLI,
            Err(e) => {
                debug!("Humidity read failed: {}", e);
                f64::NAN
            }
        }
    }

    fn read_luminosity(&mut self) -> Result<f64> {
        read_attr(&self.ldr_attr).map_err(|e| {
            debug!("Luminosity read failed: {}", e);
            TelemetryError::SensorFault(SensorFault::OutOfRange)
        })
    }
}

/// Uniform random readings in 0..100, for running without hardware
#[derive(Default)]
pub struct SimulatedSensors;

impl SensorBackend for SimulatedSensors {
    fn read_temperature(&mut self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }

    fn read_humidity(&mut self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }

    fn read_luminosity(&mut self) -> Result<f64> {
        Ok(rand::thread_rng().gen_range(0.0..100.0))
    }
}

/// Fixed readings for tests
#[cfg(test)]
pub struct FixedSensors {
    pub temperature: f64,
    pub humidity: f64,
    pub luminosity: Option<f64>,
    pub reads: usize,
}

#[cfg(test)]
impl FixedSensors {
    pub fn new(temperature: f64, humidity: f64, luminosity: Option<f64>) -> Self {
        FixedSensors {
            temperature,
            humidity,
            luminosity,
            reads: 0,
        }
    }
}

#[cfg(test)]
impl SensorBackend for FixedSensors {
    fn read_temperature(&mut self) -> f64 {
        self.reads += 1;
        self.temperature
    }

    fn read_humidity(&mut self) -> f64 {
        self.reads += 1;
        self.humidity
    }

    fn read_luminosity(&mut self) -> Result<f64> {
        self.reads += 1;
        self.luminosity
            .ok_or(TelemetryError::SensorFault(SensorFault::OutOfRange))
    }
}
