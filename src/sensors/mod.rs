pub mod backend;
pub mod reader;

pub use backend::{IioSensors, SensorBackend, SimulatedSensors};
pub use reader::SensorReader;
