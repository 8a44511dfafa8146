/// Canonical record assembly and the wall clock it is stamped with
use std::cell::Cell;
use time::OffsetDateTime;

use crate::error::{Result, TelemetryError};
use crate::models::{Sample, TelemetryRecord};

pub trait Clock {
    /// Seconds since the Unix epoch
    fn now_unix(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Never reports a time earlier than one it already reported, so a wall
/// clock stepped backwards (NTP correction, RTC reset) cannot reorder records
pub struct MonotonicClock<C: Clock> {
    inner: C,
    last: Cell<Option<i64>>,
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(inner: C) -> Self {
        MonotonicClock {
            inner,
            last: Cell::new(None),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now_unix(&self) -> i64 {
        let now = self.inner.now_unix();
        let now = match self.last.get() {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last.set(Some(now));
        now
    }
}

/// Turn a fully valid sample into a record
///
/// This is the only validation gate before the wire: a faulted sample or one
/// with any absent field is rejected and no partial record is built. Numeric
/// fields are copied unchanged.
pub fn build(sample: &Sample, device_id: i64, clock: &impl Clock) -> Result<TelemetryRecord> {
    if sample.fault.is_some() {
        return Err(TelemetryError::PayloadInvalid("sample carries a sensor fault"));
    }

    let (temperature, humidity, luminosity) =
        match (sample.temperature, sample.humidity, sample.luminosity) {
            (Some(t), Some(h), Some(l)) => (t, h, l),
            _ => return Err(TelemetryError::PayloadInvalid("sample has absent fields")),
        };

    let timestamp = u64::try_from(clock.now_unix())
        .map_err(|_| TelemetryError::PayloadInvalid("clock is before the Unix epoch"))?;

    Ok(TelemetryRecord {
        id: device_id,
        timestamp,
        temperature,
        humidity,
        luminosity,
    })
}

#[cfg(test)]
pub struct FixedClock(pub Cell<i64>);

#[cfg(test)]
impl FixedClock {
    pub fn at(secs: i64) -> Self {
        FixedClock(Cell::new(secs))
    }

    pub fn set(&self, secs: i64) {
        self.0.set(secs);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.0.get()
    }
}
