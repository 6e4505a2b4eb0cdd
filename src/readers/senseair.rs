//! Senseair K30/K33-family CO2 sensor driver (I2C).
//!
//! Protocol references:
//!   - Senseair AN102 (K30 I2C application note)
//!   - Senseair TDE4700 datasheet

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use embedded_hal::i2c::{Error as _, I2c};
use thiserror::Error;

use crate::config::SensorConfig;
use crate::constants::defaults;
use crate::data_mgmt::models::Channel;

/// Command returning the current CO2 measurement (ppm).
const MEASURE_CMD: [u8; 4] = [0x22, 0x00, 0x08, 0x2A];
/// Command reading the meter control register.
const READ_METER_CMD: [u8; 4] = [0x41, 0x00, 0x3E, 0x7F];
/// ABC enable bit within the meter control byte.
const ABC_ENABLE_BIT: u8 = 0x02;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("I2C {op} failed: {kind:?}")]
    Bus {
        op: &'static str,
        kind: embedded_hal::i2c::ErrorKind,
    },
    #[error("measurement not finished (status 0x{status:02X})")]
    NotReady { status: u8 },
    #[error("checksum mismatch (expected 0x{expected:02X}, got 0x{got:02X})")]
    Checksum { expected: u8, got: u8 },
}

/// Polling driver for one sensor at a fixed bus address.
///
/// Each `poll` runs the full measure transaction with a bounded fixed-delay
/// retry, all within the call; the ABC calibration directive is tracked
/// separately and applied by `apply_calibration_if_due`, outside the
/// measurement retry state.
pub struct SenseairK30<B> {
    bus: B,
    address: u8,
    channel: Arc<Channel>,
    max_retries: u32,
    retry_delay: Duration,
    failures: u32,
    abc_interval: Option<chrono::Duration>,
    last_calibrated: Option<DateTime<Utc>>,
}

impl<B: I2c> SenseairK30<B> {
    pub fn new(bus: B, config: &SensorConfig, channel: Arc<Channel>) -> Self {
        Self {
            bus,
            address: config.address,
            channel,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            failures: 0,
            abc_interval: (config.abc_interval > 0)
                .then(|| chrono::Duration::seconds(i64::from(config.abc_interval))),
            last_calibrated: None,
        }
    }

    /// Startup bringup. An unreachable device is reported here but is not
    /// fatal: polling proceeds on schedule and recovers on the next
    /// connectivity window.
    pub fn init(&mut self, now: DateTime<Utc>) {
        let result = if self.abc_interval.is_some() {
            self.apply_calibration_if_due(now).map(|_| ())
        } else {
            // ABC disabled: the meter control read still serves as a
            // reachability probe.
            self.read_meter_control().map(|_| ())
        };

        match result {
            Ok(()) => log::info!("[{}] sensor initialized", self.channel.name()),
            Err(err) => log::error!(
                "[{}] sensor initialization failed: {err}; polling will keep trying",
                self.channel.name()
            ),
        }
    }

    /// One poll cycle: up to `max_retries` measure attempts with a fixed
    /// delay in between. On success the value lands in the channel; on
    /// exhaustion the channel keeps its previous sample.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Result<f64, SensorError> {
        self.failures = 0;
        loop {
            match self.measure() {
                Ok(ppm) => {
                    self.failures = 0;
                    let value = f64::from(ppm);
                    log::info!("[{}] CO2: {ppm} ppm", self.channel.name());
                    self.channel.record(value, now);
                    return Ok(value);
                }
                Err(err) => {
                    self.failures += 1;
                    if self.failures < self.max_retries {
                        log::warn!(
                            "[{}] measurement failed (attempt {}/{}): {err}; retrying in {} ms",
                            self.channel.name(),
                            self.failures,
                            self.max_retries,
                            self.retry_delay.as_millis()
                        );
                        thread::sleep(self.retry_delay);
                    } else {
                        self.failures = 0;
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Consecutive failed attempts in the current poll cycle.
    #[cfg(test)]
    fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Apply the ABC calibration directive if it has come due: once at
    /// startup and again whenever the configured interval has elapsed
    /// since the last application. An interval of zero disables
    /// calibration entirely.
    ///
    /// Returns `Ok(true)` when a calibration transaction was performed.
    /// Failures leave the directive due and are never retried within a
    /// cycle; they do not touch the measurement retry state.
    pub fn apply_calibration_if_due(&mut self, now: DateTime<Utc>) -> Result<bool, SensorError> {
        let Some(interval) = self.abc_interval else {
            return Ok(false);
        };
        if let Some(last) = self.last_calibrated {
            if now - last < interval {
                return Ok(false);
            }
        }

        self.reconcile_abc(interval)?;
        self.last_calibrated = Some(now);
        Ok(true)
    }

    /// Single calibration transaction: set the ABC enable bit if the sensor
    /// disagrees with the configuration, then program the correction period.
    fn reconcile_abc(&mut self, interval: chrono::Duration) -> Result<(), SensorError> {
        let control = self.read_meter_control()?;

        if control & ABC_ENABLE_BIT == 0 {
            let mut cmd = [0x31, 0x00, 0x3E, control | ABC_ENABLE_BIT, 0x00];
            cmd[4] = checksum(&cmd[..4]);
            self.write(&cmd, "ABC enable")?;
            log::info!("[{}] enabled ABC", self.channel.name());
        } else {
            log::debug!("[{}] ABC already enabled", self.channel.name());
        }

        // Program the period as well, so a sensor moved between nodes picks
        // up this node's interval. Saturates at the register's 16-bit range.
        let period = u16::try_from(interval.num_seconds()).unwrap_or(u16::MAX);
        let [hi, lo] = period.to_be_bytes();
        self.write(&[0x01, 0x40, hi, lo], "ABC period")?;
        log::debug!("[{}] ABC period set to {period} s", self.channel.name());

        Ok(())
    }

    fn measure(&mut self) -> Result<u16, SensorError> {
        self.write(&MEASURE_CMD, "measure command")?;
        thread::sleep(defaults::SENSOR_COMMAND_DELAY);
        let mut data = [0u8; 4];
        self.read(&mut data, "measurement")?;

        let [status, hi, lo, received] = data;
        if status & 0x01 != 0x01 {
            return Err(SensorError::NotReady { status });
        }
        let expected = checksum(&data[..3]);
        if expected != received {
            return Err(SensorError::Checksum {
                expected,
                got: received,
            });
        }

        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn read_meter_control(&mut self) -> Result<u8, SensorError> {
        self.write(&READ_METER_CMD, "meter control command")?;
        thread::sleep(defaults::SENSOR_COMMAND_DELAY);
        let mut data = [0u8; 3];
        self.read(&mut data, "meter control")?;

        let expected = checksum(&data[..2]);
        if expected != data[2] {
            return Err(SensorError::Checksum {
                expected,
                got: data[2],
            });
        }

        Ok(data[1])
    }

    fn write(&mut self, bytes: &[u8], op: &'static str) -> Result<(), SensorError> {
        self.bus.write(self.address, bytes).map_err(|err| SensorError::Bus {
            op,
            kind: err.kind(),
        })
    }

    fn read(&mut self, buffer: &mut [u8], op: &'static str) -> Result<(), SensorError> {
        self.bus.read(self.address, buffer).map_err(|err| SensorError::Bus {
            op,
            kind: err.kind(),
        })
    }
}

/// Additive checksum, truncated to 8 bits.
fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}
