//! Sensor reads with bounded retries.
//!
//! Three read paths share one [`RetryPolicy`]:
//! - humidity/temperature pairs from the DHT helper; invalid pairs are re-read
//!   and a dead sensor degrades to `(0.0, 0.0)` instead of failing,
//! - single-value raw inputs (sysfs files) which fail with
//!   [`SensorError::Exhausted`] once the attempt cap is hit,
//! - soil moisture, which drives the probe's excitation line and keeps the
//!   maximum of a burst of raw reads.

use std::fmt::Display;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::gpio::OutputBoard;

/// Sequential attempts per read before giving up.
pub const MAX_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// Errors & policy
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("can't read from {input} after {attempts} attempts: {last}")]
    Exhausted {
        input: String,
        attempts: u32,
        last: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts; zero retries immediately.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    async fn pause(&self, attempt: u32) {
        if attempt < self.max_attempts && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Soil burst parameters.
#[derive(Debug, Clone, Copy)]
pub struct SoilSampling {
    pub samples: u32,
    pub delay: Duration,
}

impl Default for SoilSampling {
    fn default() -> Self {
        Self {
            samples: 10,
            delay: Duration::from_millis(50),
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware read capability
// ---------------------------------------------------------------------------

/// Narrow read-side view of the hardware.
pub trait Probe {
    /// Read one line from a raw input.
    fn read_line(&mut self, input: &Path) -> io::Result<String>;

    /// One raw `(relative humidity %, temperature °C)` pair.
    fn read_hum_temp(&mut self) -> io::Result<(f64, f64)>;
}

/// Reads sysfs-style files and shells out to the DHT helper.
pub struct SysfsProbe {
    hum_temp_command: Vec<String>,
}

impl SysfsProbe {
    pub fn new(hum_temp_command: Vec<String>) -> Self {
        Self { hum_temp_command }
    }
}

impl Probe for SysfsProbe {
    fn read_line(&mut self, input: &Path) -> io::Result<String> {
        let mut line = String::new();
        BufReader::new(std::fs::File::open(input)?).read_line(&mut line)?;
        Ok(line)
    }

    fn read_hum_temp(&mut self) -> io::Result<(f64, f64)> {
        let (program, args) = self
            .hum_temp_command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no DHT helper configured"))?;

        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        parse_hum_temp(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the helper's `<humidity> <temperature>` output.
pub fn parse_hum_temp(text: &str) -> io::Result<(f64, f64)> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, format!("bad DHT output {text:?}"));
    let mut fields = text.split_whitespace();
    let humidity: f64 = fields.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    let temperature: f64 = fields.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    Ok((humidity, temperature))
}

// ---------------------------------------------------------------------------
// Humidity / temperature
// ---------------------------------------------------------------------------

/// Humidity in %RH and temperature in °F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumTemp {
    pub humidity: f64,
    pub temperature_f: f64,
}

impl HumTemp {
    /// Reported when the sensor is judged dead.
    pub const DEGRADED: Self = Self {
        humidity: 0.0,
        temperature_f: 0.0,
    };

    pub fn is_degraded(&self) -> bool {
        *self == Self::DEGRADED
    }
}

pub fn is_valid_hum_temp(humidity: f64, temperature_c: f64) -> bool {
    humidity > 0.0 && humidity <= 100.0 && temperature_c > 0.0 && temperature_c <= 50.0
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

// ---------------------------------------------------------------------------
// SensorSource
// ---------------------------------------------------------------------------

/// Wraps a [`Probe`] with the retry and validation policy for each input kind.
pub struct SensorSource<P> {
    probe: P,
    raw_retry: RetryPolicy,
    hum_temp_retry: RetryPolicy,
    soil: SoilSampling,
}

impl<P: Probe> SensorSource<P> {
    pub fn new(probe: P, raw_retry: RetryPolicy, hum_temp_retry: RetryPolicy, soil: SoilSampling) -> Self {
        Self {
            probe,
            raw_retry,
            hum_temp_retry,
            soil,
        }
    }

    #[cfg(test)]
    pub(crate) fn probe(&self) -> &P {
        &self.probe
    }

    /// Read humidity/temperature, degrading to zeros rather than failing.
    ///
    /// A final pair that truncates to `(0, 0)` is treated as the sensor's
    /// unresponsive signature even though it passed validation.
    pub async fn hum_temp(&mut self) -> HumTemp {
        let policy = self.hum_temp_retry;
        let mut accepted = None;

        for attempt in 1..=policy.max_attempts {
            match self.probe.read_hum_temp() {
                Ok((h, t)) if is_valid_hum_temp(h, t) => {
                    accepted = Some((h, t));
                    break;
                }
                Ok((h, t)) => debug!(attempt, humidity = h, temperature_c = t, "rejected DHT pair"),
                Err(e) => debug!(attempt, "DHT read failed: {e}"),
            }
            policy.pause(attempt).await;
        }

        match accepted {
            Some((h, t)) if !(h.trunc() == 0.0 && t.trunc() == 0.0) => HumTemp {
                humidity: h,
                temperature_f: celsius_to_fahrenheit(t),
            },
            _ => {
                warn!(attempts = policy.max_attempts, "check DHT: reporting zeros");
                HumTemp::DEGRADED
            }
        }
    }

    /// Read and parse one value from a raw input, retrying I/O and parse
    /// failures up to the attempt cap.
    pub async fn read_raw<T>(&mut self, input: &Path) -> Result<T, SensorError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let policy = self.raw_retry;
        let mut last = String::from("no attempts made");

        for attempt in 1..=policy.max_attempts {
            match self.probe.read_line(input) {
                Ok(line) => match line.trim().parse::<T>() {
                    Ok(value) => return Ok(value),
                    Err(e) => last = format!("invalid value {:?}: {e}", line.trim()),
                },
                Err(e) => last = e.to_string(),
            }
            warn!(input = %input.display(), attempt, "trying again ({last})");
            policy.pause(attempt).await;
        }

        Err(SensorError::Exhausted {
            input: input.display().to_string(),
            attempts: policy.max_attempts,
            last,
        })
    }

    /// Sample a soil probe: raise `excitation`, take a burst of reads, lower
    /// it again and return the largest non-zero reading.
    ///
    /// `Ok(None)` means no usable reading this tick. The excitation line is
    /// lowered on every path, including a fatal read.
    pub async fn soil(
        &mut self,
        board: &mut OutputBoard,
        excitation: &str,
        input: &Path,
    ) -> Result<Option<u32>, SensorError> {
        board.set(excitation, true);
        let result = self.soil_burst(input).await;
        board.set(excitation, false);
        result
    }

    async fn soil_burst(&mut self, input: &Path) -> Result<Option<u32>, SensorError> {
        let mut best: Option<u32> = None;
        for _ in 0..self.soil.samples {
            if !self.soil.delay.is_zero() {
                tokio::time::sleep(self.soil.delay).await;
            }
            // Zero means the probe did not respond; it is not a sample.
            let value: u32 = self.read_raw(input).await?;
            if value > 0 {
                best = Some(best.map_or(value, |b| b.max(value)));
            }
        }
        Ok(best)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
