//! Simulated sensor probe for running the controller without hardware.
//!
//! Models:
//! - humidity/temperature with small noise and an occasional out-of-range
//!   pair (the DHT's most common failure),
//! - luminosity following a day/night cycle,
//! - per-input soil moisture as a slowly drying random walk with ADC noise and
//!   an occasional zero (unresponsive probe).

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::sensor::Probe;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Raw soil value of saturated soil.
const SOIL_WET: f64 = 900.0;
/// Raw soil value of bone-dry soil.
const SOIL_DRY: f64 = 150.0;

const DHT_GLITCH_PROB: f64 = 0.08;
const SOIL_DROPOUT_PROB: f64 = 0.05;

pub struct SimProbe {
    luminosity_input: PathBuf,
    soil: HashMap<PathBuf, f64>,
    started: Instant,
    /// Length of one simulated day.
    day_secs: f64,
}

impl SimProbe {
    pub fn new(luminosity_input: PathBuf, soil_inputs: impl IntoIterator<Item = PathBuf>, day_secs: f64) -> Self {
        let soil = soil_inputs
            .into_iter()
            .map(|p| (p, gaussian((SOIL_WET + SOIL_DRY) / 2.0, 60.0)))
            .collect();
        tracing::info!(day_secs, "sensor simulator enabled");
        Self {
            luminosity_input,
            soil,
            started: Instant::now(),
            day_secs,
        }
    }

    /// Phase of the simulated day in [0, 1).
    fn day_phase(&self) -> f64 {
        (self.started.elapsed().as_secs_f64() / self.day_secs).fract()
    }

    fn luminosity(&self) -> u32 {
        // Noon at phase 0.5, dark for the night half.
        let sun = (TAU * (self.day_phase() - 0.25)).sin().max(0.0);
        gaussian(sun * 18000.0, 150.0).max(0.0) as u32
    }

    fn soil(&mut self, input: &Path) -> Option<u32> {
        let base = self.soil.get_mut(input)?;
        // Evaporation plus a random walk.
        *base = (*base - gaussian(1.5, 2.0)).clamp(SOIL_DRY, SOIL_WET);

        if fastrand::f64() < SOIL_DROPOUT_PROB {
            return Some(0);
        }
        Some(gaussian(*base, 12.0).clamp(0.0, 4095.0) as u32)
    }
}

impl Probe for SimProbe {
    fn read_line(&mut self, input: &Path) -> io::Result<String> {
        if input == self.luminosity_input {
            return Ok(format!("{}\n", self.luminosity()));
        }
        self.soil(input)
            .map(|v| format!("{v}\n"))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no simulated input {}", input.display())))
    }

    fn read_hum_temp(&mut self) -> io::Result<(f64, f64)> {
        let phase = self.day_phase();
        let temp_c = gaussian(21.0 + 5.0 * (TAU * (phase - 0.25)).sin(), 0.3);
        let humidity = gaussian(55.0 - 8.0 * (TAU * (phase - 0.25)).sin(), 1.0);

        if fastrand::f64() < DHT_GLITCH_PROB {
            return Ok((humidity + 100.0, temp_c));
        }
        Ok((humidity, temp_c))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
