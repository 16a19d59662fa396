//! TOML config file loading and validation for the controller, its ambient
//! inputs, per-plant wiring, the remote sink and hardware initialisation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::sensor::RetryPolicy;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerSettings,
    pub ambient: AmbientInputs,
    pub plants: Plants,
    pub remote: Option<RemoteConfig>,
    pub init: InitSteps,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Soil samples kept per plant for the watering decision.
    pub history_size: usize,
    pub interval_sec: u64,
    pub water_duration_sec: u64,
    /// Raw ADC units; the history max must fall below this to water.
    /// `0` disables watering.
    pub water_threshold: u32,
    /// Directory for the daily log files. Console-only when unset.
    pub log_dir: Option<PathBuf>,
    pub init_hardware: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub soil_samples: u32,
    pub soil_sample_delay_ms: u64,
    pub valve_active_low: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            history_size: 15,
            interval_sec: 300,
            water_duration_sec: 20,
            water_threshold: 0,
            log_dir: None,
            init_hardware: true,
            retry_attempts: 10,
            retry_delay_ms: 20,
            soil_samples: 10,
            soil_sample_delay_ms: 50,
            valve_active_low: false,
        }
    }
}

impl ControllerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn water_duration(&self) -> Duration {
        Duration::from_secs(self.water_duration_sec)
    }

    pub fn soil_sample_delay(&self) -> Duration {
        Duration::from_millis(self.soil_sample_delay_ms)
    }

    /// Policy for single-value raw inputs (luminosity, soil).
    pub fn raw_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Policy for the humidity/temperature probe: invalid pairs are
    /// re-read immediately.
    pub fn hum_temp_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmbientInputs {
    /// argv of the helper that prints `<humidity> <temperature_c>`.
    pub hum_temp_command: Vec<String>,
    pub luminosity_input: PathBuf,
}

impl Default for AmbientInputs {
    fn default() -> Self {
        Self {
            hum_temp_command: vec!["DHT22/read_dht".to_string()],
            luminosity_input: PathBuf::from(
                "/sys/bus/iio/devices/iio:device0/in_intensity_both_raw",
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantEntry {
    pub plant_id: String,
    pub valve_gpio_pin: i64,
    pub excitation_gpio_pin: i64,
    pub moisture_input: PathBuf,
    /// Overrides `controller.water_threshold` for this plant.
    #[serde(default)]
    pub water_threshold: Option<u32>,
}

impl PlantEntry {
    pub fn threshold(&self, controller: &ControllerSettings) -> u32 {
        self.water_threshold.unwrap_or(controller.water_threshold)
    }
}

/// Plant list; defaults to the two-plant bench wiring.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Plants(pub Vec<PlantEntry>);

impl Default for Plants {
    fn default() -> Self {
        Self(vec![
            PlantEntry {
                plant_id: "a".into(),
                valve_gpio_pin: 17,
                excitation_gpio_pin: 22,
                moisture_input: PathBuf::from("/sys/bus/iio/devices/iio:device1/in_voltage0_raw"),
                water_threshold: None,
            },
            PlantEntry {
                plant_id: "b".into(),
                valve_gpio_pin: 27,
                excitation_gpio_pin: 23,
                moisture_input: PathBuf::from("/sys/bus/iio/devices/iio:device1/in_voltage1_raw"),
                water_threshold: None,
            },
        ])
    }
}

impl std::ops::Deref for Plants {
    type Target = [PlantEntry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Remote telemetry sink: an MQTT broker that stores one row per message
/// published on `topic`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub push_timeout_sec: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "plantwatch".into(),
            topic: "plantwatch/ambient".into(),
            username: None,
            password: None,
            push_timeout_sec: 10,
        }
    }
}

impl RemoteConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_sec)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitSteps {
    /// Helper commands run in order (e.g. `["DHT22/read_dht", "-i"]`).
    pub commands: Vec<Vec<String>>,
    pub writes: Vec<SysfsWrite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SysfsWrite {
    pub path: PathBuf,
    pub value: String,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_controller(&mut errors);
        self.validate_ambient(&mut errors);
        self.validate_plants(&mut errors);
        self.validate_remote(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;
        let positive = [
            ("history_size", c.history_size as u64),
            ("interval_sec", c.interval_sec),
            ("water_duration_sec", c.water_duration_sec),
            ("retry_attempts", u64::from(c.retry_attempts)),
            ("soil_samples", u64::from(c.soil_samples)),
        ];
        for (name, value) in positive {
            if value == 0 {
                errors.push(format!("controller: {name} must be positive"));
            }
        }

        if let Some(dir) = &c.log_dir {
            if dir.as_os_str().is_empty() {
                errors.push("controller: log_dir is empty (omit it for console-only)".into());
            }
        }
    }

    fn validate_ambient(&self, errors: &mut Vec<String>) {
        if self.ambient.hum_temp_command.iter().all(|s| s.trim().is_empty()) {
            errors.push("ambient: hum_temp_command is empty".into());
        }
        if self.ambient.luminosity_input.as_os_str().is_empty() {
            errors.push("ambient: luminosity_input is empty".into());
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.plant_id.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.plant_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.plant_id.trim().is_empty() {
                errors.push(format!("{}: plant_id is empty", ctx()));
            } else if !seen_ids.insert(&p.plant_id) {
                errors.push(format!("{}: duplicate plant_id", ctx()));
            }

            if p.moisture_input.as_os_str().is_empty() {
                errors.push(format!("{}: moisture_input is empty", ctx()));
            }

            // ── GPIO pin whitelist ──────────────────────────────
            for (field, pin) in [
                ("valve_gpio_pin", p.valve_gpio_pin),
                ("excitation_gpio_pin", p.excitation_gpio_pin),
            ] {
                if !VALID_GPIO_PINS.contains(&pin) {
                    errors.push(format!(
                        "{}: {field} {pin} is not a valid BCM GPIO pin (allowed: 2-27)",
                        ctx()
                    ));
                } else if !seen_pins.insert(pin) {
                    errors.push(format!(
                        "{}: {field} {pin} is already used by another output",
                        ctx()
                    ));
                }
            }
        }
    }

    fn validate_remote(&self, errors: &mut Vec<String>) {
        let Some(r) = &self.remote else {
            return;
        };

        if r.host.trim().is_empty() {
            errors.push("remote: host is empty".into());
        }
        if r.port == 0 {
            errors.push("remote: port must be positive".into());
        }
        if r.client_id.trim().is_empty() {
            errors.push("remote: client_id is empty".into());
        }
        if r.topic.trim().is_empty() {
            errors.push("remote: topic is empty".into());
        }
        if r.push_timeout_sec == 0 {
            errors.push("remote: push_timeout_sec must be positive".into());
        } else if r.push_timeout_sec >= self.controller.interval_sec {
            errors.push(format!(
                "remote: push_timeout_sec ({}) must be shorter than interval_sec ({})",
                r.push_timeout_sec, self.controller.interval_sec
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate TOML config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
