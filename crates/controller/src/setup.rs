//! Startup helpers: best-effort hardware initialisation and the one-shot
//! self-test that exercises every sensor and valve before exiting.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::config::InitSteps;
use crate::gpio::OutputBoard;
use crate::plant::PlantState;
use crate::sensor::{HumTemp, Probe, SensorSource};

/// Pause between solo valve pulses.
const SOLO_GAP: Duration = Duration::from_secs(2);
/// All-valves pulse when per-valve durations are given.
const TOGETHER_DEFAULT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Hardware initialisation
// ---------------------------------------------------------------------------

/// Run the configured helper commands, then the sysfs writes. A failing step
/// is logged and the rest still run. Returns the number of failed steps.
pub fn init_hardware(steps: &InitSteps) -> usize {
    let mut failed = 0;

    for argv in &steps.commands {
        let Some((program, args)) = argv.split_first() else {
            continue;
        };
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => info!(command = %argv.join(" "), "init command ok"),
            Ok(status) => {
                warn!(command = %argv.join(" "), "init command exited with {status}");
                failed += 1;
            }
            Err(e) => {
                warn!(command = %argv.join(" "), "init command failed: {e}");
                failed += 1;
            }
        }
    }

    for write in &steps.writes {
        match std::fs::write(&write.path, &write.value) {
            Ok(()) => info!(path = %write.path.display(), value = %write.value, "init write ok"),
            Err(e) => {
                warn!(path = %write.path.display(), "init write failed: {e}");
                failed += 1;
            }
        }
    }

    failed
}

// ---------------------------------------------------------------------------
// Self-test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestPlan {
    /// Solo pulse per plant, in configuration order.
    pub solo: Vec<Duration>,
    pub together: Duration,
}

impl SelfTestPlan {
    /// `"<secs>"` pulses every valve together for `secs`.
    /// `"<a>:<b>:..."` pulses each plant's valve alone for its duration, then
    /// all together briefly.
    pub fn parse(text: &str, plants: usize) -> Result<Self> {
        let parts: Vec<u64> = text
            .split(':')
            .map(|p| {
                p.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid self-test duration {p:?}"))
            })
            .collect::<Result<_>>()?;

        if parts.iter().any(|&s| s == 0) {
            bail!("self-test durations must be positive, got {text:?}");
        }

        match parts.as_slice() {
            [secs] => Ok(Self {
                solo: Vec::new(),
                together: Duration::from_secs(*secs),
            }),
            per_plant if per_plant.len() == plants => Ok(Self {
                solo: per_plant.iter().map(|&s| Duration::from_secs(s)).collect(),
                together: TOGETHER_DEFAULT,
            }),
            per_plant => bail!(
                "self-test gives {} durations for {plants} plants",
                per_plant.len()
            ),
        }
    }

    /// Total time spent with at least one valve open or waiting between
    /// pulses.
    pub fn total(&self) -> Duration {
        self.solo.iter().map(|d| *d + SOLO_GAP).sum::<Duration>() + self.together
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfTestReport {
    pub hum_temp: HumTemp,
    pub luminosity: Option<u32>,
    pub soil: Vec<(String, Option<u32>)>,
}

/// Read every sensor once, then pulse the valves per `plan`. Every output
/// line is off when this returns.
pub async fn self_test<P: Probe>(
    sensors: &mut SensorSource<P>,
    luminosity_input: &Path,
    plants: &[PlantState],
    excitation: &mut OutputBoard,
    valves: &mut OutputBoard,
    plan: &SelfTestPlan,
) -> SelfTestReport {
    info!(plants = plants.len(), total_sec = plan.total().as_secs(), "self-test started");

    let hum_temp = sensors.hum_temp().await;
    if hum_temp.is_degraded() {
        error!("self-test DHT: no valid reading");
    } else {
        info!(humidity = hum_temp.humidity, temperature_f = hum_temp.temperature_f, "self-test DHT");
    }

    let luminosity = match sensors.read_raw::<u32>(luminosity_input).await {
        Ok(v) => {
            info!(luminosity = v, "self-test luminosity");
            Some(v)
        }
        Err(e) => {
            error!("self-test luminosity: {e}");
            None
        }
    };

    let mut soil = Vec::with_capacity(plants.len());
    for plant in plants {
        let sample = match sensors
            .soil(excitation, &plant.plant_id, &plant.moisture_input)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                error!(plant = %plant.plant_id, "self-test soil: {e}");
                None
            }
        };
        info!(plant = %plant.plant_id, ?sample, "self-test soil");
        soil.push((plant.plant_id.clone(), sample));
    }

    for (plant, duration) in plants.iter().zip(&plan.solo) {
        info!(plant = %plant.plant_id, secs = duration.as_secs(), "self-test valve on");
        valves.set(&plant.plant_id, true);
        tokio::time::sleep(*duration).await;
        valves.set(&plant.plant_id, false);
        tokio::time::sleep(SOLO_GAP).await;
    }

    info!(secs = plan.together.as_secs(), "self-test all valves on");
    for plant in plants {
        valves.set(&plant.plant_id, true);
    }
    tokio::time::sleep(plan.together).await;
    valves.all_off();
    excitation.all_off();

    info!("self-test finished");
    SelfTestReport {
        hum_temp,
        luminosity,
        soil,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SysfsWrite;

    // -- Plan parsing -----------------------------------------------------

    #[test]
    fn single_duration_pulses_all_valves_together_only() {
        let plan = SelfTestPlan::parse("5", 2).unwrap();
        assert!(plan.solo.is_empty());
        assert_eq!(plan.together, Duration::from_secs(5));
        assert_eq!(plan.total(), Duration::from_secs(5));
    }

    #[test]
    fn per_plant_durations() {
        let plan = SelfTestPlan::parse("3:4", 2).unwrap();
        assert_eq!(plan.solo, vec![Duration::from_secs(3), Duration::from_secs(4)]);
        assert_eq!(plan.together, TOGETHER_DEFAULT);
        assert_eq!(plan.total(), Duration::from_secs(3 + 2 + 4 + 2 + 2));
    }

    #[test]
    fn bad_plans_are_rejected() {
        assert!(SelfTestPlan::parse("abc", 2).is_err());
        assert!(SelfTestPlan::parse("0", 2).is_err());
        assert!(SelfTestPlan::parse("3:4:5", 2).is_err());
        assert!(SelfTestPlan::parse("", 2).is_err());
    }

    // -- Hardware init ----------------------------------------------------

    #[test]
    fn init_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("export");
        let steps = InitSteps {
            commands: vec![vec!["/nonexistent/helper".into()], vec![]],
            writes: vec![
                SysfsWrite {
                    path: dir.path().join("missing/dir/value"),
                    value: "1".into(),
                },
                SysfsWrite {
                    path: target.clone(),
                    value: "17".into(),
                },
            ],
        };

        assert_eq!(init_hardware(&steps), 2);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "17");
    }

    #[test]
    fn empty_init_is_noop() {
        assert_eq!(init_hardware(&InitSteps::default()), 0);
    }
}
