//! Fixed-interval sampling and watering loop.
//!
//! Each tick reads the ambient sensors, samples every plant's soil probe,
//! writes one summary to the day log, pushes the ambient row to the remote
//! sink and finally hands a [`ValveCommand`] to the actuator for every plant
//! whose recent soil history is too dry. Nothing in a tick waits on a valve.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuator::ValveCommand;
use crate::config::Config;
use crate::gpio::OutputBoard;
use crate::logfile::RotatingLog;
use crate::plant::{ActuationController, PlantState};
use crate::reading::Reading;
use crate::report::RemoteReporter;
use crate::sensor::{HumTemp, Probe, SensorSource};

/// What a single tick observed and did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub hum_temp: HumTemp,
    pub luminosity: Option<u32>,
    /// `(plant_id, sample)` in configuration order.
    pub soil: Vec<(String, Option<u32>)>,
    pub pushed: bool,
    /// Plants handed to the actuator this tick.
    pub dispatched: Vec<String>,
}

pub struct ControlLoop<P, W: Write = io::Stdout> {
    sensors: SensorSource<P>,
    luminosity_input: PathBuf,
    plants: Vec<PlantState>,
    excitation: OutputBoard,
    actuation: ActuationController,
    valves: mpsc::Sender<ValveCommand>,
    reporter: Option<RemoteReporter>,
    log: RotatingLog<W>,
    offset: UtcOffset,
    interval: Duration,
}

impl<P: Probe, W: Write> ControlLoop<P, W> {
    pub fn new(
        config: &Config,
        plants: Vec<PlantState>,
        sensors: SensorSource<P>,
        excitation: OutputBoard,
        valves: mpsc::Sender<ValveCommand>,
        log: RotatingLog<W>,
        offset: UtcOffset,
    ) -> Self {
        Self {
            sensors,
            luminosity_input: config.ambient.luminosity_input.clone(),
            plants,
            excitation,
            actuation: ActuationController::new(config.controller.water_duration()),
            valves,
            reporter: None,
            log,
            offset,
            interval: config.controller.interval(),
        }
    }

    pub fn with_reporter(mut self, reporter: RemoteReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    #[cfg(test)]
    pub(crate) fn plants(&self) -> &[PlantState] {
        &self.plants
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    /// Tick every `interval` until `cancel` fires. A tick in progress always
    /// completes. On exit the log is closed, excitation lines are lowered and
    /// the valve channel is dropped so the actuator closes every valve.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            plants = self.plants.len(),
            interval_sec = self.interval.as_secs(),
            "control loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let now = self.now();
            self.tick(now).await;
        }

        let now = self.now();
        self.shutdown(now);
        info!("control loop stopped");
    }

    fn shutdown(&mut self, now: OffsetDateTime) {
        self.log.write(now, "Shutting down");
        self.log.close();
        self.excitation.all_off();
    }

    /// Run one sampling/decision pass stamped with `now`.
    pub async fn tick(&mut self, now: OffsetDateTime) -> TickSummary {
        // -- Ambient ------------------------------------------------------
        let hum_temp = self.sensors.hum_temp().await;
        let luminosity = match self.sensors.read_raw::<u32>(&self.luminosity_input).await {
            Ok(v) => Some(v),
            Err(e) => {
                error!("luminosity unavailable this tick: {e}");
                None
            }
        };

        let mut ambient = vec![
            Reading::humidity(now, hum_temp.humidity),
            Reading::temperature(now, hum_temp.temperature_f),
        ];
        ambient.extend(luminosity.map(|lux| Reading::luminosity(now, lux)));
        for reading in &ambient {
            debug!(%reading, "ambient reading");
        }

        // -- Soil ---------------------------------------------------------
        let mut soil = Vec::with_capacity(self.plants.len());
        for plant in &mut self.plants {
            let sample = match self
                .sensors
                .soil(&mut self.excitation, &plant.plant_id, &plant.moisture_input)
                .await
            {
                Ok(sample) => sample,
                Err(e) => {
                    error!(plant = %plant.plant_id, "soil unavailable this tick: {e}");
                    None
                }
            };
            if let Some(raw) = sample {
                debug!(plant = %plant.plant_id, reading = %Reading::soil(now, raw), "soil reading");
            }
            plant.record(sample);
            debug!(
                plant = %plant.plant_id,
                samples = ?plant.history.iter().collect::<Vec<_>>(),
                window = plant.history.len(),
                capacity = plant.history.capacity(),
                "soil history"
            );
            soil.push((plant.plant_id.clone(), sample));
        }

        // -- Log ----------------------------------------------------------
        self.log.check_rotate(now);
        let mut line = ambient
            .iter()
            .map(Reading::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        if luminosity.is_none() {
            line.push_str(" luminosity=-");
        }
        let soil_line = self.soil_line(&soil);
        self.log.write(now, &line);
        self.log.write(now, &soil_line);

        // -- Remote -------------------------------------------------------
        let mut pushed = false;
        if let (Some(reporter), Some(lux)) = (&self.reporter, luminosity) {
            match reporter
                .push(now, hum_temp.humidity, hum_temp.temperature_f, lux)
                .await
            {
                Ok(()) => pushed = true,
                Err(e) => error!("remote push failed: {e:#}"),
            }
        }

        // -- Actuation ----------------------------------------------------
        let mut dispatched = Vec::new();
        for plant in &mut self.plants {
            let decision = self.actuation.decide_for(plant);
            if !decision.water {
                continue;
            }

            let cmd = ValveCommand {
                plant_id: plant.plant_id.clone(),
                duration: decision.duration,
            };
            match self.valves.try_send(cmd) {
                Ok(()) => {
                    plant.last_watering = Some(now);
                    dispatched.push(plant.plant_id.clone());
                    self.log.write(
                        now,
                        &format!(
                            "Watering {} for {}s (max {} < {})",
                            plant.plant_id,
                            decision.duration.as_secs(),
                            plant.history.max().unwrap_or_default(),
                            plant.threshold
                        ),
                    );
                }
                Err(TrySendError::Full(cmd)) => {
                    warn!(plant = %cmd.plant_id, "actuator busy, skipping watering this tick");
                }
                Err(TrySendError::Closed(cmd)) => {
                    error!(plant = %cmd.plant_id, "actuator gone, cannot water");
                }
            }
        }

        TickSummary {
            hum_temp,
            luminosity,
            soil,
            pushed,
            dispatched,
        }
    }

    /// `a: 512 (max 600), b: - (max -)`
    fn soil_line(&self, soil: &[(String, Option<u32>)]) -> String {
        let mut line = String::new();
        for (i, (plant, (_, sample))) in self.plants.iter().zip(soil).enumerate() {
            if i > 0 {
                line.push_str(", ");
            }
            let _ = write!(
                line,
                "{}: {} (max {})",
                plant.plant_id,
                dash_or(*sample),
                dash_or(plant.history.max())
            );
        }
        line
    }
}

fn dash_or(v: Option<u32>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
