//! Per-plant state and the watering decision.

use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;

use crate::config::{ControllerSettings, PlantEntry};
use crate::history::HistoryBuffer;

// ---------------------------------------------------------------------------
// Plant state
// ---------------------------------------------------------------------------

/// Wiring, recent soil history and watering bookkeeping for one plant.
///
/// Output boards key both the valve and the excitation line by `plant_id`.
#[derive(Debug)]
pub struct PlantState {
    pub plant_id: String,
    pub valve_pin: u8,
    pub excitation_pin: u8,
    pub moisture_input: PathBuf,
    pub threshold: u32,
    pub history: HistoryBuffer,
    pub last_watering: Option<OffsetDateTime>,
}

impl PlantState {
    /// Pins must already have passed config validation.
    pub fn from_entry(entry: &PlantEntry, controller: &ControllerSettings) -> Self {
        Self {
            plant_id: entry.plant_id.clone(),
            valve_pin: entry.valve_gpio_pin as u8,
            excitation_pin: entry.excitation_gpio_pin as u8,
            moisture_input: entry.moisture_input.clone(),
            threshold: entry.threshold(controller),
            history: HistoryBuffer::new(controller.history_size),
            last_watering: None,
        }
    }

    /// Append this tick's soil sample, if one was obtained.
    pub fn record(&mut self, sample: Option<u32>) {
        if let Some(value) = sample {
            self.history.append(value);
        }
    }
}

/// `(plant_id, pin)` pairs for building the valve board.
pub fn valve_lines(plants: &[PlantState]) -> Vec<(String, u8)> {
    plants
        .iter()
        .map(|p| (p.plant_id.clone(), p.valve_pin))
        .collect()
}

/// `(plant_id, pin)` pairs for building the excitation board.
pub fn excitation_lines(plants: &[PlantState]) -> Vec<(String, u8)> {
    plants
        .iter()
        .map(|p| (p.plant_id.clone(), p.excitation_pin))
        .collect()
}

// ---------------------------------------------------------------------------
// Actuation decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationDecision {
    pub water: bool,
    pub duration: Duration,
}

/// The soil is dry when even the wettest recent sample sits below the
/// threshold. Equality does not water.
pub fn should_water(history_max: u32, threshold: u32) -> bool {
    history_max < threshold
}

#[derive(Debug, Clone, Copy)]
pub struct ActuationController {
    duration: Duration,
}

impl ActuationController {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// An empty history never waters.
    pub fn decide(&self, history_max: Option<u32>, threshold: u32) -> ActuationDecision {
        ActuationDecision {
            water: history_max.is_some_and(|max| should_water(max, threshold)),
            duration: self.duration,
        }
    }

    pub fn decide_for(&self, plant: &PlantState) -> ActuationDecision {
        self.decide(plant.history.max(), plant.threshold)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(threshold: u32, samples: &[u32]) -> PlantState {
        let entry = PlantEntry {
            plant_id: "a".into(),
            valve_gpio_pin: 17,
            excitation_gpio_pin: 22,
            moisture_input: PathBuf::from("/tmp/ain0"),
            water_threshold: Some(threshold),
        };
        let mut p = PlantState::from_entry(&entry, &ControllerSettings::default());
        for &s in samples {
            p.record(Some(s));
        }
        p
    }

    fn controller() -> ActuationController {
        ActuationController::new(Duration::from_secs(20))
    }

    // -- should_water -----------------------------------------------------

    #[test]
    fn below_threshold_waters() {
        assert!(should_water(299, 300));
    }

    #[test]
    fn equal_to_threshold_does_not_water() {
        assert!(!should_water(300, 300));
    }

    #[test]
    fn above_threshold_does_not_water() {
        assert!(!should_water(301, 300));
    }

    #[test]
    fn zero_threshold_never_waters() {
        assert!(!should_water(0, 0));
    }

    // -- decide -----------------------------------------------------------

    #[test]
    fn window_max_above_threshold_suppresses_watering() {
        let p = plant(300, &[250, 280, 310]);
        let d = controller().decide_for(&p);
        assert!(!d.water);
    }

    #[test]
    fn window_max_below_threshold_waters_for_configured_duration() {
        let p = plant(300, &[250, 280, 290]);
        let d = controller().decide_for(&p);
        assert!(d.water);
        assert_eq!(d.duration, Duration::from_secs(20));
    }

    #[test]
    fn empty_history_never_waters() {
        let p = plant(300, &[]);
        assert!(!controller().decide_for(&p).water);
    }

    #[test]
    fn single_low_reading_does_not_trigger_when_window_is_wet() {
        let p = plant(300, &[600, 580, 20]);
        assert!(!controller().decide_for(&p).water);
    }

    // -- PlantState -------------------------------------------------------

    #[test]
    fn missing_sample_skips_history_update() {
        let mut p = plant(300, &[250]);
        p.record(None);
        assert_eq!(p.history.len(), 1);
        assert_eq!(p.history.max(), Some(250));
    }

    #[test]
    fn from_entry_uses_controller_history_size() {
        let p = plant(300, &(0..40).collect::<Vec<u32>>());
        assert_eq!(p.history.len(), 15);
        assert!(p.last_watering.is_none());
    }

    #[test]
    fn board_lines_follow_wiring() {
        let plants = vec![plant(300, &[])];
        assert_eq!(valve_lines(&plants), vec![("a".to_string(), 17)]);
        assert_eq!(excitation_lines(&plants), vec![("a".to_string(), 22)]);
    }
}
