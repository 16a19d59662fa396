//! Digital outputs for valve relays and soil-sensor excitation. The `gpio`
//! feature gates the real rppal driver; without it, a mock implementation
//! keeps the line state in memory and logs changes.

use anyhow::Result;
use std::collections::HashMap;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO board (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct OutputBoard {
    label: &'static str,
    pins: HashMap<String, OutputPin>, // line id -> GPIO pin
    active_low: bool,                 // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl OutputBoard {
    pub fn new(label: &'static str, lines: &[(String, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let mut pins = HashMap::new();

        for (id, pin_num) in lines {
            let mut pin = gpio
                .get(*pin_num)
                .with_context(|| format!("{label} {id}: gpio {pin_num} unavailable"))?
                .into_output();

            // Fail-safe: ensure "OFF" at startup
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }

            pins.insert(id.clone(), pin);
        }

        tracing::info!(label, lines = pins.len(), active_low, "gpio board initialised");
        Ok(Self {
            label,
            pins,
            active_low,
        })
    }

    pub fn set(&mut self, id: &str, on: bool) {
        let label = self.label;
        if let Some(pin) = self.pins.get_mut(id) {
            // active-low: LOW = ON, HIGH = OFF
            if on != self.active_low {
                pin.set_high()
            } else {
                pin.set_low()
            }
            tracing::debug!(label, line = %id, on, "output set");
        } else {
            tracing::warn!(label, line = %id, "unknown output line");
        }
    }

    pub fn is_on(&self, id: &str) -> Option<bool> {
        self.pins
            .get(id)
            .map(|pin| pin.is_set_high() != self.active_low)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pins.contains_key(id)
    }

    pub fn all_off(&mut self) {
        let keys: Vec<String> = self.pins.keys().cloned().collect();
        for k in keys {
            self.set(&k, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock board (development, no hardware, keeps state in memory)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct OutputBoard {
    label: &'static str,
    lines: HashMap<String, bool>, // line id -> on/off state
}

#[cfg(not(feature = "gpio"))]
impl OutputBoard {
    pub fn new(label: &'static str, lines: &[(String, u8)], _active_low: bool) -> Result<Self> {
        let mut state = HashMap::new();
        for (id, pin_num) in lines {
            tracing::debug!(label, line = %id, gpio = pin_num, "[mock-gpio] registered (not wired)");
            state.insert(id.clone(), false);
        }
        tracing::info!(label, lines = state.len(), "[mock-gpio] board initialised (no hardware)");
        Ok(Self {
            label,
            lines: state,
        })
    }

    pub fn set(&mut self, id: &str, on: bool) {
        let label = self.label;
        if let Some(state) = self.lines.get_mut(id) {
            *state = on;
            tracing::debug!(label, line = %id, on, "[mock-gpio] output set");
        } else {
            tracing::warn!(label, line = %id, "[mock-gpio] unknown output line");
        }
    }

    pub fn is_on(&self, id: &str) -> Option<bool> {
        self.lines.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lines.contains_key(id)
    }

    pub fn all_off(&mut self) {
        let keys: Vec<String> = self.lines.keys().cloned().collect();
        for k in keys {
            self.set(&k, false);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn lines() -> Vec<(String, u8)> {
        vec![("a".to_string(), 17), ("b".to_string(), 27)]
    }

    #[test]
    fn new_registers_lines_off() {
        let board = OutputBoard::new("valve", &lines(), false).unwrap();
        assert_eq!(board.is_on("a"), Some(false));
        assert_eq!(board.is_on("b"), Some(false));
        assert!(board.contains("a"));
    }

    #[test]
    fn set_on_then_off() {
        let mut board = OutputBoard::new("valve", &lines(), false).unwrap();
        board.set("a", true);
        assert_eq!(board.is_on("a"), Some(true));
        board.set("a", false);
        assert_eq!(board.is_on("a"), Some(false));
    }

    #[test]
    fn all_off_resets_everything() {
        let mut board = OutputBoard::new("valve", &lines(), true).unwrap();
        board.set("a", true);
        board.set("b", true);
        board.all_off();
        assert_eq!(board.is_on("a"), Some(false));
        assert_eq!(board.is_on("b"), Some(false));
    }

    #[test]
    fn unknown_line_is_ignored() {
        let mut board = OutputBoard::new("excitation", &lines(), false).unwrap();
        board.set("nonexistent", true);
        assert_eq!(board.is_on("nonexistent"), None);
        assert!(!board.contains("nonexistent"));
    }
}
