//! Valve actuation worker.
//!
//! The control loop never touches the valve board. It sends a
//! [`ValveCommand`] down a channel and moves on; this task opens the valve,
//! closes it once the duration has elapsed and ignores commands for a plant
//! whose valve is already open. Dropping every sender closes all valves and
//! ends the task.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use crate::gpio::OutputBoard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValveCommand {
    pub plant_id: String,
    pub duration: Duration,
}

/// Progress reports for whoever is interested (tests, self-test).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValveEvent {
    Opened(String),
    Closed(String),
    Ignored(String),
}

/// Run the worker until all command senders are dropped. Returns the board
/// with every line off.
pub async fn run(
    mut board: OutputBoard,
    mut commands: mpsc::Receiver<ValveCommand>,
    events: Option<mpsc::UnboundedSender<ValveEvent>>,
) -> OutputBoard {
    let mut open: HashMap<String, Instant> = HashMap::new();
    let notify = |event: ValveEvent| {
        if let Some(tx) = &events {
            let _ = tx.send(event);
        }
    };

    loop {
        let next_close = open.values().min().copied();

        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };

                if !board.contains(&cmd.plant_id) || open.contains_key(&cmd.plant_id) {
                    warn!(plant = %cmd.plant_id, "valve command ignored (unknown plant or already open)");
                    notify(ValveEvent::Ignored(cmd.plant_id));
                    continue;
                }

                board.set(&cmd.plant_id, true);
                info!(plant = %cmd.plant_id, secs = cmd.duration.as_secs_f32(), "valve opened");
                open.insert(cmd.plant_id.clone(), Instant::now() + cmd.duration);
                notify(ValveEvent::Opened(cmd.plant_id));
            }
            _ = sleep_until(next_close.unwrap_or_else(Instant::now)), if next_close.is_some() => {
                let now = Instant::now();
                let due: Vec<String> = open
                    .iter()
                    .filter(|(_, until)| **until <= now)
                    .map(|(id, _)| id.clone())
                    .collect();
                for plant_id in due {
                    open.remove(&plant_id);
                    board.set(&plant_id, false);
                    info!(plant = %plant_id, "valve closed");
                    notify(ValveEvent::Closed(plant_id));
                }
            }
        }
    }

    if !open.is_empty() {
        warn!(open = open.len(), "actuator stopping with valves open, closing");
    }
    board.all_off();
    board
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board() -> OutputBoard {
        OutputBoard::new(
            "valve",
            &[("a".to_string(), 17), ("b".to_string(), 27)],
            false,
        )
        .unwrap()
    }

    fn cmd(plant_id: &str, secs: u64) -> ValveCommand {
        ValveCommand {
            plant_id: plant_id.into(),
            duration: Duration::from_secs(secs),
        }
    }

    struct Harness {
        tx: mpsc::Sender<ValveCommand>,
        events: mpsc::UnboundedReceiver<ValveEvent>,
        task: tokio::task::JoinHandle<OutputBoard>,
    }

    fn start() -> Harness {
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(board(), rx, Some(ev_tx)));
        Harness { tx, events, task }
    }

    // -- Open / close -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn valve_closes_after_duration() {
        let mut h = start();
        let started = Instant::now();

        h.tx.send(cmd("a", 20)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Closed("a".into())));
        assert!(started.elapsed() >= Duration::from_secs(20));

        drop(h.tx);
        let board = h.task.await.unwrap();
        assert_eq!(board.is_on("a"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn command_for_open_valve_is_ignored() {
        let mut h = start();

        h.tx.send(cmd("a", 20)).await.unwrap();
        h.tx.send(cmd("a", 20)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Ignored("a".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Closed("a".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn valve_can_reopen_after_closing() {
        let mut h = start();

        h.tx.send(cmd("a", 5)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Closed("a".into())));

        h.tx.send(cmd("a", 5)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn plants_water_concurrently() {
        let mut h = start();
        let started = Instant::now();

        h.tx.send(cmd("a", 10)).await.unwrap();
        h.tx.send(cmd("b", 5)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("b".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Closed("b".into())));
        assert_eq!(h.events.recv().await, Some(ValveEvent::Closed("a".into())));
        // Overlapping windows: total time is the longer one, not the sum.
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_plant_is_ignored() {
        let mut h = start();
        h.tx.send(cmd("zz", 5)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Ignored("zz".into())));
    }

    // -- Shutdown ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn dropping_sender_closes_open_valves() {
        let mut h = start();
        h.tx.send(cmd("a", 600)).await.unwrap();
        assert_eq!(h.events.recv().await, Some(ValveEvent::Opened("a".into())));

        drop(h.tx);
        let board = h.task.await.unwrap();
        assert_eq!(board.is_on("a"), Some(false));
        assert_eq!(board.is_on("b"), Some(false));
    }
}
