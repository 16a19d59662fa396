mod actuator;
mod config;
mod control;
mod gpio;
mod history;
mod logfile;
mod plant;
mod reading;
mod report;
mod sensor;
mod setup;
#[cfg(feature = "sim")]
mod sim;

use std::env;

use anyhow::{Context, Result};
use time::UtcOffset;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use control::ControlLoop;
use gpio::OutputBoard;
use logfile::RotatingLog;
use plant::{excitation_lines, valve_lines, PlantState};
use report::RemoteReporter;
use sensor::{Probe, SensorSource, SoilSampling};
use setup::SelfTestPlan;

const DEFAULT_LOG_FILTER: &str = "plantwatch_controller=info";

/// Queued valve commands before the control loop starts skipping.
const VALVE_QUEUE: usize = 16;

/// Length of one simulated day.
#[cfg(feature = "sim")]
const SIM_DAY_SECS: f64 = 3600.0;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok().as_deref()))
        .init();

    // The local offset can only be queried soundly while single-threaded.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("local UTC offset unavailable ({e}), using UTC");
        UtcOffset::UTC
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "plantwatch.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(path = %config_path, plants = cfg.plants.len(), "config loaded");

    if cfg.controller.init_hardware {
        let failed = setup::init_hardware(&cfg.init);
        if failed > 0 {
            warn!(failed, "hardware init finished with errors");
        }
    }

    // ── Hardware ────────────────────────────────────────────────────
    let plants: Vec<PlantState> = cfg
        .plants
        .iter()
        .map(|entry| PlantState::from_entry(entry, &cfg.controller))
        .collect();

    let mut valves = OutputBoard::new("valve", &valve_lines(&plants), cfg.controller.valve_active_low)?;
    let mut excitation = OutputBoard::new("excitation", &excitation_lines(&plants), false)?;
    let mut sensors = SensorSource::new(
        probe(&cfg),
        cfg.controller.raw_retry(),
        cfg.controller.hum_temp_retry(),
        SoilSampling {
            samples: cfg.controller.soil_samples,
            delay: cfg.controller.soil_sample_delay(),
        },
    );

    // ── Self-test ───────────────────────────────────────────────────
    if let Ok(text) = env::var("SELF_TEST") {
        let plan = SelfTestPlan::parse(&text, plants.len())?;
        setup::self_test(
            &mut sensors,
            &cfg.ambient.luminosity_input,
            &plants,
            &mut excitation,
            &mut valves,
            &plan,
        )
        .await;
        return Ok(());
    }

    // ── Tasks ───────────────────────────────────────────────────────
    let cancel = CancellationToken::new();

    let (valve_tx, valve_rx) = mpsc::channel(VALVE_QUEUE);
    let actuator = tokio::spawn(actuator::run(valves, valve_rx, None));

    let mut control = ControlLoop::new(
        &cfg,
        plants,
        sensors,
        excitation,
        valve_tx,
        RotatingLog::new(cfg.controller.log_dir.clone()),
        offset,
    );

    let mut remote = None;
    if let Some(remote_cfg) = &cfg.remote {
        let (reporter, eventloop) = RemoteReporter::connect(remote_cfg);
        info!(host = %remote_cfg.host, topic = %remote_cfg.topic, "remote sink enabled");
        remote = Some(tokio::spawn(report::drive(eventloop, cancel.child_token())));
        control = control.with_reporter(reporter);
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("stop signal received, finishing current tick");
            cancel.cancel();
        });
    }

    control.run(cancel.clone()).await;

    if let Err(e) = actuator.await {
        error!("actuator task failed: {e}");
    }
    cancel.cancel();
    if let Some(remote) = remote {
        let _ = remote.await;
    }
    info!("stopped");
    Ok(())
}

/// `RUST_LOG` replaces the default entirely; an unset or unparsable value
/// falls back to info for this crate.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(not(feature = "sim"))]
fn probe(cfg: &Config) -> impl Probe {
    sensor::SysfsProbe::new(cfg.ambient.hum_temp_command.clone())
}

#[cfg(feature = "sim")]
fn probe(cfg: &Config) -> impl Probe {
    sim::SimProbe::new(
        cfg.ambient.luminosity_input.clone(),
        cfg.plants.iter().map(|p| p.moisture_input.clone()),
        SIM_DAY_SECS,
    )
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

// ===========================================================================
// Tests
// ===========================================================================
