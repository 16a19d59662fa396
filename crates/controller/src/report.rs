//! Remote telemetry sink.
//!
//! Each tick publishes one ambient row to an MQTT topic that the sink stores
//! as a table row with the fixed `(Date, Humidity, Temperature, Luminosity)`
//! schema. Publishing only queues the message for the event loop task, and
//! even that is bounded by `push_timeout` so a stalled connection can never
//! hold up the sampling cadence.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RemoteConfig;

/// Raw luminosity is divided by this before upload.
pub const LUMINOSITY_SCALE: f64 = 20000.0;

// ---------------------------------------------------------------------------
// Row schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbientRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Luminosity")]
    pub luminosity: f64,
}

impl AmbientRow {
    pub fn new(when: OffsetDateTime, humidity: f64, temperature: f64, luminosity: u32) -> Self {
        Self {
            date: format!(
                "{:02}-{:02}-{} {}:{:02}",
                when.month() as u8,
                when.day(),
                when.year(),
                when.hour(),
                when.minute()
            ),
            humidity: round2(humidity),
            temperature: round2(temperature),
            luminosity: f64::from(luminosity) / LUMINOSITY_SCALE,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

pub struct RemoteReporter {
    client: AsyncClient,
    topic: String,
    timeout: Duration,
}

impl RemoteReporter {
    /// Build the client; the returned event loop must be driven (see
    /// [`drive`]) for anything to leave the process.
    pub fn connect(cfg: &RemoteConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        (
            Self::new(client, cfg.topic.clone(), cfg.push_timeout()),
            eventloop,
        )
    }

    pub fn new(client: AsyncClient, topic: String, timeout: Duration) -> Self {
        Self {
            client,
            topic,
            timeout,
        }
    }

    /// Queue one ambient row for upload.
    pub async fn push(
        &self,
        when: OffsetDateTime,
        humidity: f64,
        temperature: f64,
        luminosity: u32,
    ) -> Result<()> {
        let row = AmbientRow::new(when, humidity, temperature, luminosity);
        let payload = serde_json::to_vec(&row).context("failed to encode row")?;

        tokio::time::timeout(
            self.timeout,
            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| anyhow!("push timed out after {:?}", self.timeout))?
        .context("publish failed")?;

        Ok(())
    }
}

/// Poll the MQTT event loop until cancelled, reconnecting after errors.
pub async fn drive(mut eventloop: EventLoop, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("remote sink connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!("remote sink error: {e}. retrying...");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                    }
                }
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    /// Client whose event loop is never polled: publishes pile up in the
    /// request channel until it is full.
    fn test_client(cap: usize) -> (AsyncClient, EventLoop) {
        let opts = MqttOptions::new("test-reporter", "127.0.0.1", 1883);
        AsyncClient::new(opts, cap)
    }

    // -- Row schema -------------------------------------------------------

    #[test]
    fn row_uses_fixed_columns() {
        let row = AmbientRow::new(datetime!(2024-03-01 09:05 UTC), 45.123, 71.6, 1000);
        let json = serde_json::to_value(&row).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(json["Date"], "03-01-2024 9:05");
        assert_eq!(json["Humidity"], 45.12);
        assert_eq!(json["Temperature"], 71.6);
        assert_eq!(json["Luminosity"], 0.05);
    }

    #[test]
    fn luminosity_is_normalised() {
        let row = AmbientRow::new(datetime!(2024-03-01 09:05 UTC), 50.0, 70.0, 20000);
        assert_eq!(row.luminosity, 1.0);
    }

    // -- Push -------------------------------------------------------------

    #[tokio::test]
    async fn push_queues_row() {
        let (client, _el) = test_client(10);
        let reporter = RemoteReporter::new(client, "plantwatch/ambient".into(), Duration::from_millis(100));
        reporter
            .push(datetime!(2024-03-01 09:05 UTC), 45.0, 70.0, 1200)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn push_times_out_when_event_loop_stalls() {
        let (client, _el) = test_client(1);
        let reporter = RemoteReporter::new(client, "plantwatch/ambient".into(), Duration::from_millis(50));
        let now = datetime!(2024-03-01 09:05 UTC);

        reporter.push(now, 45.0, 70.0, 1200).await.unwrap();
        let err = reporter.push(now, 45.0, 70.0, 1200).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err:#}");
    }

    #[tokio::test]
    async fn push_fails_when_event_loop_is_gone() {
        let (client, el) = test_client(10);
        drop(el);
        let reporter = RemoteReporter::new(client, "plantwatch/ambient".into(), Duration::from_millis(100));
        assert!(reporter
            .push(datetime!(2024-03-01 09:05 UTC), 45.0, 70.0, 1200)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn drive_stops_on_cancel() {
        let (_client, el) = test_client(10);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), drive(el, cancel))
            .await
            .unwrap();
    }
}
