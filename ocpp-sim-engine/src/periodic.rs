//! Periodic obligations of a connected session
//!
//! Each loop waits its period (or until cancelled), then does one round of
//! work. A round in progress finishes before cancellation is noticed. Only
//! transport failures end a loop; timeouts and CALLERRORs are logged.

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::{tolerate, wait_for_signal, Engine};
use crate::error::OcppError;
use crate::ocpp::{Call, MeterValue, ReadingContext};

impl Engine {
    /// Heartbeat at the live interval. A reconfigured interval applies to
    /// the cycle in progress.
    pub(crate) async fn heartbeat_loop(
        self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        let mut last = Instant::now();

        loop {
            // Registered before the interval is read, so a change in between still wakes us
            let changed = self.shared.interval_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let interval = self.shared.state.read().await.heartbeat_interval();
            let remaining = interval.saturating_sub(last.elapsed());

            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = &mut changed => {
                    debug!("Heartbeat interval changed, rescheduling");
                    continue;
                }
                _ = wait_for_signal(&mut cancel) => return Ok(()),
            }

            last = Instant::now();
            tolerate("Heartbeat", self.heartbeat().await)?;
        }
    }

    /// Re-announce every connector status at a fixed interval
    pub(crate) async fn status_loop(
        self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        let period = self.shared.config.timing.status_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = wait_for_signal(&mut cancel) => return Ok(()),
            }

            let statuses = self.shared.state.read().await.connector_statuses();
            for (connector_id, status) in statuses {
                tolerate(
                    "StatusNotification",
                    self.status_notification(connector_id, status).await,
                )?;
            }
        }
    }

    /// Report the energy register while a transaction is active
    pub(crate) async fn meter_loop(
        self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        let period = self.shared.config.timing.meter_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = wait_for_signal(&mut cancel) => return Ok(()),
            }

            let Some(sample) = self.shared.state.write().await.meter_sample() else {
                continue;
            };

            debug!(
                "Meter {} Wh on connector {} (transaction {})",
                sample.meter_wh, sample.connector_id, sample.transaction_id
            );
            let call = Call::meter_values(
                sample.connector_id,
                sample.transaction_id,
                vec![MeterValue::energy_register(
                    sample.meter_wh,
                    ReadingContext::SamplePeriodic,
                )],
            )?;
            tolerate("MeterValues", self.request::<serde_json::Value>(call).await.map(|_| ()))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EngineConfig;

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::new("ws://127.0.0.1:1/ocpp", "CP-TEST").with_heartbeat_interval(3600),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_interval_wakes_waiting_heartbeat() {
        let engine = engine();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(engine.clone().heartbeat_loop(cancel_rx));
        tokio::task::yield_now().await;

        engine.shared.state.write().await.set_heartbeat_interval(5);
        engine.shared.interval_changed.notify_waiters();

        // Offline, so the first heartbeat ends the loop
        let result = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("heartbeat waited out the old interval")
            .unwrap();
        assert!(matches!(result, Err(OcppError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_waits_without_overflow() {
        let engine = engine();
        engine.shared.state.write().await.set_heartbeat_interval(u64::MAX);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(engine.clone().heartbeat_loop(cancel_rx));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!task.is_finished());

        cancel_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
