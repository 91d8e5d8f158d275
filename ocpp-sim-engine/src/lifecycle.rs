//! Transaction lifecycle and console operations
//!
//! Start: Preparing → Authorize → StartTransaction → Charging. A rejected or
//! timed-out authorization releases the connector without a StartTransaction.
//!
//! Stop: StopTransaction with an advanced meter reading; the record is cleared
//! only once the request went out, then the connector returns to Available.

use tokio::sync::watch;
use tracing::{info, warn};

use crate::dispatch::DEFAULT_CONNECTOR;
use crate::engine::{tolerate, wait_for_signal, Engine};
use crate::error::OcppError;
use crate::ocpp::*;
use crate::state::StopClaim;

/// Result of [`Engine::run_full_transaction`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub transaction_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: u64,
    pub meter_stop: u64,
}

impl TransactionSummary {
    /// Energy delivered during the transaction, in Wh
    pub fn energy_wh(&self) -> u64 {
        self.meter_stop.saturating_sub(self.meter_start)
    }
}

impl Engine {
    /// Ask the central system whether `id_tag` (or the configured default tag) may charge
    pub async fn authorize(&self, id_tag: Option<&str>) -> Result<AuthorizationStatus, OcppError> {
        self.authorize_tag(self.id_tag_or_default(id_tag)).await
    }

    /// Authorize, start, send one meter sample and stop with reason `Local`.
    /// Without an `id_tag` the configured default tag is used.
    pub async fn run_full_transaction(
        &self,
        id_tag: Option<&str>,
    ) -> Result<TransactionSummary, OcppError> {
        let id_tag = self.id_tag_or_default(id_tag);
        let connector_id = DEFAULT_CONNECTOR;
        self.shared.state.write().await.begin_start(connector_id)?;

        let (transaction_id, meter_start) = self.authorize_and_start(id_tag, connector_id).await?;

        tolerate("MeterValues", self.send_meter_sample().await)?;

        let claim = self
            .shared
            .state
            .write()
            .await
            .begin_stop(transaction_id)
            .ok_or(OcppError::TransactionNotActive(transaction_id))?;
        let meter_stop = self.stop_transaction(claim, StopReason::Local).await?;

        Ok(TransactionSummary {
            transaction_id,
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            meter_stop,
        })
    }

    fn id_tag_or_default<'a>(&'a self, id_tag: Option<&'a str>) -> &'a str {
        id_tag.unwrap_or(&self.shared.config.session.default_id_tag)
    }

    async fn authorize_tag(&self, id_tag: &str) -> Result<AuthorizationStatus, OcppError> {
        let call = Call::authorize(id_tag)?;
        let payload = self
            .call(call, self.shared.config.timing.authorize_timeout)
            .await?;
        let response: AuthorizeResponse = serde_json::from_value(payload)?;

        let status = response.id_tag_info.status;
        if status == AuthorizationStatus::Accepted {
            info!("Id tag {} authorized", id_tag);
        } else {
            warn!("Id tag {} not authorized: {:?}", id_tag, status);
        }
        Ok(status)
    }

    /// Set connector 1 to `status` (case-insensitive name) and announce it
    pub async fn set_connector_status(&self, status: &str) -> Result<(), OcppError> {
        let status: ChargePointStatus = status.parse()?;
        self.shared
            .state
            .write()
            .await
            .set_connector_status(DEFAULT_CONNECTOR, status);

        info!("Connector {} -> {}", DEFAULT_CONNECTOR, status);
        self.status_notification(DEFAULT_CONNECTOR, status).await
    }

    /// Background half of an accepted RemoteStartTransaction
    pub(crate) async fn start_sequence(
        &self,
        id_tag: String,
        connector_id: u32,
    ) -> Result<(), OcppError> {
        self.authorize_and_start(&id_tag, connector_id)
            .await
            .map(|_| ())
    }

    /// Background half of an accepted RemoteStopTransaction
    pub(crate) async fn stop_sequence(
        &self,
        claim: StopClaim,
        reason: StopReason,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        tokio::select! {
            _ = tokio::time::sleep(self.shared.config.timing.stop_delay) => {}
            _ = wait_for_signal(&mut cancel) => {
                self.shared.state.write().await.abort_stop(claim.transaction_id);
                return Err(OcppError::Cancelled);
            }
        }

        self.stop_transaction(claim, reason).await.map(|_| ())
    }

    /// Run the start half on a connector already claimed with `begin_start`.
    /// Returns the transaction id and the meter start reading.
    async fn authorize_and_start(
        &self,
        id_tag: &str,
        connector_id: u32,
    ) -> Result<(i32, u64), OcppError> {
        self.update_status(connector_id, ChargePointStatus::Preparing)
            .await;

        match self.try_start(id_tag, connector_id).await {
            Ok(started) => {
                self.update_status(connector_id, ChargePointStatus::Charging)
                    .await;
                Ok(started)
            }
            Err(e) => {
                self.shared.state.write().await.abort_start(connector_id);
                self.update_status(connector_id, ChargePointStatus::Available)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_start(&self, id_tag: &str, connector_id: u32) -> Result<(i32, u64), OcppError> {
        let status = self.authorize_tag(id_tag).await?;
        if status != AuthorizationStatus::Accepted {
            return Err(OcppError::NotAuthorized(status));
        }

        let meter_start = self.shared.state.read().await.meter_reading();
        let call = Call::start_transaction(connector_id, id_tag, meter_start)?;
        let response: StartTransactionResponse = self.request(call).await?;

        if response.id_tag_info.status != AuthorizationStatus::Accepted {
            warn!(
                "Transaction {} started with id tag status {:?}",
                response.transaction_id, response.id_tag_info.status
            );
        }

        self.shared.state.write().await.record_start(
            connector_id,
            response.transaction_id,
            id_tag,
            meter_start,
        );
        Ok((response.transaction_id, meter_start))
    }

    /// Send StopTransaction for a claimed record. Returns the meter stop value.
    pub(crate) async fn stop_transaction(
        &self,
        claim: StopClaim,
        reason: StopReason,
    ) -> Result<u64, OcppError> {
        let meter_stop = {
            let mut state = self.shared.state.write().await;
            if state.transaction().map(|tx| tx.transaction_id) != Some(claim.transaction_id) {
                return Err(OcppError::TransactionNotActive(claim.transaction_id));
            }
            state.advance_meter()
        };

        let call = Call::stop_transaction(
            claim.transaction_id,
            Some(claim.id_tag.clone()),
            meter_stop,
            reason,
        )?;
        let outcome = self
            .call(call, self.shared.config.timing.request_timeout)
            .await;

        // Timeouts and CALLERRORs mean the frame reached the wire
        let delivered = match &outcome {
            Ok(_) => true,
            Err(e) => !(e.is_transport_fatal() || matches!(e, OcppError::Cancelled)),
        };

        if delivered {
            self.shared
                .state
                .write()
                .await
                .complete_stop(claim.transaction_id);
            self.update_status(claim.connector_id, ChargePointStatus::Available)
                .await;
        } else {
            self.shared
                .state
                .write()
                .await
                .abort_stop(claim.transaction_id);
        }

        outcome.map(|_| meter_stop)
    }

    /// One MeterValues round, if a transaction is active
    async fn send_meter_sample(&self) -> Result<(), OcppError> {
        let Some(sample) = self.shared.state.write().await.meter_sample() else {
            return Ok(());
        };

        let call = Call::meter_values(
            sample.connector_id,
            sample.transaction_id,
            vec![MeterValue::energy_register(
                sample.meter_wh,
                ReadingContext::SamplePeriodic,
            )],
        )?;
        self.call(call, self.shared.config.timing.request_timeout)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> Engine {
        Engine::new(EngineConfig::new("ws://127.0.0.1:1/ocpp", "CP-TEST"))
    }

    #[test]
    fn test_summary_energy() {
        let summary = TransactionSummary {
            transaction_id: 1,
            connector_id: 1,
            id_tag: "abc123".into(),
            meter_start: 1_000,
            meter_stop: 1_250,
        };
        assert_eq!(summary.energy_wh(), 250);
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected_before_sending() {
        let engine = engine();
        assert!(matches!(
            engine.set_connector_status("plugged").await,
            Err(OcppError::UnknownStatus(_))
        ));
        assert_eq!(
            engine.connector_status(1).await,
            Some(ChargePointStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_set_status_records_even_when_offline() {
        let engine = engine();
        let result = engine.set_connector_status("faulted").await;
        assert!(matches!(result, Err(OcppError::NotConnected)));
        assert_eq!(
            engine.connector_status(1).await,
            Some(ChargePointStatus::Faulted)
        );
    }

    #[tokio::test]
    async fn test_failed_start_releases_connector() {
        let engine = engine();
        let result = engine.run_full_transaction(Some("abc123")).await;
        assert!(matches!(result, Err(OcppError::NotConnected)));

        assert!(engine.transaction().await.is_none());
        assert!(engine.shared.state.read().await.can_start(DEFAULT_CONNECTOR));
        assert_eq!(
            engine.connector_status(DEFAULT_CONNECTOR).await,
            Some(ChargePointStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_undelivered_stop_keeps_record() {
        let engine = engine();
        let claim = {
            let mut state = engine.shared.state.write().await;
            state.begin_start(1).unwrap();
            state.record_start(1, 42, "abc123", 100);
            state.begin_stop(42).unwrap()
        };

        let result = engine.stop_transaction(claim, StopReason::Remote).await;
        assert!(matches!(result, Err(OcppError::NotConnected)));

        let tx = engine.transaction().await.unwrap();
        assert_eq!(tx.transaction_id, 42);
        assert!(!tx.stopping);
    }

    #[tokio::test]
    async fn test_stop_for_cleared_record_sends_nothing() {
        let engine = engine();
        let claim = StopClaim {
            transaction_id: 7,
            connector_id: 1,
            id_tag: "abc123".into(),
        };
        let before = engine.meter_reading().await;

        let result = engine.stop_transaction(claim, StopReason::Local).await;
        assert!(matches!(result, Err(OcppError::TransactionNotActive(7))));
        assert_eq!(engine.meter_reading().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_stop_releases_claim() {
        let engine = engine();
        let claim = {
            let mut state = engine.shared.state.write().await;
            state.begin_start(1).unwrap();
            state.record_start(1, 9, "abc123", 100);
            state.begin_stop(9).unwrap()
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let result = engine
            .stop_sequence(claim, StopReason::Remote, cancel_rx)
            .await;
        assert!(matches!(result, Err(OcppError::Cancelled)));
        assert!(engine.shared.state.read().await.is_stoppable(9));
    }
}
