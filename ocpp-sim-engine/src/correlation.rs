//! Request/response correlation
//!
//! Every CALL the charge point sends registers a single-use waiter under its
//! message id. The entry leaves the table exactly once: when a reply resolves
//! it, when the caller's deadline expires, or when the session tears down and
//! cancels everything still outstanding. Whoever removes the entry owns the
//! resolution, so a waiter can never be resolved twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::OcppError;
use crate::ocpp::{Action, Call, ErrorCode};

/// What a waiter eventually receives
pub type Outcome = Result<Value, OcppError>;

/// Pending request awaiting response
struct PendingRequest {
    action: Action,
    created_at: Instant,
    response_tx: oneshot::Sender<Outcome>,
}

/// Receiving half handed back by [`CorrelationTable::register`]
pub struct Waiter {
    pub message_id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl Waiter {
    /// Wait for the reply, racing it against `timeout`.
    ///
    /// On expiry the entry is removed from `table`. If a reply slipped in
    /// between the deadline and the removal, that reply wins.
    pub async fn wait(mut self, table: &CorrelationTable, timeout: Duration) -> Outcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(OcppError::Cancelled),
            Err(_) => {
                if table.remove(&self.message_id) {
                    Err(OcppError::Timeout)
                } else {
                    self.rx.await.unwrap_or(Err(OcppError::Cancelled))
                }
            }
        }
    }
}

/// Thread-safe map of in-flight requests
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for an outgoing CALL, keyed by its message id
    pub fn register(&self, call: &Call) -> Waiter {
        let message_id = call.message_id.clone();
        let (response_tx, rx) = oneshot::channel();

        self.pending.lock().insert(
            message_id.clone(),
            PendingRequest {
                action: call.action.clone(),
                created_at: Instant::now(),
                response_tx,
            },
        );

        Waiter { message_id, rx }
    }

    /// Deliver a CALLRESULT payload. Returns `false` for unknown ids.
    pub fn resolve(&self, message_id: &str, payload: Value) -> bool {
        self.complete(message_id, Ok(payload))
    }

    /// Deliver a CALLERROR. Returns `false` for unknown ids.
    pub fn reject(
        &self,
        message_id: &str,
        code: ErrorCode,
        description: String,
        details: Value,
    ) -> bool {
        self.complete(
            message_id,
            Err(OcppError::RemoteError {
                code,
                description,
                details,
            }),
        )
    }

    fn complete(&self, message_id: &str, outcome: Outcome) -> bool {
        let Some(req) = self.pending.lock().remove(message_id) else {
            return false;
        };

        debug!(
            "{} ({}) answered after {:?}",
            req.action,
            message_id,
            req.created_at.elapsed()
        );
        // The caller may have given up already; nothing to do then.
        let _ = req.response_tx.send(outcome);
        true
    }

    /// Drop an entry without resolving it. Returns whether it was present.
    pub fn remove(&self, message_id: &str) -> bool {
        self.pending.lock().remove(message_id).is_some()
    }

    /// Resolve every outstanding waiter with `Cancelled` and empty the table
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (message_id, req) in drained {
            debug!("Cancelling {} ({})", req.action, message_id);
            let _ = req.response_tx.send(Err(OcppError::Cancelled));
        }

        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.pending.lock().contains_key(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::ChargePointStatus;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_resolve_delivers_payload_once() {
        let table = CorrelationTable::new();
        let waiter = table.register(&Call::heartbeat().unwrap());
        let id = waiter.message_id.clone();

        assert!(table.resolve(&id, json!({"currentTime": "2026-01-20T12:00:00Z"})));
        assert!(!table.contains(&id));

        // A duplicate reply is a no-op
        assert!(!table.resolve(&id, json!({})));
        assert!(!table.reject(&id, ErrorCode::GenericError, String::new(), json!({})));

        let outcome = waiter.wait(&table, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome["currentTime"], "2026-01-20T12:00:00Z");
    }

    #[tokio::test]
    async fn test_reject_surfaces_remote_error() {
        let table = CorrelationTable::new();
        let waiter = table.register(&Call::authorize("abc123").unwrap());
        let id = waiter.message_id.clone();

        table.reject(&id, ErrorCode::InternalError, "boom".into(), json!({}));

        match waiter.wait(&table, Duration::from_secs(1)).await {
            Err(OcppError::RemoteError { code, description, .. }) => {
                assert_eq!(code, ErrorCode::InternalError);
                assert_eq!(description, "boom");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = CorrelationTable::new();
        let waiter = table.register(&Call::authorize("abc123").unwrap());
        let id = waiter.message_id.clone();

        let outcome = waiter.wait(&table, Duration::from_secs(40)).await;
        assert!(matches!(outcome, Err(OcppError::Timeout)));
        assert!(!table.contains(&id));

        // Late reply after the deadline is discarded
        assert!(!table.resolve(&id, json!({})));
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_every_waiter() {
        let table = CorrelationTable::new();
        let waiters: Vec<_> = (0..3).map(|_| table.register(&Call::heartbeat().unwrap())).collect();
        assert_eq!(table.len(), 3);

        assert_eq!(table.cancel_all(), 3);
        assert!(table.is_empty());

        for waiter in waiters {
            let outcome = waiter.wait(&table, Duration::from_secs(1)).await;
            assert!(matches!(outcome, Err(OcppError::Cancelled)));
        }
    }

    #[test]
    fn test_waiter_stays_pending_until_resolved() {
        let table = CorrelationTable::new();
        let waiter = table.register(&Call::status_notification(1, ChargePointStatus::Available).unwrap());
        let id = waiter.message_id.clone();

        let mut rx = task::spawn(waiter.rx);
        assert_pending!(rx.poll());

        table.resolve(&id, json!({}));
        assert!(rx.is_woken());
        let outcome = assert_ready!(rx.poll()).unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_leave_table_empty() {
        let table = CorrelationTable::new();
        let ok = table.register(&Call::heartbeat().unwrap());
        let err = table.register(&Call::heartbeat().unwrap());
        let _cancelled = table.register(&Call::heartbeat().unwrap());

        table.resolve(&ok.message_id, json!({}));
        table.reject(&err.message_id, ErrorCode::NotSupported, String::new(), json!({}));
        assert_eq!(table.len(), 1);

        table.cancel_all();
        assert!(table.is_empty());
        assert_eq!(table.cancel_all(), 0);
    }
}
