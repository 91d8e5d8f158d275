//! # OCPP Charge Point Simulator Engine
//!
//! Simulates an OCPP 1.6J charge point against a central system over
//! WebSocket: registration, heartbeats, status and meter reporting, and
//! remotely triggered charging transactions.
//!
//! ## Architecture
//!
//! ```text
//! Central System
//!       │ WebSocket "ocpp1.6" (JSON arrays)
//!       ▼
//! ┌──────────────────────────────────────────────┐
//! │  Engine (supervisor: connect → session → backoff)
//! │  ┌───────────┐   ┌─────────┐   ┌───────────┐ │
//! │  │ Transport │──►│  Codec  │──►│Correlation│ │
//! │  └───────────┘   └────┬────┘   └───────────┘ │
//! │                       ▼                      │
//! │                 ┌──────────┐  ┌───────────┐  │
//! │                 │ Dispatch │─►│ Lifecycle │  │
//! │                 └────┬─────┘  └─────┬─────┘  │
//! │                      ▼              ▼        │
//! │               ChargePointState ◄── Periodic  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Central system commands
//!
//! | OCPP Action | Reply | Follow-up |
//! |-------------|-------|-----------|
//! | RemoteStartTransaction | Accepted / Rejected | Authorize → StartTransaction |
//! | RemoteStopTransaction | Accepted / Rejected | StopTransaction |
//! | Reset | Accepted | - |
//! | GetConfiguration | known + unknown keys | - |
//! | ChangeConfiguration | Accepted for `HeartbeatInterval` up to one day | new interval |
//! | anything else | CALLERROR NotSupported | - |
//!
//! ## Usage
//!
//! ```no_run
//! use ocpp_sim_engine::{Engine, EngineConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::new("ws://localhost:9000/ocpp", "CP001")
//!         .with_vendor("Elektrokombinacija", "EK3-OCPP");
//!
//!     let engine = Engine::new(config);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     engine.run(shutdown_rx).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod ocpp;
pub mod periodic;
pub mod state;
pub mod transport;

pub use config::{EndpointIdentity, EngineConfig, SessionConfig, Timing, OCPP_SUBPROTOCOL};
pub use engine::Engine;
pub use error::OcppError;
pub use lifecycle::TransactionSummary;
pub use state::{ActiveTransaction, RegistrationState, MAX_HEARTBEAT_INTERVAL_SECS};
pub use transport::ConnectionState;

// Re-export key protocol types
pub use ocpp::{
    Action, AuthorizationStatus, Call, CallError, CallResult, ChargePointStatus, ErrorCode,
    OcppMessage,
};
