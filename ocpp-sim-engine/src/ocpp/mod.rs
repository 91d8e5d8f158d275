//! OCPP 1.6J protocol implementation
//!
//! - `types`: payloads and enumerations
//! - `messages`: JSON array framing (CALL, CALLRESULT, CALLERROR)

pub mod types;
pub mod messages;

pub use types::*;
pub use messages::*;
