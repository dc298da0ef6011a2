//! # casino-core
//!
//! Foundation pieces shared by every casino client crate:
//!
//! - **Codec**: [`WireEnvelope`] and the textual `{type, payload, nonce}` framing
//! - **Event bus**: [`EventBus`], a named-event pub/sub with per-listener panic isolation
//! - **Errors**: [`ClientError`] taxonomy used across the connection, correlation,
//!   and session layers
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod bus;
pub mod codec;
pub mod errors;
pub mod logging;

pub use bus::{BusEvent, EventBus, Listener};
pub use codec::{WireEnvelope, decode, encode};
pub use errors::{ClientError, CodecError, Result};
