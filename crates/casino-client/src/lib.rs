//! # casino-client
//!
//! Client runtime for the casino server:
//!
//! - **Connection**: [`ConnectionManager`] state machine with capped
//!   fixed-interval reconnects over a pluggable [`Connector`]
//! - **Correlation**: [`RequestCorrelator`] matches responses to requests by nonce
//! - **Session**: [`SessionManager`] binds authentication to the connection
//!   lifecycle and restores it from the stored token
//! - **Data**: [`DataClient`] for opaque `db/op` table access and
//!   [`CurrentUser`] for the authenticated user's profile
//! - **Facade**: [`CasinoClient`] wires it all together from settings

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod correlator;
pub mod data;
pub mod events;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transport;
pub mod user;

pub use client::CasinoClient;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use correlator::RequestCorrelator;
pub use data::{DataClient, DbOpResult};
pub use events::{ClientEvent, ClientEventKind, ConnectionEvent, ConnectionEventKind};
pub use protocol::{Call, DbOperation};
pub use session::{LoginOutcome, RegisterOutcome, Session, SessionManager};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{Connector, MemoryConnector, TransportFrame, TransportLink, WsConnector};
pub use user::{CurrentUser, UserProfile};

pub use casino_core::{ClientError, Result};
