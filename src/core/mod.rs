// src/core/mod.rs

//! The gateway core: the connection registry, sessions, and the per-session
//! command dispatcher, plus the backend seam and wire protocol they use.

pub mod backend;
pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;

pub use dispatcher::{CommandDispatcher, SessionQueue};
pub use errors::{CommandError, ConnectError, DisconnectError, DriverError, GatewayError};
pub use registry::{ConnectionRef, ConnectionRegistry};
pub use session::{ConnectOutcome, Session, SessionManager, SessionPhase};
pub use state::GatewayState;
