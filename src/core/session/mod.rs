// src/core/session/mod.rs

//! Sessions: one per open client stream, created and torn down by the
//! `SessionManager`.

mod manager;
mod state;

pub use manager::{ConnectOutcome, SessionManager};
pub use state::{Session, SessionId, SessionPhase};
