// src/connection/mod.rs

//! Manages the lifecycle of a single client stream: envelope framing, the
//! session's request queue, and guaranteed teardown.

mod guard;
mod handler;

pub use guard::SessionGuard;
pub use handler::ConnectionHandler;
