// src/core/protocol/mod.rs

pub mod envelope;

pub use envelope::{
    ClientCodec, CommandRequest, CommandResponse, ConnectRequest, ConnectResponse,
    DisconnectRequest, DisconnectResponse, EnvelopeCodec, Request, Response, ServerCodec,
};
