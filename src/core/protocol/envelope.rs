// src/core/protocol/envelope.rs

//! The gateway's wire format: newline-delimited JSON envelopes.
//!
//! Each line carries exactly one message, tagged by `type`:
//!
//! ```text
//! -> {"type":"connect","ip":"10.0.0.5"}
//! <- {"type":"connect","success":true,"message":"connected to 10.0.0.5"}
//! -> {"type":"command","command":"LIST"}
//! <- {"type":"command","output":"..."}
//! -> {"type":"disconnect","ip":"10.0.0.5"}
//! <- {"type":"disconnect","success":true,"message":"disconnected from 10.0.0.5"}
//! ```

use crate::core::errors::GatewayError;
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound on a single encoded envelope, newline excluded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub output: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub ip: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRequest {
    pub ip: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
}

/// Anything a client may send on its stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Command(CommandRequest),
    Connect(ConnectRequest),
    Disconnect(DisconnectRequest),
}

/// Anything the gateway sends back; exactly one per `Request`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Command(CommandResponse),
    Connect(ConnectResponse),
    Disconnect(DisconnectResponse),
}

impl Request {
    pub fn command(command: impl Into<String>) -> Self {
        Request::Command(CommandRequest {
            command: command.into(),
        })
    }

    pub fn connect(ip: impl Into<String>) -> Self {
        Request::Connect(ConnectRequest { ip: ip.into() })
    }

    pub fn disconnect(ip: impl Into<String>) -> Self {
        Request::Disconnect(DisconnectRequest { ip: ip.into() })
    }
}

/// Line-delimited JSON codec. The server decodes `Request`s and encodes
/// `Response`s; the client does the reverse.
#[derive(Debug)]
pub struct EnvelopeCodec<In, Out> {
    max_frame_bytes: usize,
    /// How far into the buffer the newline search has already looked.
    next_index: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

/// The codec as seen by the gateway.
pub type ServerCodec = EnvelopeCodec<Request, Response>;
/// The codec as seen by a shell client.
pub type ClientCodec = EnvelopeCodec<Response, Request>;

impl<In, Out> EnvelopeCodec<In, Out> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            _marker: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl<In, Out> Default for EnvelopeCodec<In, Out> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<In: DeserializeOwned, Out> Decoder for EnvelopeCodec<In, Out> {
    type Item = In;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_frame_bytes {
                    return Err(GatewayError::FrameTooLarge(self.max_frame_bytes));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            if newline > self.max_frame_bytes {
                return Err(GatewayError::FrameTooLarge(self.max_frame_bytes));
            }

            let line = src.split_to(newline + 1);
            let body = trim_line(&line[..newline]);
            // Blank keep-alive lines carry no request.
            if body.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(body)?;
            return Ok(Some(serde_json::from_str(text)?));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        // A final envelope without its trailing newline is still accepted.
        let body = trim_line(&src[..]);
        if body.is_empty() {
            src.clear();
            return Ok(None);
        }
        let item = serde_json::from_str(std::str::from_utf8(body)?)?;
        src.advance(src.len());
        self.next_index = 0;
        Ok(Some(item))
    }
}

impl<In, Out: Serialize> Encoder<Out> for EnvelopeCodec<In, Out> {
    type Error = GatewayError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = serde_json::to_vec(&item)?;
        if encoded.len() > self.max_frame_bytes {
            return Err(GatewayError::FrameTooLarge(self.max_frame_bytes));
        }
        dst.reserve(encoded.len() + 1);
        dst.put_slice(&encoded);
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line.trim_ascii()
}
