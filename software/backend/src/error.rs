// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <error.rs>

//! Error types for the scale bridge.
//!
//! Decode errors never leave the reader task; they are turned into cell
//! updates or log lines. Connection errors are captured into the cell at
//! the poll boundary. Only configuration and server start-up errors reach
//! `main`.

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::{HexDump, MIN_FRAME_LEN};

/// Why a candidate window did not produce a weight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Window too short to carry a payload. Treated as line noise.
    #[error("frame too short: {len} bytes, need more than {}", MIN_FRAME_LEN)]
    TooShort { len: usize },

    /// Window long enough, but the payload is not an ASCII integer.
    #[error("non-numeric payload [{}]", HexDump(payload.as_slice()))]
    NonNumeric { payload: Vec<u8> },
}

/// Failures of the hardware link.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("could not open scale port {port}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read from scale port {port} failed")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not bind poll server on {addr}: {message}")]
    Bind { addr: String, message: String },
}

/// Rejections while filling in a weigh ticket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("cannot record weight, scale not connected or reading invalid ({0:?})")]
    NoReading(String),

    #[error("ticket incomplete: {0}")]
    Incomplete(&'static str),
}

/// The error and its causes on one line, `outer: cause: cause`.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut cause = e.source();
    while let Some(inner) = cause {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}
