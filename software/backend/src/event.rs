// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <event.rs>

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::frame::WeightReading;

pub type EventSender = UnboundedSender<Event>;

#[derive(Debug, Serialize, Clone)]
pub struct Event {
    pub port: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(port: impl Into<String>, kind: EventKind) -> Self {
        Self {
            port: port.into(),
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Opened,
    OpenFailed { error: String },
    ChunkReceived { len: usize, hex: String },
    Parsed { weight: WeightReading },
    /// Payload bytes in hex.
    ParseFailed { payload: String },
    /// Window too short to decode, dropped as noise.
    Discarded { len: usize },
    Idle { secs: u64 },
    LinkLost { error: Option<String> },
}

/// Sends without caring whether anyone listens.
pub fn emit(tx: Option<&EventSender>, port: &str, kind: EventKind) {
    if let Some(tx) = tx {
        let _ = tx.send(Event::new(port, kind));
    }
}
