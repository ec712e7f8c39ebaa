// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <cell.rs>

//! The latest-weight cell: one slot, last write wins, never cleared.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::frame::WeightReading;

/// What pollers see for any fault. Kinds stay distinct internally.
pub const ERROR_SENTINEL: &str = "Error: Could not connect to scale";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Port could not be opened.
    Connection,
    /// A frame arrived but its payload was not numeric.
    Payload,
    /// An open port hit EOF or a read error.
    LinkLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WeightState {
    #[default]
    Empty,
    Reading(WeightReading),
    Fault(Fault),
}

#[derive(Debug, Clone, Default)]
pub struct WeightSnapshot {
    pub state: WeightState,
    /// Number of writes so far. Zero means nothing was ever written.
    pub sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WeightSnapshot {
    /// The string handed to pollers: empty, a reading, or the sentinel.
    pub fn weight_text(&self) -> String {
        match &self.state {
            WeightState::Empty => String::new(),
            WeightState::Reading(reading) => reading.to_string(),
            WeightState::Fault(_) => ERROR_SENTINEL.to_string(),
        }
    }

    pub fn as_reading(&self) -> Option<WeightReading> {
        match self.state {
            WeightState::Reading(reading) => Some(reading),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match &self.state {
            WeightState::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Shared handle to the cell. Cloning shares the slot.
#[derive(Debug, Clone)]
pub struct LatestWeight {
    tx: Arc<watch::Sender<WeightSnapshot>>,
}

impl Default for LatestWeight {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestWeight {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WeightSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: WeightState) {
        self.tx.send_modify(|snap| {
            snap.state = state;
            snap.sequence += 1;
            snap.updated_at = Some(Utc::now());
        });
    }

    pub fn set_reading(&self, reading: WeightReading) {
        self.set(WeightState::Reading(reading));
    }

    pub fn set_fault(&self, kind: FaultKind, detail: impl Into<String>) {
        self.set(WeightState::Fault(Fault {
            kind,
            detail: detail.into(),
        }));
    }

    /// Non-blocking copy of the current contents.
    pub fn snapshot(&self) -> WeightSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WeightSnapshot> {
        self.tx.subscribe()
    }
}
