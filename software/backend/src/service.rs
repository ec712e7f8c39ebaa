// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <service.rs>

//! The scale service: owns the cell and the connection, serves snapshots.
//!
//! Construct one per process and share it by `Arc`. Readers call
//! [`ScaleService::get_latest`] at whatever cadence they like; the call never
//! waits on the hardware.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::cell::{FaultKind, LatestWeight, WeightSnapshot, WeightState};
use crate::config::Settings;
use crate::error::ConnectionError;
use crate::event::EventSender;
use crate::port_handler::{ConnectionManager, ScaleLink};

pub struct ScaleService {
    cell: LatestWeight,
    connection: ConnectionManager,
}

/// Diagnostic view served on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ScaleStatus {
    pub port: String,
    pub connected: bool,
    pub opens: u64,
    pub state: &'static str,
    pub weight: String,
    pub fault_kind: Option<FaultKind>,
    pub detail: Option<String>,
    pub sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScaleService {
    pub fn new(
        settings: &Settings,
        link: Arc<dyn ScaleLink>,
        runtime: Handle,
        events: Option<EventSender>,
    ) -> Self {
        let cell = LatestWeight::new();
        let idle_warn = match settings.serial.idle_warn_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let connection = ConnectionManager::new(
            settings.serial.port.clone(),
            settings.framing,
            idle_warn,
            link,
            cell.clone(),
            events,
            runtime,
        );
        Self { cell, connection }
    }

    pub fn ensure_open(&self) -> Result<bool, ConnectionError> {
        self.connection.ensure_open()
    }

    /// Latest cell contents. Opens the port first if nothing is running; an
    /// open failure is already in the cell, so it is only logged here.
    pub fn get_latest(&self) -> WeightSnapshot {
        if let Err(e) = self.connection.ensure_open() {
            log::debug!("poll served with connection fault: {}", e);
        }
        self.cell.snapshot()
    }

    /// Like `get_latest` but with connection details, and without opening.
    pub fn status(&self) -> ScaleStatus {
        let snap = self.cell.snapshot();
        let (state, fault_kind, detail) = match &snap.state {
            WeightState::Empty => ("empty", None, None),
            WeightState::Reading(_) => ("reading", None, None),
            WeightState::Fault(fault) => ("fault", Some(fault.kind), Some(fault.detail.clone())),
        };
        ScaleStatus {
            port: self.connection.port().to_string(),
            connected: self.connection.is_connected(),
            opens: self.connection.open_count(),
            state,
            weight: snap.weight_text(),
            fault_kind,
            detail,
            sequence: snap.sequence,
            updated_at: snap.updated_at,
        }
    }

    pub fn cell(&self) -> &LatestWeight {
        &self.cell
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ERROR_SENTINEL;
    use crate::port_handler::{LinkReader, MockScaleLink};
    use std::io;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.serial.port = "COM1".into();
        settings.serial.idle_warn_secs = 0;
        settings
    }

    #[tokio::test]
    async fn test_get_latest_before_data_is_empty() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut reader = Some(reader);
        let mut link = MockScaleLink::new();
        link.expect_open()
            .times(1)
            .returning(move |_: &str| Ok(Box::new(reader.take().unwrap()) as LinkReader));

        let service = ScaleService::new(&settings(), Arc::new(link), Handle::current(), None);
        let snap = service.get_latest();
        assert_eq!(snap.weight_text(), "");
        assert_eq!(snap.sequence, 0);

        // Polling again does not reopen a live link.
        service.get_latest();
        assert_eq!(service.status().opens, 1);
    }

    #[tokio::test]
    async fn test_get_latest_swallows_open_failure() {
        let mut link = MockScaleLink::new();
        link.expect_open().returning(|_: &str| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
        });
        let service = ScaleService::new(&settings(), Arc::new(link), Handle::current(), None);

        let snap = service.get_latest();
        assert_eq!(snap.weight_text(), ERROR_SENTINEL);

        let status = service.status();
        assert_eq!(status.state, "fault");
        assert_eq!(status.fault_kind, Some(FaultKind::Connection));
        assert!(!status.connected);
        assert_eq!(status.opens, 0);
        assert!(status.detail.unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_status_does_not_open() {
        let link = MockScaleLink::new();
        let service = ScaleService::new(&settings(), Arc::new(link), Handle::current(), None);
        let status = service.status();
        assert_eq!(status.state, "empty");
        assert_eq!(status.port, "COM1");
        assert!(!status.connected);
    }
}
