// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <logging.rs>

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::event::Event;

/// `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    use env_logger::Env;
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .try_init();
}

/// Append-only JSON-lines file of pipeline events.
pub struct EventLog {
    file: File,
}

impl EventLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = writeln!(self.file, "{}", json) {
                    log::warn!("failed to write event log: {}", e);
                }
            }
            Err(e) => log::warn!("failed to serialise event: {}", e),
        }
    }
}
