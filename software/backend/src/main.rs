// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <main.rs>

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;
use tokio::signal;
use tokio::sync::mpsc;

use weighbridge::event::Event;
use weighbridge::logging::{init_logging, EventLog};
use weighbridge::poll_server::{self, PollServer};
use weighbridge::port_handler::SerialLink;
use weighbridge::config::Cli;
use weighbridge::{ScaleService, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;
    init_logging(&settings.logging.filter);
    log::info!(
        "scale on {}, framing {:?}, polling at http://{}/weight",
        settings.serial.port,
        settings.framing,
        settings.server.bind
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut event_log = match settings.logging.event_log.as_deref() {
        Some(path) => Some(
            EventLog::open(path)
                .with_context(|| format!("cannot open event log {}", path.display()))?,
        ),
        None => None,
    };

    let service = Arc::new(ScaleService::new(
        &settings,
        Arc::new(SerialLink),
        Handle::current(),
        Some(tx),
    ));

    let server = Arc::new(PollServer::bind(&settings.server.bind)?);
    let server_task = poll_server::spawn(Arc::clone(&server), Arc::clone(&service));

    if settings.server.open_on_start {
        if let Err(e) = service.ensure_open() {
            log::debug!("start-up open failed: {}", e);
        }
    }

    let mut shutdown = tokio::spawn(async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Ctrl+C received, shutting down");
    });

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                log::trace!("[{}] event {:?}", event.port, event.kind);
                if let Some(log) = event_log.as_mut() {
                    log.append(&event);
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    server.unblock();
    service.shutdown();
    if let Err(e) = server_task.await {
        log::warn!("poll server task failed: {}", e);
    }

    log::info!("main loop finished");
    Ok(())
}
