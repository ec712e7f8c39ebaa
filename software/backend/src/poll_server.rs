// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <poll_server.rs>

//! HTTP poll endpoint.
//!
//! `GET /weight` answers `{"weight": "<text>"}` with status 200 whatever the
//! scale is doing; hardware trouble shows up as the sentinel text, never as
//! an HTTP error. `GET /status` returns the diagnostic view.

use std::sync::Arc;

use serde::Serialize;
use tiny_http::{Header, Method, Response, Server};

use crate::error::ServerError;
use crate::service::ScaleService;

#[derive(Debug, Serialize)]
pub struct WeightResponse {
    pub weight: String,
}

pub struct PollServer {
    server: Server,
}

impl PollServer {
    pub fn bind(addr: &str) -> Result<Self, ServerError> {
        let server = Server::http(addr).map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        log::info!("[HTTP] listening on {}", server.server_addr());
        Ok(Self { server })
    }

    pub fn local_port(&self) -> Option<u16> {
        self.server.server_addr().to_ip().map(|addr| addr.port())
    }

    /// Blocks until [`PollServer::unblock`] is called.
    pub fn serve(&self, service: &ScaleService) {
        for request in self.server.incoming_requests() {
            let (status, body) = route(service, request.method(), request.url());
            log::trace!("[HTTP] {} {} -> {}", request.method(), request.url(), status);

            let mut response = Response::from_string(body).with_status_code(status);
            for (name, value) in [
                ("Content-Type", "application/json"),
                ("Cache-Control", "no-store"),
            ] {
                if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                    response.add_header(header);
                }
            }

            if let Err(e) = request.respond(response) {
                log::warn!("[HTTP] failed to send response: {}", e);
            }
        }
        log::info!("[HTTP] server stopped");
    }

    pub fn unblock(&self) {
        self.server.unblock();
    }
}

/// Runs the server on a blocking thread of the current runtime.
pub fn spawn(
    server: Arc<PollServer>,
    service: Arc<ScaleService>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || server.serve(&service))
}

fn route(service: &ScaleService, method: &Method, url: &str) -> (u16, String) {
    let path = url.split('?').next().unwrap_or(url);

    let body = match (method, path) {
        (Method::Get, "/weight") => {
            let weight = service.get_latest().weight_text();
            serde_json::to_string(&WeightResponse { weight })
        }
        (Method::Get, "/status") => serde_json::to_string(&service.status()),
        (_, "/weight" | "/status") => return (405, error_body("method not allowed")),
        _ => return (404, error_body("not found")),
    };

    match body {
        Ok(body) => (200, body),
        Err(e) => {
            log::error!("[HTTP] failed to serialise response: {}", e);
            (500, error_body("internal error"))
        }
    }
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
