// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <lib.rs>

//! Weighbridge scale bridge.
//!
//! Reads the weighing indicator over a serial line, decodes its frames and
//! keeps the latest weight for the front desk to poll.

pub mod accumulator;
pub mod cell;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod logging;
pub mod poll_server;
pub mod port_handler;
pub mod service;
pub mod transaction;

pub use cell::{LatestWeight, WeightSnapshot, WeightState, ERROR_SENTINEL};
pub use config::Settings;
pub use frame::{decode, WeightReading};
pub use service::ScaleService;
