// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <accumulator.rs>

//! Reassembly of the serial byte stream into candidate weight windows.
//!
//! Two framing modes are supported:
//!
//! - [`FramingMode::PerChunk`]: every read from the port is one window, with
//!   no buffering across reads. Matches indicators that push exactly one
//!   frame per burst.
//! - [`FramingMode::Fixed`]: a rolling buffer cut into windows of a known
//!   length, optionally re-synchronised on a start byte. Survives USB-serial
//!   bridges that split or coalesce frames.
//!
//! Windows are not judged here. Too-short windows are left to
//! [`crate::frame::decode`] so that noise and payload errors are reported by
//! one place.

use std::io;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FramingMode {
    #[default]
    PerChunk,
    Fixed {
        frame_len: usize,
        #[serde(default)]
        sync_byte: Option<u8>,
    },
}

#[derive(Debug)]
pub struct FrameCodec {
    mode: FramingMode,
    discarded_bytes: u64,
}

impl FrameCodec {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            discarded_bytes: 0,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes dropped while hunting for a sync byte or left over at EOF.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    fn discard(&mut self, src: &mut BytesMut, n: usize) {
        src.advance(n);
        self.discarded_bytes += n as u64;
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            FramingMode::PerChunk => {
                if src.is_empty() {
                    return Ok(None);
                }
                Ok(Some(src.split().to_vec()))
            }
            FramingMode::Fixed {
                frame_len,
                sync_byte,
            } => {
                if let Some(sync) = sync_byte {
                    match src.iter().position(|&b| b == sync) {
                        Some(0) => {}
                        Some(pos) => {
                            log::debug!("resync: skipped {} bytes before sync byte", pos);
                            self.discard(src, pos);
                        }
                        None => {
                            let len = src.len();
                            self.discard(src, len);
                            return Ok(None);
                        }
                    }
                }

                if src.len() < frame_len {
                    src.reserve(frame_len - src.len());
                    return Ok(None);
                }
                Ok(Some(src.split_to(frame_len).to_vec()))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(window) => Ok(Some(window)),
            None => {
                // Partial frame at end of stream.
                let len = src.len();
                if len > 0 {
                    self.discard(src, len);
                }
                Ok(None)
            }
        }
    }
}
