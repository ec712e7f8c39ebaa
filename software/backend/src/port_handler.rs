// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// src/port_handler.rs

//! Scale connection lifecycle and the background reader.
//!
//! The port is opened at most once while a reader task is alive. A failed
//! open leaves no handle behind, so the next `ensure_open` tries again; a
//! reader that hits EOF or a read error ends and releases the handle the
//! same way. Nothing here retries on its own.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use crate::accumulator::{FrameCodec, FramingMode};
use crate::cell::{FaultKind, LatestWeight};
use crate::error::{error_chain, ConnectionError, DecodeError};
use crate::event::{emit, EventKind, EventSender};
use crate::frame::{self, HexDump};

pub const BAUDRATE: u32 = 9600;

pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opens the byte stream coming from the indicator.
///
/// Called from inside the tokio runtime context.
#[cfg_attr(test, mockall::automock)]
pub trait ScaleLink: Send + Sync {
    fn open(&self, port: &str) -> io::Result<LinkReader>;
}

/// Real serial port, 9600 baud 8N1 without flow control.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialLink;

impl ScaleLink for SerialLink {
    fn open(&self, port: &str) -> io::Result<LinkReader> {
        let stream = tokio_serial::new(port, BAUDRATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        Ok(Box::new(stream))
    }
}

/// Applies decode outcomes to the cell, in arrival order.
#[derive(Clone)]
pub struct Pipeline {
    port: String,
    cell: LatestWeight,
    events: Option<EventSender>,
}

impl Pipeline {
    pub fn new(port: impl Into<String>, cell: LatestWeight, events: Option<EventSender>) -> Self {
        Self {
            port: port.into(),
            cell,
            events,
        }
    }

    pub fn handle_window(&self, window: &[u8]) {
        let hex = HexDump(window).to_string();
        log::debug!("[{}] raw data received: HEX [{}]", self.port, hex);
        self.emit(EventKind::ChunkReceived {
            len: window.len(),
            hex,
        });

        match frame::decode(window) {
            Ok(reading) => {
                log::debug!("[{}] parsed weight {}", self.port, reading);
                self.cell.set_reading(reading);
                self.emit(EventKind::Parsed { weight: reading });
            }
            Err(DecodeError::TooShort { len }) => {
                log::debug!("[{}] data too short to parse ({} bytes)", self.port, len);
                self.emit(EventKind::Discarded { len });
            }
            Err(DecodeError::NonNumeric { payload }) => {
                let hex = HexDump(&payload).to_string();
                log::warn!("[{}] could not parse weight from payload [{}]", self.port, hex);
                self.cell
                    .set_fault(FaultKind::Payload, format!("non-numeric payload [{}]", hex));
                self.emit(EventKind::ParseFailed { payload: hex });
            }
        }
    }

    fn link_lost(&self, error: Option<io::Error>) {
        let detail = match error {
            Some(source) => {
                let e = ConnectionError::Read {
                    port: self.port.clone(),
                    source,
                };
                let detail = error_chain(&e);
                log::warn!("[{}] {}, handle released", self.port, detail);
                Some(detail)
            }
            None => {
                log::warn!("[{}] EOF on scale port, handle released", self.port);
                None
            }
        };
        self.cell.set_fault(
            FaultKind::LinkLost,
            detail.clone().unwrap_or_else(|| "end of stream".to_string()),
        );
        self.emit(EventKind::LinkLost { error: detail });
    }

    fn emit(&self, kind: EventKind) {
        emit(self.events.as_ref(), &self.port, kind);
    }
}

/// Reads windows until the link goes away.
async fn read_port(
    pipeline: Pipeline,
    stream: LinkReader,
    framing: FramingMode,
    idle_warn: Option<Duration>,
) {
    let mut frames = FramedRead::new(stream, FrameCodec::new(framing));

    loop {
        let next = match idle_warn {
            Some(limit) => match timeout(limit, frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    log::warn!(
                        "[{}] no data from scale within {}s",
                        pipeline.port,
                        limit.as_secs()
                    );
                    pipeline.emit(EventKind::Idle {
                        secs: limit.as_secs(),
                    });
                    continue;
                }
            },
            None => frames.next().await,
        };

        match next {
            Some(Ok(window)) => pipeline.handle_window(&window),
            Some(Err(e)) => {
                pipeline.link_lost(Some(e));
                break;
            }
            None => {
                pipeline.link_lost(None);
                break;
            }
        }
    }

    let discarded = frames.decoder().discarded_bytes();
    if discarded > 0 {
        log::debug!("[{}] reader done, {} bytes discarded", pipeline.port, discarded);
    }
}

/// Owns the single scale connection of a process.
pub struct ConnectionManager {
    port: String,
    framing: FramingMode,
    idle_warn: Option<Duration>,
    link: Arc<dyn ScaleLink>,
    pipeline: Pipeline,
    runtime: Handle,
    reader: Mutex<Option<JoinHandle<()>>>,
    opens: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        port: impl Into<String>,
        framing: FramingMode,
        idle_warn: Option<Duration>,
        link: Arc<dyn ScaleLink>,
        cell: LatestWeight,
        events: Option<EventSender>,
        runtime: Handle,
    ) -> Self {
        let port = port.into();
        Self {
            pipeline: Pipeline::new(port.clone(), cell, events),
            port,
            framing,
            idle_warn,
            link,
            runtime,
            reader: Mutex::new(None),
            opens: AtomicU64::new(0),
        }
    }

    /// Opens the port unless a reader is already running.
    ///
    /// Returns `Ok(true)` when this call opened the port. On failure the
    /// cell already carries a connection fault.
    pub fn ensure_open(&self) -> Result<bool, ConnectionError> {
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        if reader.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(false);
        }

        let _guard = self.runtime.enter();
        log::info!(
            "[{}] opening scale port at {} baud (8N1, no flow)",
            self.port,
            BAUDRATE
        );

        match self.link.open(&self.port) {
            Ok(stream) => {
                self.opens.fetch_add(1, Ordering::Relaxed);
                log::info!("[{}] listening to scale", self.port);
                self.pipeline.emit(EventKind::Opened);
                *reader = Some(self.runtime.spawn(read_port(
                    self.pipeline.clone(),
                    stream,
                    self.framing,
                    self.idle_warn,
                )));
                Ok(true)
            }
            Err(source) => {
                *reader = None;
                let e = ConnectionError::Open {
                    port: self.port.clone(),
                    source,
                };
                let detail = error_chain(&e);
                log::warn!("{}", detail);
                self.pipeline.cell.set_fault(FaultKind::Connection, detail.clone());
                self.pipeline.emit(EventKind::OpenFailed { error: detail });
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Successful opens since start.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn shutdown(&self) {
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = reader.take() {
            log::info!("[{}] stopping scale reader", self.port);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{WeightSnapshot, WeightState};
    use crate::frame::WeightReading;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::{mpsc, watch};

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x02, 0x20, 0x20, 0x20];
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n\x00\x00\x00\x00");
        out
    }

    fn manager(link: MockScaleLink, cell: &LatestWeight) -> ConnectionManager {
        ConnectionManager::new(
            "COM1",
            FramingMode::PerChunk,
            None,
            Arc::new(link),
            cell.clone(),
            None,
            Handle::current(),
        )
    }

    /// Link that hands out one duplex reader per expected open.
    fn duplex_link(opens: usize) -> (MockScaleLink, Vec<DuplexStream>) {
        let mut writers = Vec::new();
        let mut readers = Vec::new();
        for _ in 0..opens {
            let (writer, reader) = tokio::io::duplex(256);
            writers.push(writer);
            readers.push(reader);
        }
        readers.reverse();

        let mut link = MockScaleLink::new();
        link.expect_open()
            .times(opens)
            .returning(move |_: &str| Ok(Box::new(readers.pop().unwrap()) as LinkReader));
        (link, writers)
    }

    async fn next_change(rx: &mut watch::Receiver<WeightSnapshot>) -> WeightSnapshot {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("cell not updated in time")
            .unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn test_ensure_open_is_idempotent() {
        let cell = LatestWeight::new();
        let (link, _writers) = duplex_link(1);
        let manager = manager(link, &cell);

        assert!(manager.ensure_open().unwrap());
        assert!(!manager.ensure_open().unwrap());
        assert!(manager.is_connected());
        assert_eq!(manager.open_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_sets_sentinel_then_recovers() {
        let cell = LatestWeight::new();
        let mut rx = cell.subscribe();
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = Some(reader);

        let mut link = MockScaleLink::new();
        let mut seq = mockall::Sequence::new();
        link.expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_: &str| Err(io::Error::new(io::ErrorKind::NotFound, "no such device")));
        link.expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_: &str| Ok(Box::new(reader.take().unwrap()) as LinkReader));
        let manager = manager(link, &cell);

        let err = manager.ensure_open().unwrap_err();
        assert!(matches!(err, ConnectionError::Open { .. }));
        assert!(!manager.is_connected());
        let snap = cell.snapshot();
        assert_eq!(snap.fault().unwrap().kind, FaultKind::Connection);
        assert_eq!(snap.weight_text(), crate::cell::ERROR_SENTINEL);
        rx.borrow_and_update();

        assert!(manager.ensure_open().unwrap());
        let mut writer = writer;
        writer.write_all(&frame(b"00000100")).await.unwrap();
        let snap = next_change(&mut rx).await;
        assert_eq!(snap.weight_text(), "10.0");
    }

    #[tokio::test]
    async fn test_short_chunk_leaves_cell_unchanged() {
        let cell = LatestWeight::new();
        let (tx, mut events) = mpsc::unbounded_channel();
        let (link, mut writers) = duplex_link(1);
        let manager = ConnectionManager::new(
            "COM1",
            FramingMode::PerChunk,
            None,
            Arc::new(link),
            cell.clone(),
            Some(tx),
            Handle::current(),
        );
        manager.ensure_open().unwrap();
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Opened);

        writers[0].write_all(&[0x30; 8]).await.unwrap();
        let received = events.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::ChunkReceived { len: 8, hex: "3030303030303030".into() });
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Discarded { len: 8 });

        assert_eq!(cell.snapshot().sequence, 0);
        assert_eq!(cell.snapshot().state, WeightState::Empty);
    }

    #[tokio::test]
    async fn test_bad_payload_overwrites_reading() {
        let cell = LatestWeight::new();
        let mut rx = cell.subscribe();
        let (link, mut writers) = duplex_link(1);
        let manager = manager(link, &cell);
        manager.ensure_open().unwrap();

        writers[0].write_all(&frame(b"00000100")).await.unwrap();
        assert_eq!(next_change(&mut rx).await.as_reading(), Some(WeightReading::from_tenths(100)));

        writers[0].write_all(&frame(b"--------")).await.unwrap();
        let snap = next_change(&mut rx).await;
        assert_eq!(snap.fault().unwrap().kind, FaultKind::Payload);
        assert_eq!(snap.weight_text(), crate::cell::ERROR_SENTINEL);
    }

    #[test]
    fn test_non_ascii_payload_is_a_payload_fault() {
        let cell = LatestWeight::new();
        let (tx, mut events) = mpsc::unbounded_channel();
        let pipeline = Pipeline::new("COM1", cell.clone(), Some(tx));
        pipeline.handle_window(&frame(b"0012\xFF\xFE00"));

        let snap = cell.snapshot();
        assert_eq!(snap.fault().unwrap().kind, FaultKind::Payload);
        assert_eq!(snap.weight_text(), crate::cell::ERROR_SENTINEL);
        assert!(matches!(
            events.try_recv().unwrap().kind,
            EventKind::ChunkReceived { len: 18, .. }
        ));
        assert_eq!(
            events.try_recv().unwrap().kind,
            EventKind::ParseFailed {
                payload: "30303132FFFE3030".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_scale_warns_and_keeps_value() {
        let cell = LatestWeight::new();
        let (tx, mut events) = mpsc::unbounded_channel();
        let (link, mut writers) = duplex_link(1);
        let manager = ConnectionManager::new(
            "COM1",
            FramingMode::PerChunk,
            Some(Duration::from_secs(1)),
            Arc::new(link),
            cell.clone(),
            Some(tx),
            Handle::current(),
        );
        manager.ensure_open().unwrap();
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Opened);

        writers[0].write_all(&frame(b"00000100")).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap().kind,
            EventKind::ChunkReceived { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap().kind,
            EventKind::Parsed {
                weight: WeightReading::from_tenths(100)
            }
        );

        // Paused clock: each recv auto-advances to the next idle deadline.
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Idle { secs: 1 });
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Idle { secs: 1 });

        let snap = cell.snapshot();
        assert_eq!(snap.weight_text(), "10.0");
        assert_eq!(snap.sequence, 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_eof_releases_handle_for_reopen() {
        let cell = LatestWeight::new();
        let mut rx = cell.subscribe();
        let (link, mut writers) = duplex_link(2);
        let manager = manager(link, &cell);

        manager.ensure_open().unwrap();
        drop(writers.remove(0));
        let snap = next_change(&mut rx).await;
        assert_eq!(snap.fault().unwrap().kind, FaultKind::LinkLost);

        // The reader may still be winding down after publishing the fault.
        for _ in 0..50 {
            if !manager.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.ensure_open().unwrap());
        assert_eq!(manager.open_count(), 2);

        writers[0].write_all(&frame(b"00000042")).await.unwrap();
        assert_eq!(next_change(&mut rx).await.weight_text(), "4.2");
    }

    #[tokio::test]
    async fn test_fixed_framing_reassembles_split_reads() {
        let cell = LatestWeight::new();
        let mut rx = cell.subscribe();
        let (link, mut writers) = duplex_link(1);
        let window = frame(b"00001234");
        let manager = ConnectionManager::new(
            "COM1",
            FramingMode::Fixed {
                frame_len: window.len(),
                sync_byte: Some(0x02),
            },
            None,
            Arc::new(link),
            cell.clone(),
            None,
            Handle::current(),
        );
        manager.ensure_open().unwrap();

        writers[0].write_all(b"\xFF\xFF").await.unwrap();
        writers[0].write_all(&window[..7]).await.unwrap();
        tokio::task::yield_now().await;
        writers[0].write_all(&window[7..]).await.unwrap();

        assert_eq!(next_change(&mut rx).await.weight_text(), "123.4");
    }

    #[tokio::test]
    async fn test_shutdown_stops_reader() {
        let cell = LatestWeight::new();
        let (link, _writers) = duplex_link(1);
        let manager = manager(link, &cell);
        manager.ensure_open().unwrap();
        manager.shutdown();
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_pipeline_without_listener() {
        let cell = LatestWeight::new();
        let pipeline = Pipeline::new("COM1", cell.clone(), None);
        pipeline.handle_window(&frame(b"00000250"));
        assert_eq!(cell.snapshot().weight_text(), "25.0");
        pipeline.handle_window(&[0x01, 0x02]);
        assert_eq!(cell.snapshot().sequence, 1);
    }
}
