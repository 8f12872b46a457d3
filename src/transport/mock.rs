//! Mock transport for exercising the polling engine without hardware.
//!
//! This module provides `MockTransport`, which implements [`Transport`], and a
//! corresponding `MockDeviceHarness` that plays the instrument from within
//! tests. The harness queues device output, inspects what the host wrote and
//! can inject link failures.
//!
//! # Architecture
//!
//! The mock uses a pair of `std::sync::mpsc` channels to simulate bidirectional
//! communication:
//! - `MockTransport` (given to the session): non-blocking reads via `try_recv`
//! - `MockDeviceHarness` (kept in test): scripts device behavior
//!
//! Because reads never block, a test can drive a session tick by tick on one
//! thread. For blocking helpers such as discovery, run the harness on a second
//! thread and use [`MockDeviceHarness::expect_write`].
//!
//! # Example
//!
//! ```rust,ignore
//! use dmm_stream::transport::mock;
//!
//! let (transport, harness) = mock::new();
//! let mut session = DeviceSession::new(profile, transport, sink, settings);
//! session.start_acquisition(0)?;
//!
//! harness.send_response(b"0\rQM,+1.234 V DC\r").unwrap();
//! session.poll_once(10)?;
//! ```

use super::Transport;
use crate::error::{AppResult, DaqError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Failure switches shared between the two halves.
#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// The session-facing side of the mock link.
#[derive(Debug)]
pub struct MockTransport {
    /// Channel to send written data to the harness
    writes_tx: Sender<Vec<u8>>,
    /// Channel to receive data from the harness to be read
    reads_rx: Receiver<Vec<u8>>,
    /// Bytes received from the harness but not yet read by the session
    read_buffer: VecDeque<u8>,
    faults: Arc<Faults>,
    open: bool,
}

/// The test-facing side for controlling the mock link.
#[derive(Debug)]
pub struct MockDeviceHarness {
    /// Channel to receive data written by the session
    writes_rx: Receiver<Vec<u8>>,
    /// Channel to send data to the session for it to read
    reads_tx: Sender<Vec<u8>>,
    /// Written data not yet asserted by the test
    write_buffer: Vec<u8>,
    faults: Arc<Faults>,
}

/// Creates a new connected pair. The transport starts out open.
pub fn new() -> (MockTransport, MockDeviceHarness) {
    let (session_to_harness_tx, session_to_harness_rx) = mpsc::channel();
    let (harness_to_session_tx, harness_to_session_rx) = mpsc::channel();
    let faults = Arc::new(Faults::default());

    let transport = MockTransport {
        writes_tx: session_to_harness_tx,
        reads_rx: harness_to_session_rx,
        read_buffer: VecDeque::new(),
        faults: Arc::clone(&faults),
        open: true,
    };

    let harness = MockDeviceHarness {
        writes_rx: session_to_harness_rx,
        reads_tx: harness_to_session_tx,
        write_buffer: Vec::new(),
        faults,
    };

    (transport, harness)
}

// =============================================================================
// MockTransport
// =============================================================================

impl MockTransport {
    /// Moves everything the harness has sent so far into the read buffer.
    fn pull_pending(&mut self) -> AppResult<()> {
        loop {
            match self.reads_rx.try_recv() {
                Ok(chunk) => self.read_buffer.extend(chunk),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    if self.read_buffer.is_empty() {
                        return Err(DaqError::Transport(
                            "mock device harness disconnected".into(),
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DaqError::SerialPortNotConnected)
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> AppResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        self.ensure_open()?;
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(DaqError::Transport("injected read failure".into()));
        }
        if self.read_buffer.len() < buf.len() {
            self.pull_pending()?;
        }

        let n = buf.len().min(self.read_buffer.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_blocking(&mut self, bytes: &[u8], _timeout_ms: u64) -> AppResult<usize> {
        self.ensure_open()?;
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(DaqError::Transport("injected write failure".into()));
        }
        self.writes_tx
            .send(bytes.to_vec())
            .map_err(|_| DaqError::Transport("mock device harness disconnected".into()))?;
        Ok(bytes.len())
    }

    fn flush_input(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.read_buffer.clear();
        while self.reads_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

// =============================================================================
// MockDeviceHarness
// =============================================================================

impl MockDeviceHarness {
    /// Queues bytes as if the device had sent them.
    ///
    /// # Errors
    /// Returns error if the transport has been dropped
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: transport dropped")
    }

    /// Makes every subsequent read fail until cleared.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns every write made so far, one entry per `write_blocking` call.
    ///
    /// Bytes already consumed by [`expect_write`](Self::expect_write) are not
    /// repeated.
    pub fn take_writes(&mut self) -> Vec<Vec<u8>> {
        let mut writes = Vec::new();
        if !self.write_buffer.is_empty() {
            writes.push(std::mem::take(&mut self.write_buffer));
        }
        while let Ok(chunk) = self.writes_rx.try_recv() {
            writes.push(chunk);
        }
        writes
    }

    /// Same as [`take_writes`](Self::take_writes), decoded as text.
    pub fn take_commands(&mut self) -> Vec<String> {
        self.take_writes()
            .into_iter()
            .map(|w| String::from_utf8_lossy(&w).into_owned())
            .collect()
    }

    /// Waits for the host to write `expected` and asserts it.
    ///
    /// Partial writes are buffered until enough bytes arrived. Excess bytes are
    /// kept for the next expectation.
    ///
    /// # Panics
    /// Panics if the expected data is not received within 2 seconds or does not
    /// match.
    pub fn expect_write(&mut self, expected: &[u8]) {
        let timeout = Duration::from_secs(2);

        while self.write_buffer.len() < expected.len() {
            match self.writes_rx.recv_timeout(timeout) {
                Ok(chunk) => self.write_buffer.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("Transport dropped while expecting a write.")
                }
                Err(RecvTimeoutError::Timeout) => panic!(
                    "Timeout waiting for write. Expected `{:?}`, only received `{:?}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer),
                ),
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Expects a write and sends a response in one operation.
    pub fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected);
        // The transport outlives the harness in every caller that waits on a write.
        let _ = self.send_response(response);
    }
}
