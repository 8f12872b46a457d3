//! Byte transport abstraction.
//!
//! The polling engine never blocks on reads: [`Transport::read_nonblocking`]
//! returns `Ok(0)` immediately when nothing is pending, and the session simply
//! tries again on the next tick. Writes are short commands and may block up to
//! a caller-supplied timeout.
//!
//! # Implementations
//!
//! - [`SerialTransport`]: native serial port via the `serialport` crate
//!   (feature `instrument_serial`)
//! - [`mock::MockTransport`]: scripted in-memory link, paired with a
//!   [`mock::MockDeviceHarness`] that plays the instrument in tests
//!
//! # Example
//!
//! ```rust,ignore
//! use dmm_stream::transport::{SerialComm, SerialTransport, Transport};
//!
//! let comm: SerialComm = "9600/8n1".parse()?;
//! let mut port = SerialTransport::new("/dev/ttyUSB0", comm);
//! port.open()?;
//! port.write_blocking(b"ID\r", dmm_stream::transport::SERIAL_WRITE_TIMEOUT_MS)?;
//! ```

use crate::error::AppResult;

mod comm;
pub mod mock;
mod serial;

pub use comm::{Parity, SerialComm};
pub use serial::SerialTransport;

/// Timeout applied to every poll/ID command write.
pub const SERIAL_WRITE_TIMEOUT_MS: u64 = 50;

/// A bidirectional byte link to an instrument.
pub trait Transport {
    /// Opens the underlying link. Opening an already open link is a no-op.
    fn open(&mut self) -> AppResult<()>;

    /// Closes the link. Closing twice is harmless.
    fn close(&mut self) -> AppResult<()>;

    fn is_open(&self) -> bool;

    /// Copies pending inbound bytes into `buf`, returning how many were copied.
    ///
    /// Returns `Ok(0)` without waiting when no data is available.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> AppResult<usize>;

    /// Writes all of `bytes`, waiting at most `timeout_ms`.
    fn write_blocking(&mut self, bytes: &[u8], timeout_ms: u64) -> AppResult<usize>;

    /// Discards any inbound bytes not yet read.
    fn flush_input(&mut self) -> AppResult<()>;

    /// Human-readable connection description for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> AppResult<()> {
        (**self).open()
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        (**self).read_nonblocking(buf)
    }

    fn write_blocking(&mut self, bytes: &[u8], timeout_ms: u64) -> AppResult<usize> {
        (**self).write_blocking(bytes, timeout_ms)
    }

    fn flush_input(&mut self) -> AppResult<()> {
        (**self).flush_input()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
