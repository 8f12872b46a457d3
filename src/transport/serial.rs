//! Serial port transport for RS-232/USB-serial meters.
//!
//! Wraps the `serialport` crate. Reads are non-blocking: only the bytes the
//! driver reports as already buffered are pulled, so a tick with no traffic
//! costs one `bytes_to_read` query.

use super::comm::SerialComm;
#[cfg(feature = "instrument_serial")]
use super::comm::Parity;
use super::Transport;
use crate::error::{AppResult, DaqError};
#[cfg(feature = "instrument_serial")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_serial")]
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Serial transport bound to one device path and comm spec.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    path: String,

    /// Line parameters
    comm: SerialComm,

    /// The open port, if any
    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Closed transport for `path`; call [`Transport::open`] before use.
    pub fn new(path: impl Into<String>, comm: SerialComm) -> Self {
        Self {
            path: path.into(),
            comm,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Device path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Line parameters.
    pub fn comm(&self) -> SerialComm {
        self.comm
    }

    #[cfg(feature = "instrument_serial")]
    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(DaqError::SerialPortNotConnected)
    }
}

#[cfg(feature = "instrument_serial")]
fn transport_error(context: &str, path: &str, err: impl std::fmt::Display) -> DaqError {
    DaqError::Transport(format!("{context} on {path}: {err}"))
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialTransport {
    fn open(&mut self) -> AppResult<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let data_bits = match self.comm.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let parity = match self.comm.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match self.comm.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let port = serialport::new(&self.path, self.comm.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(super::SERIAL_WRITE_TIMEOUT_MS))
            .open()
            .map_err(|e| transport_error("Failed to open serial port", &self.path, e))?;

        debug!(path = %self.path, comm = %self.comm, "Opened serial port");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Closed serial port");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let path = self.path.clone();
        let port = self.port_mut()?;

        let available = port
            .bytes_to_read()
            .map_err(|e| transport_error("Failed to query serial input", &path, e))?;
        if available == 0 {
            return Ok(0);
        }

        let wanted = buf.len().min(available as usize);
        match port.read(&mut buf[..wanted]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(transport_error("Serial read error", &path, e)),
        }
    }

    fn write_blocking(&mut self, bytes: &[u8], timeout_ms: u64) -> AppResult<usize> {
        let path = self.path.clone();
        let port = self.port_mut()?;

        port.set_timeout(Duration::from_millis(timeout_ms))
            .map_err(|e| transport_error("Failed to set write timeout", &path, e))?;
        port.write_all(bytes)
            .map_err(|e| transport_error("Failed to write to serial port", &path, e))?;
        port.flush()
            .map_err(|e| transport_error("Failed to flush serial port", &path, e))?;

        Ok(bytes.len())
    }

    fn flush_input(&mut self) -> AppResult<()> {
        let path = self.path.clone();
        let port = self.port_mut()?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| transport_error("Failed to flush serial input", &path, e))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.path, self.comm)
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialTransport {
    fn open(&mut self) -> AppResult<()> {
        debug!(path = %self.path, "Serial support disabled at build time");
        Err(DaqError::SerialFeatureDisabled)
    }

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    fn read_nonblocking(&mut self, _buf: &mut [u8]) -> AppResult<usize> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn write_blocking(&mut self, _bytes: &[u8], _timeout_ms: u64) -> AppResult<usize> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn flush_input(&mut self) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.path, self.comm)
    }
}
