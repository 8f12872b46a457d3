//! # dmm_stream
//!
//! Polling engine and line-protocol decoders for handheld and benchtop
//! multimeters that answer ASCII queries over a serial line.
//!
//! The engine is cooperative and single-threaded. The host owns the clock and
//! calls [`DeviceSession::poll_once`] repeatedly; each call drains available
//! bytes, decodes complete replies into [`Measurement`]s, hands them to a
//! [`DatafeedSink`] and re-sends the poll command when the pacing rules allow.
//!
//! ## Crate Structure
//!
//! - **`transport`**: The byte-link seam. [`Transport`] is implemented by the
//!   serial port (`instrument_serial` feature) and by an in-process mock.
//! - **`assembler`**: Splits the byte stream into delimiter-terminated messages.
//! - **`pacing`**: Decides when the poll command may be sent again.
//! - **`decoder`**: One decoder per reply grammar, selected by [`DecoderKind`].
//! - **`limits`** / **`framing`**: Sample and time limits, and the
//!   start/samples/end framing contract towards the sink.
//! - **`sink`**: Ready-made sinks (in-memory, channel, JSON lines).
//! - **`profile`**: Static per-model data and the profile registry.
//! - **`session`**: Ties all of the above into one acquisition.
//! - **`discovery`**: `ID` based identification and serial scanning.
//! - **`config`** / **`logging`**: Layered settings and tracing setup for hosts.
//! - **`error`**: The crate-wide [`DaqError`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use dmm_stream::{DeviceSession, ProfileRegistry, SessionSettings};
//! use dmm_stream::sink::CollectingSink;
//! use dmm_stream::transport::mock;
//!
//! let registry = ProfileRegistry::builtin();
//! let (transport, harness) = mock::new();
//! let mut session = DeviceSession::new(
//!     registry.require("189")?,
//!     transport,
//!     CollectingSink::new(),
//!     SessionSettings::default(),
//! );
//! session.start_acquisition(0)?;
//! harness.send_response(b"0\rQM,+1.234E+0 V DC\r")?;
//! session.poll_once(10)?;
//! ```

pub mod assembler;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod limits;
pub mod logging;
pub mod measurement;
pub mod pacing;
pub mod profile;
pub mod session;
pub mod sink;
pub mod transport;

pub use decoder::{DecodeOutcome, DecoderKind};
pub use error::{AppResult, DaqError};
pub use framing::DatafeedSink;
pub use measurement::{Measurement, MqFlags, Quantity, Unit};
pub use profile::{DeviceProfile, ProfileRegistry};
pub use session::{DeviceSession, PollReport, PollStatus, SessionSettings};
pub use transport::Transport;
