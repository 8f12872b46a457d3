//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`. Using the `thiserror`
//! crate, it provides a single place for everything that can go wrong while
//! talking to a meter, from configuration problems to a serial line that went
//! away mid-acquisition.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while loading or extracting the
//!   layered configuration (TOML file plus environment).
//! - **`Configuration`**: Semantic problems in values that parsed fine, such as an
//!   unknown log level or a malformed serial comm spec. Caught by validation.
//! - **`Io`** / **`Transport`** / **`SerialPortNotConnected`**: Failures of the
//!   byte link. These are the only errors that cross `DeviceSession::poll_once`.
//! - **`Sink`**: The datafeed consumer refused a delivery. The session logs these
//!   and keeps running; they are surfaced here for sinks and hosts.
//! - **`DeviceNotFound`** / **`UnknownModel`**: Discovery and profile lookup.
//!
//! Malformed messages from the instrument are never errors. Decoders log and
//! drop them.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or extracting the layered configuration failed.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// A configuration value parsed but is not acceptable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Operating system I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte link failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The serial port is not open.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Built without the `instrument_serial` feature.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The datafeed consumer refused a delivery.
    #[error("Datafeed sink rejected delivery: {0}")]
    Sink(String),

    /// No supported meter answered on the given port.
    #[error("No supported device found on {0}")]
    DeviceNotFound(String),

    /// No profile has the given key.
    #[error("Unknown instrument model '{0}'")]
    UnknownModel(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// True for failures of the byte link itself.
    ///
    /// A transport failure aborts the current operation; the host decides
    /// whether to reopen the device.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_) | DaqError::Transport(_) | DaqError::SerialPortNotConnected
        )
    }

    /// Whether the caller can reasonably keep the session alive after this error.
    pub fn can_recover(&self) -> bool {
        match self {
            DaqError::Sink(_) => true,
            DaqError::DeviceNotFound(_) => true,
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Io(_)
            | DaqError::Transport(_)
            | DaqError::SerialPortNotConnected
            | DaqError::SerialFeatureDisabled
            | DaqError::UnknownModel(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(DaqError::Transport("port vanished".into()).is_transport());
        assert!(DaqError::SerialPortNotConnected.is_transport());
        assert!(
            DaqError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
                .is_transport()
        );
        assert!(!DaqError::Sink("full".into()).is_transport());
        assert!(!DaqError::UnknownModel("999".into()).is_transport());
    }

    #[test]
    fn sink_rejection_is_recoverable() {
        assert!(DaqError::Sink("receiver dropped".into()).can_recover());
        assert!(!DaqError::Transport("eof".into()).can_recover());
    }

    #[test]
    fn display_includes_context() {
        let err = DaqError::UnknownModel("FLUKE 999".into());
        assert_eq!(err.to_string(), "Unknown instrument model 'FLUKE 999'");

        let err = DaqError::DeviceNotFound("/dev/ttyUSB0".into());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
    }

    #[test]
    fn figment_errors_convert() {
        let err: DaqError = figment::Error::from("missing field `name`".to_string()).into();
        match err {
            DaqError::Config(inner) => assert!(inner.to_string().contains("name")),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
