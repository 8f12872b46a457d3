//! Layered configuration using Figment
//!
//! Settings are merged from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`config/dmm_stream.toml` unless another path is given)
//! 3. environment variables prefixed with `DMM_STREAM_`
//!
//! Nested keys are separated by a double underscore in the environment, so
//! `DMM_STREAM_ACQUISITION__LIMIT_SAMPLES=10` sets `acquisition.limit_samples`.
//!
//! # Example
//! ```no_run
//! use dmm_stream::config::Settings;
//! use dmm_stream::profile::ProfileRegistry;
//!
//! let settings = Settings::load()?;
//! settings.validate(&ProfileRegistry::builtin())?;
//! println!("Polling every {} ms", settings.acquisition.tick_ms);
//! # Ok::<(), dmm_stream::DaqError>(())
//! ```

use crate::assembler::DEFAULT_BUFFER_CAPACITY;
use crate::error::{AppResult, DaqError};
use crate::logging::{parse_log_level, OutputFormat};
use crate::profile::ProfileRegistry;
use crate::session::SessionSettings;
use crate::transport::SerialComm;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file read by [`Settings::load`].
pub const DEFAULT_CONFIG_PATH: &str = "config/dmm_stream.toml";
/// Prefix of environment overrides. Nested keys are joined with `__`.
pub const ENV_PREFIX: &str = "DMM_STREAM_";

/// Smallest receive buffer that still holds the longest QM reply.
const MIN_CONFIGURED_CAPACITY: usize = 16;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Host loop and limit settings
    pub acquisition: AcquisitionConfig,
    /// Which meter to talk to, and how
    pub device: DeviceConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "dmm_stream".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Interval between `poll_once` calls in milliseconds
    pub tick_ms: u64,
    /// Stop after this many samples (0 = unlimited)
    pub limit_samples: u64,
    /// Stop after this many frames (0 = unlimited)
    pub limit_frames: u64,
    /// Stop after this many milliseconds (0 = unlimited)
    pub limit_msec: u64,
    /// Receive buffer size in bytes
    pub buffer_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            limit_samples: 0,
            limit_frames: 0,
            limit_msec: 0,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Device selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0`
    pub conn: Option<String>,
    /// Comm spec such as `115200/8n1`; scanned when absent
    pub serialcomm: Option<String>,
    /// Profile key; identified with `ID` when absent
    pub model: Option<String>,
}

impl Settings {
    /// Load from the default file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self, registry: &ProfileRegistry) -> AppResult<()> {
        parse_log_level(&self.application.log_level)?;
        self.application.log_format.parse::<OutputFormat>()?;

        if self.acquisition.tick_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.tick_ms must be positive".to_string(),
            ));
        }

        let capacity = self.acquisition.buffer_capacity;
        if capacity < MIN_CONFIGURED_CAPACITY {
            return Err(DaqError::Configuration(format!(
                "acquisition.buffer_capacity {} is below the minimum of {}",
                capacity, MIN_CONFIGURED_CAPACITY
            )));
        }

        if let Some(model) = &self.device.model {
            registry.require(model)?;
        }
        self.serial_comm()?;

        Ok(())
    }

    /// The configured comm spec, parsed.
    pub fn serial_comm(&self) -> AppResult<Option<SerialComm>> {
        self.device
            .serialcomm
            .as_deref()
            .map(str::parse::<SerialComm>)
            .transpose()
    }

    /// Per-session knobs derived from the acquisition section.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            buffer_capacity: self.acquisition.buffer_capacity,
            limit_samples: self.acquisition.limit_samples,
            limit_frames: self.acquisition.limit_frames,
            limit_msec: self.acquisition.limit_msec,
        }
    }
}
