//! Device discovery over a serial line.
//!
//! Identification is a short blocking exchange, unlike the non-blocking
//! acquisition loop: send `ID\r`, wait for the `0` acknowledgement, then for
//! a line like `FLUKE 189, V2.02, 0082870`. The model field selects the
//! profile.
//!
//! When no comm spec is configured the usual rates are tried in turn, fastest
//! first.

use crate::decoder::tokens::{tokens, Delimiter};
use crate::error::{AppResult, DaqError};
use crate::pacing::ACK_OK;
use crate::profile::{DeviceProfile, ProfileRegistry};
use crate::transport::{SerialComm, Transport, SERIAL_WRITE_TIMEOUT_MS};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Identification request understood by every supported meter.
pub const ID_COMMAND: &str = "ID\r";

/// Comm specs tried when none is configured.
pub const SCAN_COMM_CANDIDATES: &[&str] = &["115200/8n1", "9600/8n1", "1200/8n1"];

/// Shortest plausible `ID` reply.
const MIN_ID_LEN: usize = 10;
/// Longest line accepted while probing.
const MAX_LINE_LEN: usize = 128;
const READ_POLL_INTERVAL: Duration = Duration::from_millis(2);
const SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Retry and timeout settings for [`probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// `ID` requests sent before giving up.
    pub attempts: usize,
    /// Wait for the acknowledgement byte.
    pub ack_timeout: Duration,
    /// Wait for the identification line after the ACK.
    pub id_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            ack_timeout: Duration::from_millis(150),
            id_timeout: Duration::from_millis(850),
        }
    }
}

/// Fields of an `ID` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Model field, vendor included (`FLUKE 189`).
    pub model: String,
    /// Firmware version.
    pub version: String,
    /// Serial number.
    pub serial: String,
}

/// A recognised meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    /// Profile matching the model field.
    pub profile: &'static DeviceProfile,
    /// The parsed `ID` reply.
    pub identity: Identity,
}

/// Splits an `ID` reply into model, version and serial number.
pub fn parse_identity(line: &str) -> Option<Identity> {
    let mut fields = tokens(line, Delimiter::detect_id(line));
    let model = fields.next().filter(|f| !f.is_empty())?;
    let version = fields.next()?;
    let serial = fields.next()?;
    Some(Identity {
        model: model.to_string(),
        version: version.to_string(),
        serial: serial.to_string(),
    })
}

/// Reads one CR/LF terminated line, waiting at most `timeout`.
///
/// Leading line terminators are skipped. Returns `None` when nothing arrived
/// in time; a partial line is returned as is.
pub fn read_line_blocking<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> AppResult<Option<String>> {
    let start = Instant::now();
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while line.len() < MAX_LINE_LEN {
        if transport.read_nonblocking(&mut byte)? == 1 {
            match byte[0] {
                b'\r' | b'\n' if line.is_empty() => continue,
                b'\r' | b'\n' => break,
                b => line.push(b),
            }
        } else if start.elapsed() >= timeout {
            break;
        } else {
            thread::sleep(READ_POLL_INTERVAL);
        }
    }

    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
}

/// Asks the meter on `transport` to identify itself.
///
/// Returns `Ok(None)` when nothing supported answered. Transport failures
/// are errors.
#[instrument(skip(transport, registry), fields(port = %transport.describe()))]
pub fn probe<T: Transport + ?Sized>(
    transport: &mut T,
    registry: &ProfileRegistry,
    options: &ProbeOptions,
) -> AppResult<Option<Identified>> {
    for attempt in 1..=options.attempts {
        transport.flush_input()?;
        transport.write_blocking(ID_COMMAND.as_bytes(), SERIAL_WRITE_TIMEOUT_MS)?;

        let ack = read_line_blocking(transport, options.ack_timeout)?;
        if ack.as_deref().map(str::as_bytes) != Some(&[ACK_OK][..]) {
            debug!(attempt, ?ack, "No ID acknowledgement");
            continue;
        }

        let Some(line) = read_line_blocking(transport, options.id_timeout)? else {
            debug!(attempt, "No ID reply");
            continue;
        };
        if line.len() < MIN_ID_LEN {
            debug!(attempt, line = %line, "ID reply too short");
            continue;
        }

        let Some(identity) = parse_identity(&line) else {
            debug!(attempt, line = %line, "Malformed ID reply");
            continue;
        };
        match registry.find_by_id_string(&identity.model) {
            Some(profile) => {
                info!(model = %identity.model, version = %identity.version, "Found meter");
                return Ok(Some(Identified { profile, identity }));
            }
            None => {
                warn!(model = %identity.model, "Unsupported model");
                return Ok(None);
            }
        }
    }
    Ok(None)
}

/// Tries each comm spec until a supported meter answers.
///
/// `open` builds and opens a transport for a given spec. The first transport
/// that identifies a meter is returned together with the spec that worked;
/// the others are closed.
pub fn scan<T, F>(
    conn: &str,
    serialcomm: Option<SerialComm>,
    registry: &ProfileRegistry,
    options: &ProbeOptions,
    mut open: F,
) -> AppResult<(T, Identified, SerialComm)>
where
    T: Transport,
    F: FnMut(SerialComm) -> AppResult<T>,
{
    let candidates: Vec<SerialComm> = match serialcomm {
        Some(comm) => vec![comm],
        None => SCAN_COMM_CANDIDATES
            .iter()
            .map(|s| s.parse())
            .collect::<AppResult<_>>()?,
    };

    for comm in candidates {
        debug!(conn, %comm, "Probing");
        let mut transport = open(comm)?;
        match probe(&mut transport, registry, options) {
            Ok(Some(found)) => return Ok((transport, found, comm)),
            Ok(None) => {}
            Err(e) => warn!(conn, %comm, error = %e, "Probe failed"),
        }
        transport.close()?;
        thread::sleep(SETTLE_DELAY);
    }

    Err(DaqError::DeviceNotFound(conn.to_string()))
}
