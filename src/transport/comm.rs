//! Serial line parameters in `"<baud>/<databits><parity><stopbits>"` form.

use crate::error::DaqError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parity bit setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit (`n`).
    None,
    /// Odd parity (`o`).
    Odd,
    /// Even parity (`e`).
    Even,
}

/// Parsed serial comm spec, e.g. `9600/8n1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialComm {
    /// Bits per second.
    pub baud_rate: u32,
    /// 5 to 8.
    pub data_bits: u8,
    /// Parity setting.
    pub parity: Parity,
    /// 1 or 2.
    pub stop_bits: u8,
}

impl SerialComm {
    /// 8 data bits, no parity, one stop bit at the given rate.
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl Default for SerialComm {
    fn default() -> Self {
        Self::with_baud(9600)
    }
}

impl FromStr for SerialComm {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| DaqError::Configuration(format!("invalid serialcomm '{s}': {why}"));

        let (baud, frame) = match s.trim().split_once('/') {
            Some((baud, frame)) => (baud, Some(frame)),
            None => (s.trim(), None),
        };

        let baud_rate: u32 = baud.parse().map_err(|_| invalid("baud rate is not a number"))?;
        if baud_rate == 0 {
            return Err(invalid("baud rate must be positive"));
        }

        let Some(frame) = frame else {
            return Ok(Self::with_baud(baud_rate));
        };

        let chars: Vec<char> = frame.chars().collect();
        let [bits, parity, stop] = chars.as_slice() else {
            return Err(invalid("frame format must look like 8n1"));
        };

        let data_bits = match bits {
            '5'..='8' => *bits as u8 - b'0',
            _ => return Err(invalid("data bits must be 5-8")),
        };
        let parity = match parity.to_ascii_lowercase() {
            'n' => Parity::None,
            'o' => Parity::Odd,
            'e' => Parity::Even,
            _ => return Err(invalid("parity must be n, o or e")),
        };
        let stop_bits = match stop {
            '1' => 1,
            '2' => 2,
            _ => return Err(invalid("stop bits must be 1 or 2")),
        };

        Ok(Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for SerialComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'n',
            Parity::Odd => 'o',
            Parity::Even => 'e',
        };
        write!(
            f,
            "{}/{}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}
