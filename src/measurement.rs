//! Typed measurement values produced by the response decoders.
//!
//! A [`Measurement`] carries the physical quantity, its unit, qualifier flags
//! and display precision. Special values follow the instrument conventions:
//! `NaN` marks an invalid or out-of-range reading, `+inf`/`-inf` mark
//! over-load and open-circuit readings.
//!
//! Decoders leave `timestamp` empty so that decoding stays deterministic. The
//! framing layer stamps each sample with the wall-clock time of delivery.
//!
//! JSON has no representation for non-finite numbers, so `value` is written
//! as the strings `"inf"`, `"-inf"` and `"nan"` in those cases and read back
//! from the same strings.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The physical quantity a measurement describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Volts, AC or DC.
    Voltage,
    /// Amperes, AC or DC.
    Current,
    /// Ohms, or open circuit as +inf.
    Resistance,
    /// Siemens.
    Conductance,
    /// Farads.
    Capacitance,
    /// Celsius or Fahrenheit.
    Temperature,
    /// Hertz.
    Frequency,
    /// Duty cycle in percent.
    DutyCycle,
    /// Pulse width in seconds.
    PulseWidth,
    /// Continuity test, 1 for closed and 0 for open.
    Continuity,
    /// Power level, reported in dBm.
    Power,
}

impl Quantity {
    /// Stable lower-case name used in logs and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::Resistance => "resistance",
            Quantity::Conductance => "conductance",
            Quantity::Capacitance => "capacitance",
            Quantity::Temperature => "temperature",
            Quantity::Frequency => "frequency",
            Quantity::DutyCycle => "duty_cycle",
            Quantity::PulseWidth => "pulse_width",
            Quantity::Continuity => "continuity",
            Quantity::Power => "power",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit a measurement value is expressed in.
///
/// Values are always reported in the base unit; SI prefixes seen on the wire
/// are folded into the value by the decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// V
    Volt,
    /// A
    Ampere,
    /// Ω
    Ohm,
    /// S
    Siemens,
    /// F
    Farad,
    /// °C
    Celsius,
    /// °F
    Fahrenheit,
    /// Hz
    Hertz,
    /// %
    Percentage,
    /// s
    Second,
    /// Dimensionless 0/1
    Boolean,
    /// dB relative to 1 mW
    DecibelMw,
    /// dB relative to 1 V
    DecibelVolt,
}

impl Unit {
    /// Short symbol for human-readable output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Ohm => "Ω",
            Unit::Siemens => "S",
            Unit::Farad => "F",
            Unit::Celsius => "°C",
            Unit::Fahrenheit => "°F",
            Unit::Hertz => "Hz",
            Unit::Percentage => "%",
            Unit::Second => "s",
            Unit::Boolean => "",
            Unit::DecibelMw => "dBm",
            Unit::DecibelVolt => "dBV",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

bitflags! {
    /// Qualifiers attached to a measurement (coupling, hold, range state...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MqFlags: u32 {
        /// Alternating current
        const AC = 1 << 0;
        /// Direct current
        const DC = 1 << 1;
        /// True RMS
        const RMS = 1 << 2;
        /// Diode test
        const DIODE = 1 << 3;
        /// Display hold
        const HOLD = 1 << 4;
        /// Maximum of a min/max recording
        const MAX = 1 << 5;
        /// Minimum of a min/max recording
        const MIN = 1 << 6;
        /// Auto-ranging
        const AUTORANGE = 1 << 7;
        /// Relative to a stored reference
        const RELATIVE = 1 << 8;
    }
}

/// Default channel name for single-channel meters.
pub const DEFAULT_CHANNEL: &str = "P1";

/// A single decoded reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Channel the reading belongs to (e.g. "P1", "primary", "maximum")
    pub channel: String,
    /// Measured quantity
    pub quantity: Quantity,
    /// Unit of `value`
    pub unit: Unit,
    /// Coupling and mode qualifiers
    pub flags: MqFlags,
    /// Reading in base units. NaN = invalid, infinities = over-range/open.
    #[serde(with = "reading_value")]
    pub value: f64,
    /// Number of significant decimal digits in base units
    pub digits: i32,
    /// Wall-clock time of delivery, set by the framing layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Measurement {
    /// Creates a reading on the default channel with no flags.
    pub fn new(quantity: Quantity, unit: Unit, value: f64) -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            quantity,
            unit,
            flags: MqFlags::empty(),
            value,
            digits: 0,
            timestamp: None,
        }
    }

    /// Replaces the flags.
    pub fn with_flags(mut self, flags: MqFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the digit count.
    pub fn with_digits(mut self, digits: i32) -> Self {
        self.digits = digits;
        self
    }

    /// Moves the reading to `channel`.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Compares everything except the timestamp, treating NaN as equal to NaN.
    ///
    /// Useful for checking decoder output, where invalid readings are NaN.
    pub fn same_reading(&self, other: &Measurement) -> bool {
        let values_match = (self.value.is_nan() && other.value.is_nan()) || self.value == other.value;
        values_match
            && self.channel == other.channel
            && self.quantity == other.quantity
            && self.unit == other.unit
            && self.flags == other.flags
            && self.digits == other.digits
    }
}

/// Serde adapter for reading values that may be infinite or NaN.
mod reading_value {
    use serde::de::{self, Deserializer, Unexpected};
    use serde::{Deserialize, Serializer};

    const POS_INF: &str = "inf";
    const NEG_INF: &str = "-inf";
    const NAN: &str = "nan";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    /// Writes finite values as numbers and the sentinels as strings.
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { POS_INF } else { NEG_INF })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    /// Accepts a number or one of the sentinel strings.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                POS_INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                NAN => Ok(f64::NAN),
                other => Err(de::Error::invalid_value(
                    Unexpected::Str(other),
                    &"a number, \"inf\", \"-inf\" or \"nan\"",
                )),
            },
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} {}",
            self.channel, self.quantity, self.value, self.unit
        )?;
        if !self.flags.is_empty() {
            write!(f, " [{:?}]", self.flags)?;
        }
        Ok(())
    }
}
