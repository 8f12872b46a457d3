//! ScopeMeter (190/199B) metadata-then-data exchange.
//!
//! A bare `QM` returns measurement metadata in sets of seven fields:
//!
//! ```text
//! <type>,<valid>,<source>,<unit code>,<characteristic>,<resolution>,<status>
//! ```
//!
//! The decoder remembers what the selected measurement is and asks for its
//! value with `QM <type>`. That reply is a lone number, which only makes
//! sense against the stored metadata. Relative readings (type 19) take
//! precedence over absolute ones (type 11) when both are listed.

use super::tokens::{parse_number, tokens, Delimiter};
use super::DecodeOutcome;
use crate::measurement::{Measurement, MqFlags, Quantity, Unit};
use tracing::debug;

const FIELDS_PER_SET: usize = 7;
const MEAS_ABSOLUTE: u32 = 11;
const MEAS_RELATIVE: u32 = 19;
/// Value the meter sends for an invalid reading.
const INVALID_READING: &str = "9.9E+37";

/// What the last metadata reply said the data replies mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Qm19xContext {
    /// Selected measurement type, 0 when none was found in the last reply.
    pub meas_type: u32,
    /// Quantity of the selected type, if it has one.
    pub quantity: Option<Quantity>,
    /// Unit of the selected type.
    pub unit: Option<Unit>,
    /// Flags applied to every data reply.
    pub flags: MqFlags,
}

fn meaning_of(unit_code: u32, characteristic: u32) -> Option<(Quantity, Unit, MqFlags)> {
    match (unit_code, characteristic) {
        (1, 1) => Some((Quantity::Voltage, Unit::Volt, MqFlags::DC)),
        (1, 2) => Some((Quantity::Voltage, Unit::Volt, MqFlags::AC)),
        (1, 3) => Some((Quantity::Voltage, Unit::Volt, MqFlags::AC | MqFlags::DC)),
        (1, 15) => Some((Quantity::Voltage, Unit::Volt, MqFlags::DIODE)),
        (2, 1) => Some((Quantity::Current, Unit::Ampere, MqFlags::DC)),
        (2, 2) => Some((Quantity::Current, Unit::Ampere, MqFlags::AC)),
        (2, 3) => Some((Quantity::Current, Unit::Ampere, MqFlags::AC | MqFlags::DC)),
        (3, 1) => Some((Quantity::Resistance, Unit::Ohm, MqFlags::empty())),
        (3, 16) => Some((Quantity::Continuity, Unit::Boolean, MqFlags::empty())),
        (12, _) => Some((Quantity::Temperature, Unit::Celsius, MqFlags::empty())),
        (13, _) => Some((Quantity::Temperature, Unit::Fahrenheit, MqFlags::empty())),
        _ => None,
    }
}

fn handle_metadata_set(set: &[&str], ctx: &mut Qm19xContext) {
    // Only valid readings from the meter input are of interest.
    if set[1] != "1" || set[2] != "3" {
        return;
    }
    let Ok(meas_type) = set[0].parse::<u32>() else {
        return;
    };
    if meas_type != MEAS_ABSOLUTE && meas_type != MEAS_RELATIVE {
        return;
    }
    if meas_type == MEAS_ABSOLUTE && ctx.meas_type == MEAS_RELATIVE {
        return;
    }

    let unit_code: u32 = set[3].parse().unwrap_or(0);
    if unit_code == 0 {
        // Function switched off.
        return;
    }
    let characteristic: u32 = set[4].parse().unwrap_or(0);

    let Some((quantity, unit, flags)) = meaning_of(unit_code, characteristic) else {
        debug!(unit_code, characteristic, "Unsupported ScopeMeter function");
        return;
    };

    ctx.meas_type = meas_type;
    ctx.quantity = Some(quantity);
    ctx.unit = Some(unit);
    ctx.flags = if meas_type == MEAS_RELATIVE {
        flags | MqFlags::RELATIVE
    } else {
        flags
    };
}

fn decode_metadata(fields: &[&str], ctx: &mut Qm19xContext) -> DecodeOutcome {
    ctx.meas_type = 0;
    for set in fields.chunks_exact(FIELDS_PER_SET) {
        handle_metadata_set(set, ctx);
    }

    let mut outcome = DecodeOutcome::empty();
    if ctx.meas_type != 0 {
        outcome.follow_up = Some(format!("QM {}\r", ctx.meas_type));
    } else {
        debug!("No usable measurement in ScopeMeter metadata");
    }
    outcome
}

fn decode_data(text: &str, ctx: &Qm19xContext) -> DecodeOutcome {
    let (mut value, digits) = if text == INVALID_READING {
        (f64::NAN, 0)
    } else {
        match parse_number(text) {
            Some(parsed) => parsed,
            None => {
                debug!(value = text, "Invalid float");
                return DecodeOutcome::unrecognized();
            }
        }
    };

    let (Some(quantity), Some(unit)) = (ctx.quantity, ctx.unit) else {
        debug!("ScopeMeter data before metadata, discarding");
        return DecodeOutcome::empty();
    };

    match quantity {
        Quantity::Resistance if value.is_nan() => value = f64::INFINITY,
        Quantity::Continuity => value = if value.is_nan() { 0.0 } else { 1.0 },
        _ => {}
    }

    DecodeOutcome::single(
        Measurement::new(quantity, unit, value)
            .with_flags(ctx.flags)
            .with_digits(digits),
    )
}

pub(super) fn decode(message: &str, ctx: &mut Qm19xContext) -> DecodeOutcome {
    let fields: Vec<&str> = tokens(message, Delimiter::detect(message)).collect();
    if fields.len() >= FIELDS_PER_SET {
        decode_metadata(&fields, ctx)
    } else {
        decode_data(fields.first().copied().unwrap_or_default(), ctx)
    }
}
