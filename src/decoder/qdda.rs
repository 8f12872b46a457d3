//! Structured `QDDA` replies of the Fluke 287/289.
//!
//! A reply describes the whole display:
//!
//! ```text
//! <primary fn>,<secondary fn>,<AUTO|MANUAL>,<base unit>,<range>,<unit mult>,
//! <lightning bolt>,<min/max start>,<N>,<mode 1>..<mode N>,<M>,
//! M x (<reading id>,<value>,<unit>,<unit mult>,<decimals>,<display digits>,
//!      <state>,<attribute>,<timestamp>)
//! ```
//!
//! Every reading becomes one sample on a channel named after its reading id
//! (`primary`, `secondary`, `minimum`...). Values are sent in base units.

use super::qm28x::{build_reading, lookup_unit, parse_attribute, parse_state, ReadingAttribute};
use super::tokens::{parse_number, tokens, Delimiter, MAX_EXPONENT};
use super::DecodeOutcome;
use crate::measurement::MqFlags;
use tracing::{debug, warn};

const HEADER_FIELDS: usize = 8;
const FIELDS_PER_READING: usize = 9;

fn mode_flags(modes: &[&str]) -> MqFlags {
    modes.iter().fold(MqFlags::empty(), |flags, mode| {
        flags
            | match *mode {
                "HOLD" | "AUTO_HOLD" => MqFlags::HOLD,
                "REL" | "REL_PERCENT" => MqFlags::RELATIVE,
                _ => MqFlags::empty(),
            }
    })
}

fn reading_flags(reading_id: &str) -> MqFlags {
    match reading_id {
        "MAXIMUM" => MqFlags::MAX,
        "MINIMUM" => MqFlags::MIN,
        _ => MqFlags::empty(),
    }
}

/// Decimals in base units, or `None` when the fields are out of range.
fn display_digits(decimals: &str, multiplier: &str) -> Option<i32> {
    let decimals = decimals.parse::<i32>().unwrap_or(0);
    let multiplier = multiplier.parse::<i32>().unwrap_or(0);
    if decimals.unsigned_abs() > MAX_EXPONENT.unsigned_abs()
        || multiplier.unsigned_abs() > MAX_EXPONENT.unsigned_abs()
    {
        return None;
    }
    decimals.checked_sub(multiplier)
}

pub(super) fn decode(message: &str) -> DecodeOutcome {
    let fields: Vec<&str> = tokens(message, Delimiter::Comma).collect();
    if fields.len() <= HEADER_FIELDS {
        debug!(fields = fields.len(), "QDDA reply too short");
        return DecodeOutcome::unrecognized();
    }

    let Ok(mode_count) = fields[HEADER_FIELDS].parse::<usize>() else {
        debug!(field = fields[HEADER_FIELDS], "Invalid QDDA mode count");
        return DecodeOutcome::unrecognized();
    };
    let modes_start = HEADER_FIELDS + 1;
    let Some(modes) = fields.get(modes_start..modes_start.saturating_add(mode_count)) else {
        debug!(mode_count, "QDDA mode count exceeds reply");
        return DecodeOutcome::unrecognized();
    };

    let count_index = modes_start + mode_count;
    let Some(reading_count) = fields.get(count_index).and_then(|f| f.parse::<usize>().ok())
    else {
        debug!("Missing QDDA reading count");
        return DecodeOutcome::unrecognized();
    };
    let readings_start = count_index + 1;
    let readings_end = reading_count
        .checked_mul(FIELDS_PER_READING)
        .and_then(|n| n.checked_add(readings_start));
    let Some(readings) = readings_end.and_then(|end| fields.get(readings_start..end)) else {
        debug!(reading_count, "QDDA reading count exceeds reply");
        return DecodeOutcome::unrecognized();
    };

    let mut common = mode_flags(modes);
    if fields[2] == "AUTO" {
        common |= MqFlags::AUTORANGE;
    }

    let mut samples = Vec::with_capacity(reading_count);
    for reading in readings.chunks_exact(FIELDS_PER_READING) {
        let [id, value_text, unit_text, multiplier, decimals, _display_digits, state_text, attribute_text, _timestamp] =
            reading
        else {
            continue;
        };

        let Some((value, _)) = parse_number(value_text) else {
            debug!(reading = id, value = value_text, "Invalid float");
            continue;
        };
        let Some(mapping) = lookup_unit(unit_text) else {
            warn!(reading = id, unit = unit_text, "Unknown unit");
            continue;
        };
        let Some(state) = parse_state(state_text) else {
            warn!(reading = id, state = state_text, "Unknown state");
            continue;
        };
        let attribute = parse_attribute(attribute_text).unwrap_or(ReadingAttribute::None);

        // Decimals count on the display, which is scaled by the unit multiplier.
        let Some(digits) = display_digits(decimals, multiplier) else {
            debug!(reading = id, decimals, multiplier, "Invalid precision fields");
            continue;
        };

        if let Some(mut sample) = build_reading(mapping, state, attribute, value, digits) {
            sample.flags |= common | reading_flags(id);
            samples.push(sample.on_channel(id.to_ascii_lowercase()));
        }
    }

    DecodeOutcome::with_samples(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Quantity, Unit};

    const LIVE_VDC: &str = "V_DC,NONE,AUTO,VDC,2,0,OFF,0.000,0,2,\
        LIVE,12.3456,VDC,0,4,5,NORMAL,NONE,1700000000.125,\
        PRIMARY,12.3456,VDC,0,4,5,NORMAL,NONE,1700000000.125";

    #[test]
    fn one_sample_per_reading() {
        let out = decode(LIVE_VDC);
        assert!(out.meaningful);
        assert_eq!(out.samples.len(), 2);

        let primary = &out.samples[1];
        assert_eq!(primary.channel, "primary");
        assert_eq!(primary.quantity, Quantity::Voltage);
        assert_eq!(primary.unit, Unit::Volt);
        assert_eq!(primary.value, 12.3456);
        assert_eq!(primary.digits, 4);
        assert_eq!(primary.flags, MqFlags::DC | MqFlags::AUTORANGE);
    }

    #[test]
    fn modes_and_reading_ids_set_flags() {
        let message = "OHMS,NONE,MANUAL,OHM,3,3,OFF,1700000000.0,2,MIN_MAX_AVG,HOLD,2,\
            MAXIMUM,1523.0,OHM,3,3,5,NORMAL,NONE,1700000001.0,\
            MINIMUM,1499.5,OHM,3,3,5,NORMAL,NONE,1700000002.0";
        let out = decode(message);
        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.samples[0].flags, MqFlags::HOLD | MqFlags::MAX);
        assert_eq!(out.samples[1].flags, MqFlags::HOLD | MqFlags::MIN);
        assert_eq!(out.samples[0].digits, 0);
    }

    #[test]
    fn overload_reading() {
        let message = "OHMS,NONE,AUTO,OHM,6,6,OFF,0,0,1,\
            PRIMARY,9.99999999E+37,OHM,6,1,5,OL,NONE,1700000000.0";
        let out = decode(message);
        assert_eq!(out.samples[0].value, f64::INFINITY);
    }

    #[test]
    fn relative_mode() {
        let message = "V_AC,NONE,AUTO,VAC,2,0,OFF,0,1,REL,1,\
            REL_LIVE,0.0125,VAC,0,4,5,NORMAL,NONE,1700000000.0";
        let out = decode(message);
        let m = &out.samples[0];
        assert_eq!(m.channel, "rel_live");
        assert!(m.flags.contains(MqFlags::RELATIVE | MqFlags::AC | MqFlags::RMS));
    }

    #[test]
    fn declared_counts_must_fit() {
        assert!(!decode("V_DC,NONE,AUTO,VDC,2,0,OFF,0,5,HOLD").meaningful);
        assert!(!decode("V_DC,NONE,AUTO,VDC,2,0,OFF,0,0,3,PRIMARY,1.0,VDC").meaningful);
        assert!(!decode("12.34,VDC,NORMAL").meaningful);
    }

    #[test]
    fn absurd_precision_fields_skip_the_reading() {
        let message = "V_DC,NONE,AUTO,VDC,2,0,OFF,0,0,3,\
            LIVE,1.0,VDC,2147483647,-2147483648,5,NORMAL,NONE,0,\
            PRIMARY,1E-2147483648,VDC,0,4,5,NORMAL,NONE,0,\
            SECONDARY,2.5,VDC,-3,1,5,NORMAL,NONE,0";
        let out = decode(message);
        assert!(out.meaningful);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].channel, "secondary");
        assert_eq!(out.samples[0].digits, 4);
    }

    #[test]
    fn bad_readings_are_skipped_individually() {
        let message = "V_DC,NONE,AUTO,VDC,2,0,OFF,0,0,2,\
            LIVE,abc,VDC,0,4,5,NORMAL,NONE,0,\
            PRIMARY,1.0,VDC,0,4,5,BLANK,NONE,0";
        let out = decode(message);
        assert!(out.meaningful);
        assert!(out.samples.is_empty());
    }
}
