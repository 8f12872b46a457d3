//! `<value>,<unit>,<state>[,<attribute>]` replies of the 287/289 family.
//!
//! The unit, state and attribute vocabularies below are shared with the
//! structured `QDDA` grammar, which reports each reading with the same
//! keywords.

use super::tokens::{parse_number, tokens, Delimiter};
use super::DecodeOutcome;
use crate::measurement::{Measurement, MqFlags, Quantity, Unit};
use tracing::{debug, warn};

/// One entry of the unit keyword table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMapping {
    /// Unit token as sent by the meter.
    pub keyword: &'static str,
    /// Quantity it measures.
    pub quantity: Quantity,
    /// Unit of the reported value.
    pub unit: Unit,
    /// Coupling flags it implies.
    pub flags: MqFlags,
}

const fn map(keyword: &'static str, quantity: Quantity, unit: Unit, flags: MqFlags) -> UnitMapping {
    UnitMapping {
        keyword,
        quantity,
        unit,
        flags,
    }
}

const NONE: MqFlags = MqFlags::empty();
const AC_RMS: MqFlags = MqFlags::AC.union(MqFlags::RMS);
const AC_DC_RMS: MqFlags = MqFlags::AC.union(MqFlags::DC).union(MqFlags::RMS);

/// Every unit keyword the meters report. Lookup is exact and case-sensitive.
pub const UNIT_MAP: &[UnitMapping] = &[
    map("VDC", Quantity::Voltage, Unit::Volt, MqFlags::DC),
    map("VAC", Quantity::Voltage, Unit::Volt, AC_RMS),
    map("ADC", Quantity::Current, Unit::Ampere, MqFlags::DC),
    map("AAC", Quantity::Current, Unit::Ampere, AC_RMS),
    map("VAC_PLUS_DC", Quantity::Voltage, Unit::Volt, AC_DC_RMS),
    map("AAC_PLUS_DC", Quantity::Current, Unit::Ampere, AC_DC_RMS),
    map("V", Quantity::Voltage, Unit::Volt, NONE),
    map("A", Quantity::Current, Unit::Ampere, NONE),
    map("OHM", Quantity::Resistance, Unit::Ohm, NONE),
    map("SIE", Quantity::Conductance, Unit::Siemens, NONE),
    map("Hz", Quantity::Frequency, Unit::Hertz, NONE),
    map("S", Quantity::PulseWidth, Unit::Second, NONE),
    map("F", Quantity::Capacitance, Unit::Farad, NONE),
    map("CEL", Quantity::Temperature, Unit::Celsius, NONE),
    map("FAR", Quantity::Temperature, Unit::Fahrenheit, NONE),
    map("PCT", Quantity::DutyCycle, Unit::Percentage, NONE),
    map("dBm", Quantity::Power, Unit::DecibelMw, AC_RMS),
    map("dBV", Quantity::Voltage, Unit::DecibelVolt, AC_RMS),
];

/// Display state accompanying a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingState {
    /// Reading not valid.
    Invalid,
    /// Regular reading.
    Normal,
    /// Display blanked.
    Blank,
    /// Input capacitor discharging.
    Discharge,
    /// Over-load, positive
    Ol,
    /// Over-load, negative
    OlMinus,
    /// Open thermocouple
    OpenTc,
}

/// Extra qualifier of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingAttribute {
    /// No qualifier.
    None,
    /// Continuity test open.
    OpenCircuit,
    /// Continuity test closed.
    ShortCircuit,
    /// Continuity glitch captured.
    GlitchCircuit,
    /// Diode test passed.
    GoodDiode,
    /// Low-ohms mode.
    LoOhms,
    /// Triggered on a falling edge.
    NegativeEdge,
    /// Triggered on a rising edge.
    PositiveEdge,
    /// High current input in use.
    HighCurrent,
}

/// Exact lookup in [`UNIT_MAP`].
pub fn lookup_unit(keyword: &str) -> Option<&'static UnitMapping> {
    UNIT_MAP.iter().find(|m| m.keyword == keyword)
}

/// Parses a state keyword such as `OL_MINUS`.
pub fn parse_state(keyword: &str) -> Option<ReadingState> {
    Some(match keyword {
        "INVALID" => ReadingState::Invalid,
        "NORMAL" => ReadingState::Normal,
        "BLANK" => ReadingState::Blank,
        "DISCHARGE" => ReadingState::Discharge,
        "OL" => ReadingState::Ol,
        "OL_MINUS" => ReadingState::OlMinus,
        "OPEN_TC" => ReadingState::OpenTc,
        _ => return None,
    })
}

/// Parses an attribute keyword such as `OPEN_CIRCUIT`.
pub fn parse_attribute(keyword: &str) -> Option<ReadingAttribute> {
    Some(match keyword {
        "NONE" => ReadingAttribute::None,
        "OPEN_CIRCUIT" => ReadingAttribute::OpenCircuit,
        "SHORT_CIRCUIT" => ReadingAttribute::ShortCircuit,
        "GLITCH_CIRCUIT" => ReadingAttribute::GlitchCircuit,
        "GOOD_DIODE" => ReadingAttribute::GoodDiode,
        "LO_OHMS" => ReadingAttribute::LoOhms,
        "NEGATIVE_EDGE" => ReadingAttribute::NegativeEdge,
        "POSITIVE_EDGE" => ReadingAttribute::PositiveEdge,
        "HIGH_CURRENT" => ReadingAttribute::HighCurrent,
        _ => return None,
    })
}

/// Applies state and attribute to a raw reading.
///
/// Returns `None` when the display shows nothing usable (blank, discharging,
/// invalid) or the attribute has no representation for this quantity.
pub(super) fn build_reading(
    mapping: &UnitMapping,
    state: ReadingState,
    attribute: ReadingAttribute,
    value: f64,
    digits: i32,
) -> Option<Measurement> {
    let mut quantity = mapping.quantity;
    let mut unit = mapping.unit;
    let mut value = value;

    if quantity == Quantity::Resistance {
        match attribute {
            ReadingAttribute::None => {}
            ReadingAttribute::OpenCircuit | ReadingAttribute::ShortCircuit => {
                quantity = Quantity::Continuity;
                unit = Unit::Boolean;
                value = if attribute == ReadingAttribute::ShortCircuit { 1.0 } else { 0.0 };
            }
            other => {
                debug!(attribute = ?other, "Attribute not representable on resistance");
                return None;
            }
        }
    }

    if quantity != Quantity::Continuity {
        value = match state {
            ReadingState::Normal => value,
            ReadingState::Ol => f64::INFINITY,
            ReadingState::OlMinus => f64::NEG_INFINITY,
            ReadingState::OpenTc => f64::NAN,
            ReadingState::Invalid | ReadingState::Blank | ReadingState::Discharge => {
                debug!(?state, "No usable reading on display");
                return None;
            }
        };
    } else if matches!(
        state,
        ReadingState::Invalid | ReadingState::Blank | ReadingState::Discharge
    ) {
        debug!(?state, "No usable reading on display");
        return None;
    }

    let digits = if quantity == Quantity::Continuity { 0 } else { digits };
    Some(
        Measurement::new(quantity, unit, value)
            .with_flags(mapping.flags)
            .with_digits(digits),
    )
}

pub(super) fn decode(message: &str) -> DecodeOutcome {
    let mut fields = tokens(message, Delimiter::detect(message));
    let (Some(value_text), Some(unit_text), Some(state_text)) =
        (fields.next(), fields.next(), fields.next())
    else {
        debug!(line = message, "Too few fields for a measurement");
        return DecodeOutcome::unrecognized();
    };
    let attribute_text = fields.next().filter(|t| !t.is_empty());

    let Some((value, digits)) = parse_number(value_text) else {
        debug!(value = value_text, "Invalid float");
        return DecodeOutcome::unrecognized();
    };

    let Some(mapping) = lookup_unit(unit_text) else {
        warn!(unit = unit_text, "Unknown unit");
        return DecodeOutcome::empty();
    };

    let Some(state) = parse_state(state_text) else {
        warn!(state = state_text, "Unknown state");
        return DecodeOutcome::empty();
    };

    // Attributes only change the meaning of resistance readings.
    let attribute = match attribute_text {
        None => ReadingAttribute::None,
        Some(text) => match parse_attribute(text) {
            Some(attribute) => attribute,
            None if mapping.quantity == Quantity::Resistance => {
                warn!(attribute = text, "Unknown attribute");
                return DecodeOutcome::empty();
            }
            None => {
                debug!(attribute = text, "Ignoring unknown attribute");
                ReadingAttribute::None
            }
        },
    };

    match build_reading(mapping, state, attribute, value, digits) {
        Some(sample) => DecodeOutcome::single(sample),
        None => DecodeOutcome::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn one(message: &str) -> Measurement {
        let out = decode(message);
        assert_eq!(out.samples.len(), 1, "{message}");
        out.samples.into_iter().next().unwrap()
    }

    #[test]
    fn three_fields_default_the_attribute() {
        let m = one("12.34,VDC,NORMAL");
        assert_eq!(m.quantity, Quantity::Voltage);
        assert_eq!(m.unit, Unit::Volt);
        assert_eq!(m.flags, MqFlags::DC);
        assert_eq!(m.value, 12.34);
        assert_eq!(m.digits, 2);
    }

    #[test]
    fn every_unit_keyword_maps_exactly() {
        for mapping in UNIT_MAP {
            let m = one(&format!("1.5,{},NORMAL,NONE", mapping.keyword));
            assert_eq!(m.quantity, mapping.quantity, "{}", mapping.keyword);
            assert_eq!(m.unit, mapping.unit, "{}", mapping.keyword);
            assert_eq!(m.flags, mapping.flags, "{}", mapping.keyword);
            assert_eq!(m.value, 1.5);
        }
    }

    #[test]
    fn keywords_do_not_collide() {
        for (i, a) in UNIT_MAP.iter().enumerate() {
            for b in &UNIT_MAP[i + 1..] {
                assert_ne!(a.keyword, b.keyword);
            }
        }
    }

    #[test]
    fn overload_states() {
        assert_eq!(one("9.99999999E+37,OHM,OL,NONE").value, f64::INFINITY);
        assert_eq!(one("-9.99999999E+37,VDC,OL_MINUS,NONE").value, f64::NEG_INFINITY);
        assert!(one("0.0,CEL,OPEN_TC,NONE").value.is_nan());
    }

    #[test]
    fn continuity_attributes() {
        let open = one("9.99999999E+37,OHM,OL,OPEN_CIRCUIT");
        assert_eq!(open.quantity, Quantity::Continuity);
        assert_eq!(open.unit, Unit::Boolean);
        assert_eq!(open.value, 0.0);

        let short = one("2.1E+0,OHM,NORMAL,SHORT_CIRCUIT");
        assert_eq!(short.quantity, Quantity::Continuity);
        assert_eq!(short.value, 1.0);
    }

    #[test]
    fn unusable_displays_are_dropped() {
        for message in [
            "0.0,VDC,BLANK,NONE",
            "0.0,VDC,DISCHARGE,NONE",
            "0.0,VDC,INVALID,NONE",
            "100.0,OHM,NORMAL,LO_OHMS",
        ] {
            let out = decode(message);
            assert!(out.meaningful, "{message}");
            assert!(out.samples.is_empty(), "{message}");
        }
    }

    #[test]
    fn unknown_attribute_only_matters_for_resistance() {
        let m = one("12.34,VDC,NORMAL,SPARKLES");
        assert_eq!(m.quantity, Quantity::Voltage);
        assert_eq!(m.value, 12.34);

        let out = decode("100.0,OHM,NORMAL,SPARKLES");
        assert!(out.meaningful);
        assert!(out.samples.is_empty());
    }

    #[test]
    fn garbled_numbers_are_unrecognized() {
        for message in [
            "1E-2147483648,VDC,NORMAL,NONE",
            "1E+400,VDC,NORMAL,NONE",
            "inf,VDC,NORMAL,NONE",
        ] {
            let out = decode(message);
            assert!(!out.meaningful, "{message}");
            assert!(out.samples.is_empty(), "{message}");
        }
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let out = decode("OHM,OL,NONE");
        assert!(out.samples.is_empty());
        assert!(!out.meaningful);
    }

    #[test]
    fn too_few_fields() {
        assert!(!decode("12.34,VDC").meaningful);
    }

    #[test]
    fn semicolon_separated_replies() {
        let m = one("1.0;AAC;NORMAL;NONE");
        assert_eq!(m.quantity, Quantity::Current);
        assert_eq!(m.flags, MqFlags::AC | MqFlags::RMS);
    }

    #[traced_test]
    #[test]
    fn unknown_unit_is_logged() {
        let out = decode("1.0,FURLONG,NORMAL,NONE");
        assert!(out.samples.is_empty());
        assert!(logs_contain("Unknown unit"));
    }
}
