//! `QM` replies of the Fluke 87/89/187/189.
//!
//! The reply is `QM,<value> <unit text>`, the unit text carrying an optional SI
//! prefix and a coupling suffix: `QM,-0.016 mV DC`, `QM,+12.41 kOhms`. An
//! over-range display is reported as `QM,Out of range.  <unit text>`.

use super::tokens::{parse_number, tokens, Delimiter};
use super::DecodeOutcome;
use crate::measurement::{Measurement, MqFlags, Quantity, Unit};
use tracing::{debug, warn};

const REPLY_TAG: &str = "QM";
const OUT_OF_RANGE: &str = "Out of range";

struct UnitRule {
    keyword: &'static str,
    quantity: Quantity,
    unit: Unit,
    flags: MqFlags,
    /// Extra power of ten for units not expressed in the base unit.
    exponent: i32,
}

const fn rule(keyword: &'static str, quantity: Quantity, unit: Unit, flags: MqFlags) -> UnitRule {
    UnitRule {
        keyword,
        quantity,
        unit,
        flags,
        exponent: 0,
    }
}

const AC_RMS: MqFlags = MqFlags::AC.union(MqFlags::RMS);
const AC_DC_RMS: MqFlags = MqFlags::AC.union(MqFlags::DC).union(MqFlags::RMS);

// Checked in order; the first keyword found with a valid prefix wins.
// Longer keywords precede their own prefixes ("V AC+DC" before "V AC").
const UNIT_RULES: &[UnitRule] = &[
    rule("V AC+DC", Quantity::Voltage, Unit::Volt, AC_DC_RMS),
    rule("V DC", Quantity::Voltage, Unit::Volt, MqFlags::DC),
    rule("V AC", Quantity::Voltage, Unit::Volt, AC_RMS),
    rule("dBV", Quantity::Voltage, Unit::DecibelVolt, AC_RMS),
    // A dBm level is a power, whatever the function switch says.
    rule("dBm", Quantity::Power, Unit::DecibelMw, AC_RMS),
    rule("Ohms", Quantity::Resistance, Unit::Ohm, MqFlags::empty()),
    rule("Farads", Quantity::Capacitance, Unit::Farad, MqFlags::empty()),
    rule("Deg C", Quantity::Temperature, Unit::Celsius, MqFlags::empty()),
    rule("Deg F", Quantity::Temperature, Unit::Fahrenheit, MqFlags::empty()),
    rule("A AC+DC", Quantity::Current, Unit::Ampere, AC_DC_RMS),
    rule("A DC", Quantity::Current, Unit::Ampere, MqFlags::DC),
    rule("A AC", Quantity::Current, Unit::Ampere, AC_RMS),
    rule("Hz", Quantity::Frequency, Unit::Hertz, MqFlags::empty()),
    rule("%", Quantity::DutyCycle, Unit::Percentage, MqFlags::empty()),
    UnitRule {
        keyword: "ms",
        quantity: Quantity::PulseWidth,
        unit: Unit::Second,
        flags: MqFlags::empty(),
        exponent: -3,
    },
    rule("S", Quantity::Conductance, Unit::Siemens, MqFlags::empty()),
];

fn prefix_exponent(prefix: &str) -> Option<i32> {
    match prefix {
        "" => Some(0),
        "p" => Some(-12),
        "n" => Some(-9),
        "u" | "µ" => Some(-6),
        "m" => Some(-3),
        "k" => Some(3),
        "M" => Some(6),
        _ => None,
    }
}

/// Finds the unit rule for `text`, returning it with the decimal exponent of
/// its prefix.
fn match_unit(text: &str) -> Option<(&'static UnitRule, i32)> {
    UNIT_RULES.iter().find_map(|rule| {
        let pos = text.find(rule.keyword)?;
        let exponent = prefix_exponent(text[..pos].trim())?;
        Some((rule, exponent + rule.exponent))
    })
}

pub(super) fn decode(message: &str) -> DecodeOutcome {
    let mut fields = tokens(message, Delimiter::Comma);
    if fields.next() != Some(REPLY_TAG) {
        debug!(line = message, "Not a QM reply");
        return DecodeOutcome::unrecognized();
    }
    let Some(body) = fields.next().filter(|b| !b.is_empty()) else {
        debug!(line = message, "QM reply without a reading");
        return DecodeOutcome::unrecognized();
    };

    let (reading, unit_text) = match body.strip_prefix(OUT_OF_RANGE) {
        Some(rest) => {
            let unit_text = rest.split_once('.').map_or(rest, |(_, after)| after);
            (None, unit_text.trim())
        }
        None => {
            let (value_text, unit_text) = body.split_once(' ').unwrap_or((body, ""));
            match parse_number(value_text) {
                Some(parsed) => (Some(parsed), unit_text.trim()),
                None => {
                    debug!(value = value_text, "Invalid float");
                    return DecodeOutcome::empty();
                }
            }
        }
    };

    let Some((rule, exponent)) = match_unit(unit_text) else {
        warn!(unit = unit_text, "Unknown unit in QM reply");
        return DecodeOutcome::empty();
    };

    let (value, digits) = match reading {
        Some((value, digits)) => {
            let scaled = value * 10f64.powi(exponent);
            if !scaled.is_finite() {
                debug!(value, exponent, "Reading overflows after scaling");
                return DecodeOutcome::empty();
            }
            (scaled, digits - exponent)
        }
        // Over-range on the ohms range means an open input.
        None if rule.quantity == Quantity::Resistance => (f64::INFINITY, 0),
        None => (f64::NAN, 0),
    };

    DecodeOutcome::single(
        Measurement::new(rule.quantity, rule.unit, value)
            .with_flags(rule.flags)
            .with_digits(digits),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(message: &str) -> Measurement {
        let out = decode(message);
        assert!(out.meaningful, "{message}");
        assert_eq!(out.samples.len(), 1, "{message}");
        out.samples.into_iter().next().unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn dc_voltage_with_prefix() {
        let m = one("QM,-0.016 mV DC");
        assert_eq!(m.quantity, Quantity::Voltage);
        assert_eq!(m.unit, Unit::Volt);
        assert_eq!(m.flags, MqFlags::DC);
        assert!(approx(m.value, -0.016e-3));
        assert_eq!(m.digits, 6);
    }

    #[test]
    fn ac_voltage_is_rms() {
        let m = one("QM,+230.1 V AC");
        assert_eq!(m.flags, MqFlags::AC | MqFlags::RMS);
        assert!(approx(m.value, 230.1));
    }

    #[test]
    fn resistance_prefixes_scale() {
        assert!(approx(one("QM,+12.41 kOhms").value, 12_410.0));
        assert!(approx(one("QM,+1.5 MOhms").value, 1_500_000.0));
    }

    #[test]
    fn out_of_range_resistance_is_open() {
        let m = one("QM,Out of range.  MOhms");
        assert_eq!(m.quantity, Quantity::Resistance);
        assert_eq!(m.value, f64::INFINITY);
    }

    #[test]
    fn out_of_range_voltage_is_invalid() {
        let m = one("QM,Out of range.  V DC");
        assert_eq!(m.quantity, Quantity::Voltage);
        assert!(m.value.is_nan());
    }

    #[test]
    fn remaining_units() {
        let cases = [
            ("QM,+10.0 nS", Quantity::Conductance, Unit::Siemens, 10.0e-9),
            ("QM,+4.7 uFarads", Quantity::Capacitance, Unit::Farad, 4.7e-6),
            ("QM,+21.5 Deg C", Quantity::Temperature, Unit::Celsius, 21.5),
            ("QM,+70.7 Deg F", Quantity::Temperature, Unit::Fahrenheit, 70.7),
            ("QM,+1.25 mA DC", Quantity::Current, Unit::Ampere, 1.25e-3),
            ("QM,+50.00 Hz", Quantity::Frequency, Unit::Hertz, 50.0),
            ("QM,+1.000 kHz", Quantity::Frequency, Unit::Hertz, 1000.0),
            ("QM,+49.9 %", Quantity::DutyCycle, Unit::Percentage, 49.9),
            ("QM,+2.5 ms", Quantity::PulseWidth, Unit::Second, 2.5e-3),
            ("QM,-3.2 dBm", Quantity::Power, Unit::DecibelMw, -3.2),
            ("QM,+1.0 dBV", Quantity::Voltage, Unit::DecibelVolt, 1.0),
        ];
        for (message, quantity, unit, value) in cases {
            let m = one(message);
            assert_eq!(m.quantity, quantity, "{message}");
            assert_eq!(m.unit, unit, "{message}");
            assert!(approx(m.value, value), "{message}: {}", m.value);
        }
    }

    #[test]
    fn ac_plus_dc_is_not_mistaken_for_ac() {
        let m = one("QM,+1.0 A AC+DC");
        assert_eq!(m.quantity, Quantity::Current);
        assert_eq!(m.flags, MqFlags::AC | MqFlags::DC | MqFlags::RMS);
    }

    #[test]
    fn ac_plus_dc_voltage() {
        let m = one("QM,+1.234 mV AC+DC");
        assert_eq!(m.quantity, Quantity::Voltage);
        assert_eq!(m.unit, Unit::Volt);
        assert_eq!(m.flags, MqFlags::AC | MqFlags::DC | MqFlags::RMS);
        assert!(approx(m.value, 1.234e-3));
        assert_eq!(m.digits, 6);
    }

    #[test]
    fn exponent_and_prefix_combine() {
        let m = one("QM,-2.5E-2 kOhms");
        assert!(approx(m.value, -25.0));
        assert_eq!(m.digits, 0);

        let m = one("QM,+9.9E+37 V DC");
        assert!(approx(m.value, 9.9e37));
    }

    #[test]
    fn extreme_numbers_yield_no_sample() {
        for message in [
            "QM,1E-2147483648 V DC",
            "QM,1E+2147483647 V DC",
            "QM,1E+400 V DC",
            "QM,+1.0E+305 MOhms",
        ] {
            let out = decode(message);
            assert!(out.meaningful, "{message}");
            assert!(out.samples.is_empty(), "{message}");
        }
    }

    #[test]
    fn zero_reading_is_kept() {
        let m = one("QM,+0.000 V DC");
        assert_eq!(m.value, 0.0);
        assert_eq!(m.digits, 3);
    }

    #[test]
    fn malformed_replies_yield_nothing() {
        assert!(!decode("ID").meaningful);
        assert!(!decode("QM").meaningful);

        let out = decode("QM,garbage V DC");
        assert!(out.meaningful);
        assert!(out.samples.is_empty());

        let out = decode("QM,+1.0 furlongs");
        assert!(out.samples.is_empty());
    }
}
