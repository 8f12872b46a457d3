//! Response decoders for the supported line grammars.
//!
//! The set of grammars is closed, so they are modelled as the [`DecoderKind`]
//! enum rather than a trait object. Each profile names its decoder; the
//! session calls [`DecoderKind::decode`] for every non-ACK message.
//!
//! Decoders are pure. They never touch the transport: when a grammar needs a
//! second request (the ScopeMeter metadata/data exchange) the command is
//! returned in [`DecodeOutcome::follow_up`] and the session sends it.
//!
//! Malformed input is never an error. It is logged at `debug` and produces no
//! samples; unknown units are logged at `warn` since they point at a table
//! gap rather than line noise.
//!
//! # Grammars
//!
//! | kind | meters | example |
//! |---|---|---|
//! | `Qm18x` | 87/89/187/189 | `QM,+1.234 mV DC` |
//! | `Qm28x` | 287/289 (QM) | `12.34,VDC,NORMAL,NONE` |
//! | `Qm19x` | 190/199B | metadata sets of 7, then `9.9E+37` |
//! | `Qdda28x` | 287/289 (QDDA) | function, modes, then 9-field readings |

use crate::measurement::Measurement;
use serde::{Deserialize, Serialize};

mod qdda;
mod qm18x;
mod qm19x;
pub mod qm28x;
pub mod tokens;

pub use qm19x::Qm19xContext;

/// The response grammar spoken by a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// `QM,<value> <unit text>` replies of the 18x handhelds.
    Qm18x,
    /// `<value>,<unit>,<state>[,<attribute>]` replies.
    Qm28x,
    /// ScopeMeter metadata-then-data exchange.
    Qm19x,
    /// Structured `QDDA` replies of the 287/289.
    Qdda28x,
}

/// Per-session scratch state a decoder may keep between messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderState {
    /// Metadata of the last ScopeMeter reply.
    pub qm19x: Qm19xContext,
}

impl DecoderState {
    /// Forgets everything learned in the previous acquisition.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What came out of one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    /// Samples in wire order, not yet timestamped.
    pub samples: Vec<Measurement>,
    /// Command the session must send next, if the grammar asks for one.
    pub follow_up: Option<String>,
    /// The message had the shape of a reply in this grammar.
    ///
    /// A meaningful reply answers the outstanding poll even if it carried no
    /// usable reading (blank display, unknown unit).
    pub meaningful: bool,
}

impl DecodeOutcome {
    /// Line noise or a foreign reply.
    pub fn unrecognized() -> Self {
        Self::default()
    }

    /// A well-formed reply carrying no sample.
    pub fn empty() -> Self {
        Self {
            meaningful: true,
            ..Self::default()
        }
    }

    /// A well-formed reply carrying `samples`.
    pub fn with_samples(samples: Vec<Measurement>) -> Self {
        Self {
            samples,
            follow_up: None,
            meaningful: true,
        }
    }

    /// A well-formed reply carrying one sample.
    pub fn single(sample: Measurement) -> Self {
        Self::with_samples(vec![sample])
    }
}

impl DecoderKind {
    /// Decodes one message. `message` excludes the line delimiter.
    pub fn decode(&self, message: &str, state: &mut DecoderState) -> DecodeOutcome {
        match self {
            DecoderKind::Qm18x => qm18x::decode(message),
            DecoderKind::Qm28x => qm28x::decode(message),
            DecoderKind::Qm19x => qm19x::decode(message, &mut state.qm19x),
            DecoderKind::Qdda28x => qdda::decode(message),
        }
    }

    /// Short name for listings and logs.
    pub fn name(&self) -> &'static str {
        match self {
            DecoderKind::Qm18x => "qm18x",
            DecoderKind::Qm28x => "qm28x",
            DecoderKind::Qm19x => "qm19x",
            DecoderKind::Qdda28x => "qdda28x",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Quantity, Unit};

    fn assert_deterministic(kind: DecoderKind, messages: &[&str]) {
        let mut first_state = DecoderState::default();
        let mut second_state = DecoderState::default();
        for msg in messages {
            let a = kind.decode(msg, &mut first_state);
            let b = kind.decode(msg, &mut second_state);
            assert_eq!(a.samples.len(), b.samples.len(), "{msg}");
            for (x, y) in a.samples.iter().zip(&b.samples) {
                assert!(x.same_reading(y), "{msg}: {x:?} != {y:?}");
            }
            assert_eq!(a.follow_up, b.follow_up);
            assert_eq!(a.meaningful, b.meaningful);
        }
        assert_eq!(first_state, second_state);
    }

    #[test]
    fn decoding_is_deterministic_for_every_grammar() {
        assert_deterministic(
            DecoderKind::Qm18x,
            &["QM,+1.234 V DC", "QM,Out of range.  Ohms", "QM,bogus"],
        );
        assert_deterministic(
            DecoderKind::Qm28x,
            &["12.34,VDC,NORMAL", "9.9E+37,OHM,OL,NONE", "OHM,OL,NONE"],
        );
        assert_deterministic(
            DecoderKind::Qm19x,
            &["11,1,3,1,1,0,0", "9.9E+37", "1.5E+0"],
        );
        assert_deterministic(
            DecoderKind::Qdda28x,
            &["V_DC,NONE,AUTO,VDC,2,0,OFF,0,0,1,LIVE,1.5,VDC,0,4,5,NORMAL,NONE,1700000000.5"],
        );
    }

    #[test]
    fn empty_message_is_never_meaningful() {
        let mut state = DecoderState::default();
        for kind in [
            DecoderKind::Qm18x,
            DecoderKind::Qm28x,
            DecoderKind::Qm19x,
            DecoderKind::Qdda28x,
        ] {
            let out = kind.decode("", &mut state);
            assert!(out.samples.is_empty(), "{}", kind.name());
            assert!(!out.meaningful, "{}", kind.name());
        }
    }

    #[test]
    fn dbm_is_power_in_every_grammar() {
        let mut state = DecoderState::default();
        let simple = DecoderKind::Qm18x.decode("QM,-3.2 dBm", &mut state);
        let extended = DecoderKind::Qm28x.decode("-3.2,dBm,NORMAL,NONE", &mut state);
        for out in [simple, extended] {
            assert_eq!(out.samples.len(), 1);
            assert_eq!(out.samples[0].quantity, Quantity::Power);
            assert_eq!(out.samples[0].unit, Unit::DecibelMw);
        }
    }

    #[test]
    fn garbled_exponents_never_panic() {
        let mut state = DecoderState::default();
        for (kind, message) in [
            (DecoderKind::Qm18x, "QM,1E-2147483648 V DC"),
            (DecoderKind::Qm28x, "1E-2147483648,VDC,NORMAL,NONE"),
            (DecoderKind::Qm28x, "1E+400,VDC,NORMAL,NONE"),
            (DecoderKind::Qm19x, "1E-2147483648"),
            (
                DecoderKind::Qdda28x,
                "V_DC,NONE,AUTO,VDC,2,0,OFF,0,0,1,LIVE,1.5,VDC,-2147483648,2147483647,5,NORMAL,NONE,0",
            ),
        ] {
            let out = kind.decode(message, &mut state);
            assert!(out.samples.is_empty(), "{message}");
        }
    }
}
