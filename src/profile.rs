//! Device profiles and the profile registry.
//!
//! A profile is the static description of one meter model: what to send to
//! poll it, how fast, and which grammar its replies use. Profiles are plain
//! data; the [`ProfileRegistry`] is an explicit value handed to discovery and
//! configuration, never a global.

use crate::decoder::DecoderKind;
use crate::error::{AppResult, DaqError};
use crate::measurement::DEFAULT_CHANNEL;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Meter families with a built-in profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlukeModel {
    /// Fluke 87
    Fluke87,
    /// Fluke 89
    Fluke89,
    /// Fluke 187
    Fluke187,
    /// Fluke 189
    Fluke189,
    /// ScopeMeter 190 series, including the 199B
    Fluke190,
    /// Fluke 287
    Fluke287,
    /// Fluke 289
    Fluke289,
    /// 287 polled with plain `QM` instead of `QDDA`
    Fluke287Qm,
}

/// Immutable description of a supported meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Meter family.
    pub model: FlukeModel,
    /// Model name as reported in the `ID` reply, without the vendor.
    pub model_name: &'static str,
    /// Unique lookup key for configuration and the command line.
    pub key: &'static str,
    /// Command that requests one reading, delimiter included.
    pub poll_command: &'static str,
    /// Minimum spacing of answered polls.
    pub poll_period_ms: u64,
    /// A poll left unanswered this long is sent again.
    pub response_timeout_ms: u64,
    /// Grammar of the replies.
    pub decoder: DecoderKind,
    /// Channels the meter can report on. Samples on any other channel are
    /// dropped by the session.
    pub channels: &'static [&'static str],
}

impl DeviceProfile {
    /// True when `channel` is one of the profile's channels.
    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| *c == channel)
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", VENDOR, self.model_name)
    }
}

/// Vendor prefix of every supported `ID` reply.
pub const VENDOR: &str = "FLUKE";

const SINGLE_CHANNEL: &[&str] = &[DEFAULT_CHANNEL];
/// Lower-cased reading ids of the 287/289 `QDDA` reply.
const QDDA_CHANNELS: &[&str] = &[
    "live",
    "primary",
    "secondary",
    "bar_graph",
    "minimum",
    "maximum",
    "average",
    "rel_live",
    "rel_reference",
    "db_ref",
    "temp_offset",
];

const fn qm18x(model: FlukeModel, model_name: &'static str, key: &'static str) -> DeviceProfile {
    DeviceProfile {
        model,
        model_name,
        key,
        poll_command: "QM\r",
        poll_period_ms: 100,
        response_timeout_ms: 1000,
        decoder: DecoderKind::Qm18x,
        channels: SINGLE_CHANNEL,
    }
}

/// Every profile shipped with the crate, in lookup order.
pub static SUPPORTED_PROFILES: &[DeviceProfile] = &[
    qm18x(FlukeModel::Fluke87, "87", "87"),
    qm18x(FlukeModel::Fluke89, "89", "89"),
    qm18x(FlukeModel::Fluke187, "187", "187"),
    qm18x(FlukeModel::Fluke189, "189", "189"),
    DeviceProfile {
        model: FlukeModel::Fluke190,
        model_name: "199B",
        key: "199b",
        poll_command: "QM\r",
        poll_period_ms: 1000,
        response_timeout_ms: 3500,
        decoder: DecoderKind::Qm19x,
        channels: SINGLE_CHANNEL,
    },
    DeviceProfile {
        model: FlukeModel::Fluke287,
        model_name: "287",
        key: "287",
        poll_command: "QDDA\r",
        poll_period_ms: 100,
        response_timeout_ms: 1000,
        decoder: DecoderKind::Qdda28x,
        channels: QDDA_CHANNELS,
    },
    DeviceProfile {
        model: FlukeModel::Fluke289,
        model_name: "289",
        key: "289",
        poll_command: "QDDA\r",
        poll_period_ms: 100,
        response_timeout_ms: 1000,
        decoder: DecoderKind::Qdda28x,
        channels: QDDA_CHANNELS,
    },
    DeviceProfile {
        model: FlukeModel::Fluke287Qm,
        model_name: "287",
        key: "287-qm",
        poll_command: "QM\r",
        poll_period_ms: 100,
        response_timeout_ms: 1000,
        decoder: DecoderKind::Qm28x,
        channels: SINGLE_CHANNEL,
    },
];

/// Lookup table of known profiles.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<&'static DeviceProfile>,
}

impl ProfileRegistry {
    /// Registry of every built-in profile.
    pub fn builtin() -> Self {
        Self {
            profiles: SUPPORTED_PROFILES.iter().collect(),
        }
    }

    /// Registry restricted to `profiles`, searched in order.
    pub fn from_profiles(profiles: Vec<&'static DeviceProfile>) -> Self {
        Self { profiles }
    }

    /// Profiles in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &'static DeviceProfile> + '_ {
        self.profiles.iter().copied()
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True when no profile is registered.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Looks up a profile by its configuration key, case-insensitively.
    pub fn find_by_key(&self, key: &str) -> Option<&'static DeviceProfile> {
        let key = key.trim();
        self.iter().find(|p| p.key.eq_ignore_ascii_case(key))
    }

    /// Like [`find_by_key`](Self::find_by_key) but failing with `UnknownModel`.
    pub fn require(&self, key: &str) -> AppResult<&'static DeviceProfile> {
        self.find_by_key(key)
            .ok_or_else(|| DaqError::UnknownModel(key.to_string()))
    }

    /// Matches the model field of an `ID` reply, e.g. `FLUKE 189`.
    ///
    /// The vendor prefix is required; one separator character after it is
    /// skipped. The first profile with that model name wins.
    pub fn find_by_id_string(&self, id: &str) -> Option<&'static DeviceProfile> {
        let rest = id.trim().strip_prefix(VENDOR)?;
        let mut chars = rest.chars();
        chars.next()?;
        let model_name = chars.as_str().trim();
        self.iter()
            .find(|p| p.model_name.eq_ignore_ascii_case(model_name))
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_grammar() {
        let registry = ProfileRegistry::builtin();
        for kind in [
            DecoderKind::Qm18x,
            DecoderKind::Qm28x,
            DecoderKind::Qm19x,
            DecoderKind::Qdda28x,
        ] {
            assert!(registry.iter().any(|p| p.decoder == kind), "{kind:?}");
        }
    }

    #[test]
    fn keys_are_unique() {
        let registry = ProfileRegistry::builtin();
        let keys: Vec<&str> = registry.iter().map(|p| p.key).collect();
        for (i, key) in keys.iter().enumerate() {
            assert!(!keys[i + 1..].contains(key), "duplicate key {key}");
        }
    }

    #[test]
    fn timeout_is_never_shorter_than_period() {
        for p in SUPPORTED_PROFILES {
            assert!(p.response_timeout_ms >= p.poll_period_ms, "{}", p.key);
        }
    }

    #[test]
    fn id_string_lookup() {
        let registry = ProfileRegistry::builtin();
        assert_eq!(
            registry.find_by_id_string("FLUKE 189").map(|p| p.model),
            Some(FlukeModel::Fluke189)
        );
        assert_eq!(
            registry.find_by_id_string("FLUKE 199B").map(|p| p.poll_period_ms),
            Some(1000)
        );
        assert_eq!(
            registry.find_by_id_string("FLUKE 287").map(|p| p.decoder),
            Some(DecoderKind::Qdda28x)
        );
        assert!(registry.find_by_id_string("FLUKE 999").is_none());
        assert!(registry.find_by_id_string("AGILENT 189").is_none());
        assert!(registry.find_by_id_string("FLUKE").is_none());
    }

    #[test]
    fn key_lookup() {
        let registry = ProfileRegistry::builtin();
        assert_eq!(
            registry.find_by_key("287-QM").map(|p| p.decoder),
            Some(DecoderKind::Qm28x)
        );
        assert!(matches!(registry.require("nope"), Err(DaqError::UnknownModel(_))));
    }

    #[test]
    fn channels_follow_the_grammar() {
        for p in SUPPORTED_PROFILES {
            assert!(!p.channels.is_empty(), "{}", p.key);
            let single = p.channels == [DEFAULT_CHANNEL];
            assert_eq!(single, p.decoder != DecoderKind::Qdda28x, "{}", p.key);
        }
        let registry = ProfileRegistry::builtin();
        let qdda = registry.require("289").unwrap();
        assert!(qdda.has_channel("primary"));
        assert!(qdda.has_channel("rel_live"));
        assert!(!qdda.has_channel("P1"));
        assert!(registry.require("189").unwrap().has_channel("P1"));
    }

    #[test]
    fn custom_registry() {
        let registry = ProfileRegistry::from_profiles(vec![&SUPPORTED_PROFILES[0]]);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_id_string("FLUKE 89").is_none());
    }
}
