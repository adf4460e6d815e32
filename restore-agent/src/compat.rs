//! Engine version compatibility between a backup and the restoring binary.

use crate::utils::errors::{RestoreError, RestoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `major.minor.patch` with an optional `-pre` / `+build` tail, which is ignored
/// for compatibility purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for EngineVersion {
    type Err = RestoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || RestoreError::MalformedVersion {
            version: raw.to_string(),
        };

        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(|c| c == '-' || c == '+')
            .next()
            .unwrap_or_default();

        let mut numbers = core.split('.').map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse::<u64>().ok()
            }
        });

        let major = numbers.next().flatten().ok_or_else(malformed)?;
        let minor = numbers.next().flatten().ok_or_else(malformed)?;
        let patch = numbers.next().flatten().ok_or_else(malformed)?;
        if numbers.next().is_some() {
            return Err(malformed());
        }

        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Which version deltas between backup and restoring engine are allowed.
///
/// Patch level never matters. Restoring a backup with the exact version that
/// produced it is accepted by every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompatibilityPolicy {
    /// Same major; the backup's minor must not be newer than the requester's.
    #[default]
    SameMajor,
    /// Same major and minor.
    SameMinor,
}

impl CompatibilityPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            CompatibilityPolicy::SameMajor => "same-major",
            CompatibilityPolicy::SameMinor => "same-minor",
        }
    }

    pub fn allows(&self, requesting: EngineVersion, backup: EngineVersion) -> bool {
        if requesting.major != backup.major {
            return false;
        }
        match self {
            CompatibilityPolicy::SameMajor => backup.minor <= requesting.minor,
            CompatibilityPolicy::SameMinor => backup.minor == requesting.minor,
        }
    }

    pub fn ensure_compatible(&self, requesting: &str, backup: &str) -> RestoreResult<()> {
        let requesting_version: EngineVersion = requesting.parse()?;
        let backup_version: EngineVersion = backup.parse()?;

        if self.allows(requesting_version, backup_version) {
            Ok(())
        } else {
            Err(RestoreError::IncompatibleVersion {
                requesting: requesting.to_string(),
                backup: backup.to_string(),
                policy: self.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [CompatibilityPolicy; 2] =
        [CompatibilityPolicy::SameMajor, CompatibilityPolicy::SameMinor];

    #[test]
    fn test_parse_versions() {
        let v: EngineVersion = "6.0.1".parse().unwrap();
        assert_eq!(v, EngineVersion { major: 6, minor: 0, patch: 1 });

        let rc: EngineVersion = "7.0.0-rc2".parse().unwrap();
        assert_eq!(rc.to_string(), "7.0.0");

        let prefixed: EngineVersion = "v4.4.18+ent".parse().unwrap();
        assert_eq!(prefixed.major, 4);
    }

    #[test]
    fn test_malformed_versions() {
        for raw in ["", "6", "6.0", "6.x.1", "6.0.1.2", "six", "6..1", "-6.0.1"] {
            let err = raw.parse::<EngineVersion>().unwrap_err();
            assert!(
                matches!(err, RestoreError::MalformedVersion { .. }),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_identical_versions_always_compatible() {
        for policy in POLICIES {
            for v in ["6.0.1", "4.4.18", "7.0.0-rc2", "0.0.0"] {
                assert!(policy.ensure_compatible(v, v).is_ok(), "{v} under {policy:?}");
            }
        }
    }

    #[test]
    fn test_major_mismatch_always_incompatible() {
        for policy in POLICIES {
            for (requesting, backup) in [("5.0.0", "6.0.1"), ("7.0.2", "6.0.1"), ("6.0.1", "4.4.9")] {
                let err = policy.ensure_compatible(requesting, backup).unwrap_err();
                assert!(matches!(err, RestoreError::IncompatibleVersion { .. }));
            }
        }
    }

    #[test]
    fn test_same_major_policy_minor_rules() {
        let policy = CompatibilityPolicy::SameMajor;
        assert!(policy.ensure_compatible("6.2.0", "6.0.5").is_ok());
        assert!(policy.ensure_compatible("6.0.0", "6.0.9").is_ok());
        assert!(policy.ensure_compatible("6.0.9", "6.2.0").is_err());
    }

    #[test]
    fn test_same_minor_policy_minor_rules() {
        let policy = CompatibilityPolicy::SameMinor;
        assert!(policy.ensure_compatible("6.0.0", "6.0.9").is_ok());
        assert!(policy.ensure_compatible("6.2.0", "6.0.5").is_err());
    }

    #[test]
    fn test_malformed_input_reported_before_policy() {
        let err = CompatibilityPolicy::default()
            .ensure_compatible("6.0.1", "garbage")
            .unwrap_err();
        match err {
            RestoreError::MalformedVersion { version } => assert_eq!(version, "garbage"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_policy_deserializes_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            compatibility: CompatibilityPolicy,
        }
        let w: Wrapper = toml::from_str("compatibility = \"same-minor\"").unwrap();
        assert_eq!(w.compatibility, CompatibilityPolicy::SameMinor);
    }
}
