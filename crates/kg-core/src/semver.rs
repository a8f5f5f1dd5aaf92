use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A `major.minor.patch` version triple, per spec §3 (Schema.version) and
/// §GLOSSARY. Ordering is the standard semver precedence restricted to the
/// three numeric components this system needs (no pre-release/build
/// metadata, since schemas never carry them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Semver {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub const fn initial() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Semver {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(CoreError::SemverFormatError(s.to_string()));
        }
        let mut nums = [0u64; 3];
        for (i, part) in parts.iter().enumerate() {
            nums[i] = part
                .parse::<u64>()
                .map_err(|_| CoreError::SemverFormatError(s.to_string()))?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl PartialOrd for Semver {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Semver {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_triple() {
        let v: Semver = "1.2.3".parse().unwrap();
        assert_eq!(v, Semver::new(1, 2, 3));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("1.2".parse::<Semver>().is_err());
        assert!("1.2.x".parse::<Semver>().is_err());
        assert!("v1.2.3".parse::<Semver>().is_err());
    }

    #[test]
    fn orders_descending_correctly() {
        let mut versions = vec![
            Semver::new(1, 0, 0),
            Semver::new(2, 1, 0),
            Semver::new(1, 5, 2),
        ];
        versions.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            versions,
            vec![Semver::new(2, 1, 0), Semver::new(1, 5, 2), Semver::new(1, 0, 0)]
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let v = Semver::new(3, 4, 5);
        let parsed: Semver = v.to_string().parse().unwrap();
        assert_eq!(v, parsed);
    }
}
