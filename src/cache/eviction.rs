use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What an over-capacity sweep does when the least recently used entry is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepPolicy {
    /// Stop at the busy entry; the cache stays over capacity until it is released.
    #[default]
    StopAtBusy,
    /// Step past busy entries and keep evicting idle ones closer to the head.
    SkipBusy,
}

impl fmt::Display for SweepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SweepPolicy::StopAtBusy => "stop-at-busy",
            SweepPolicy::SkipBusy => "skip-busy",
        })
    }
}

impl FromStr for SweepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop-at-busy" => Ok(SweepPolicy::StopAtBusy),
            "skip-busy" => Ok(SweepPolicy::SkipBusy),
            other => Err(format!(
                "unknown sweep policy `{other}` (expected `stop-at-busy` or `skip-busy`)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SweepPolicy;

    #[test]
    fn parses_its_own_display() {
        for policy in [SweepPolicy::StopAtBusy, SweepPolicy::SkipBusy] {
            assert_eq!(policy.to_string().parse::<SweepPolicy>(), Ok(policy));
        }
        assert!("lru".parse::<SweepPolicy>().is_err());
    }
}
