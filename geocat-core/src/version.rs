//! Table version identifiers.
//!
//! Versions are ULIDs drawn from a process-wide monotonic generator, so ids
//! created later in the same process always sort after earlier ones, even
//! within the same millisecond.

use crate::error::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use ulid::{Generator, Ulid};

static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Ulid);

impl VersionId {
    pub fn generate() -> Self {
        let mut gen = GENERATOR.get_or_init(|| Mutex::new(Generator::new())).lock();
        // Overflow only happens after 2^80 ids in one millisecond.
        Self(gen.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Creation time in milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidVersion(format!("{s}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_ordered() {
        let ids: Vec<VersionId> = (0..100).map(|_| VersionId::generate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parse_round_trip() {
        let id = VersionId::generate();
        let parsed: VersionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<VersionId>().is_err());
    }
}
