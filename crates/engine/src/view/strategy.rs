//! Relation match strategies.
//!
//! The strategy is fixed per relation at configuration time and gates
//! the fetch protocol:
//! - `ReadAll`: child fetched concurrently with its parent, merged
//!   afterward by join key.
//! - `ReadMatched`: parent finishes first; the child query is filtered
//!   with an `IN` list built from the parent's distinct join keys.
//! - `ReadDerived`: like `ReadMatched`, and the child additionally
//!   inherits the parent's active selector criteria, ordering, and
//!   limit. Parent and child must share one row source.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Fetch-ordering policy for one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ReadAll,
    #[default]
    ReadMatched,
    ReadDerived,
}

impl MatchStrategy {
    /// True only for `ReadAll`; every other strategy forces the child
    /// fetch to wait for the parent's completion signal.
    pub fn supports_parallel(self) -> bool {
        matches!(self, MatchStrategy::ReadAll)
    }

    /// Whether the child inherits the parent's selector state.
    pub fn inherits_selector(self) -> bool {
        matches!(self, MatchStrategy::ReadDerived)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::ReadAll => "read_all",
            MatchStrategy::ReadMatched => "read_matched",
            MatchStrategy::ReadDerived => "read_derived",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MatchStrategy {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "read_all" => Ok(MatchStrategy::ReadAll),
            "read_matched" => Ok(MatchStrategy::ReadMatched),
            "read_derived" => Ok(MatchStrategy::ReadDerived),
            other => Err(EngineError::UnsupportedStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn only_read_all_is_parallel() {
        assert!(MatchStrategy::ReadAll.supports_parallel());
        assert!(!MatchStrategy::ReadMatched.supports_parallel());
        assert!(!MatchStrategy::ReadDerived.supports_parallel());
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        let err = MatchStrategy::try_from("read_sideways");
        assert!(matches!(err, Err(EngineError::UnsupportedStrategy(_))));
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&MatchStrategy::ReadDerived).unwrap();
        assert_eq!(json, "\"read_derived\"");
        let parsed: MatchStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, MatchStrategy::ReadDerived);
    }

    #[test]
    fn only_read_derived_inherits_selector() {
        assert!(MatchStrategy::ReadDerived.inherits_selector());
        assert!(!MatchStrategy::ReadAll.inherits_selector());
    }
}
