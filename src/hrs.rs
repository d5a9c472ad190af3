//! Height/round/step identification of consensus signing requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Consensus step within a (height, round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum Step {
    Prevote = 1,
    Precommit = 2,
    Proposal = 3,
}

impl Step {
    /// Parse the wire representation. Any value outside 1..=3 is invalid.
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            1 => Some(Step::Prevote),
            2 => Some(Step::Precommit),
            3 => Some(Step::Proposal),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Prevote => write!(f, "prevote"),
            Step::Precommit => write!(f, "precommit"),
            Step::Proposal => write!(f, "proposal"),
        }
    }
}

/// Identifies one signing slot of the consensus engine.
///
/// The derived ordering is lexicographic over (height, round, step),
/// which is the order the watermark advances in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HrsKey {
    pub height: i64,
    pub round: i64,
    pub step: i8,
}

impl HrsKey {
    pub fn new(height: i64, round: i64, step: Step) -> Self {
        Self {
            height,
            round,
            step: step as i8,
        }
    }
}

impl fmt::Display for HrsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.height, self.round, self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        let base = HrsKey::new(10, 1, Step::Precommit);

        assert!(HrsKey::new(9, 9, Step::Proposal) < base);
        assert!(HrsKey::new(10, 0, Step::Proposal) < base);
        assert!(HrsKey::new(10, 1, Step::Prevote) < base);
        assert_eq!(HrsKey::new(10, 1, Step::Precommit), base);
        assert!(HrsKey::new(10, 1, Step::Proposal) > base);
        assert!(HrsKey::new(10, 2, Step::Prevote) > base);
        assert!(HrsKey::new(11, 0, Step::Prevote) > base);
    }

    #[test]
    fn test_step_parsing() {
        assert_eq!(Step::from_i8(1), Some(Step::Prevote));
        assert_eq!(Step::from_i8(2), Some(Step::Precommit));
        assert_eq!(Step::from_i8(3), Some(Step::Proposal));
        assert_eq!(Step::from_i8(0), None);
        assert_eq!(Step::from_i8(4), None);
        assert_eq!(Step::from_i8(-1), None);
    }
}
