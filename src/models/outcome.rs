use serde::{Deserialize, Serialize};

/// What the classifier concluded about one frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Judgment {
    Engaged,
    NotEngaged,
}

/// Result of one sampling cycle as seen by the aggregator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Engaged,
    NotEngaged,
    /// Capture failed, classification failed, or the cycle timed out.
    ClassificationFailure,
}

impl Outcome {
    pub fn is_engaged(self) -> bool {
        matches!(self, Outcome::Engaged)
    }
}

impl From<Judgment> for Outcome {
    fn from(judgment: Judgment) -> Self {
        match judgment {
            Judgment::Engaged => Outcome::Engaged,
            Judgment::NotEngaged => Outcome::NotEngaged,
        }
    }
}

/// An outcome stamped with the session generation whose tick produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedOutcome {
    pub generation: u64,
    /// 1-based index of the tick that dispatched the cycle.
    pub tick: u64,
    pub outcome: Outcome,
}
