//! Stage identity and ordering.

use serde::{Deserialize, Serialize};

/// A named pipeline stage with an ordinal position.
///
/// Stages form a total order; a stage's input is the previous stage's
/// successful output. Discovery is not a stage - it seeds the first queue
/// and is run by the controller before any stage starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extraction,
    Categorization,
    Classification,
    Indexing,
}

impl StageName {
    /// All stages in pipeline order.
    pub const ALL: [StageName; 4] = [
        StageName::Extraction,
        StageName::Categorization,
        StageName::Classification,
        StageName::Indexing,
    ];

    /// Position in the pipeline, starting at 1.
    pub fn ordinal(&self) -> usize {
        match self {
            StageName::Extraction => 1,
            StageName::Categorization => 2,
            StageName::Classification => 3,
            StageName::Indexing => 4,
        }
    }

    /// The stage that consumes this stage's successful output.
    pub fn next(&self) -> Option<StageName> {
        match self {
            StageName::Extraction => Some(StageName::Categorization),
            StageName::Categorization => Some(StageName::Classification),
            StageName::Classification => Some(StageName::Indexing),
            StageName::Indexing => None,
        }
    }

    /// Stable name used in store keys and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Extraction => "extraction",
            StageName::Categorization => "categorization",
            StageName::Classification => "classification",
            StageName::Indexing => "indexing",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_totally_ordered() {
        let ordinals: Vec<usize> = StageName::ALL.iter().map(|s| s.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn next_follows_pipeline_order() {
        assert_eq!(StageName::Extraction.next(), Some(StageName::Categorization));
        assert_eq!(StageName::Indexing.next(), None);
    }
}
