//! Chunk-count driven progress estimation.
//!
//! Progress is feedback only: it never influences the extracted document.

use serde::{Deserialize, Serialize};

/// Generation phase shown to the user while an artifact is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Analyzing,
    Planning,
    Building,
    Styling,
    Finalizing,
}

impl Phase {
    #[must_use]
    pub fn status_message(self) -> &'static str {
        match self {
            Phase::Analyzing => "Analyzing your request...",
            Phase::Planning => "Planning the page structure...",
            Phase::Building => "Building components...",
            Phase::Styling => "Applying styles...",
            Phase::Finalizing => "Finalizing the page...",
        }
    }
}

/// One row of the threshold table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub threshold: u64,
    pub phase: Phase,
    pub percent: u8,
}

impl ProgressStep {
    #[must_use]
    pub const fn new(threshold: u64, phase: Phase, percent: u8) -> Self {
        Self {
            threshold,
            phase,
            percent,
        }
    }
}

pub const DEFAULT_PROGRESS_TABLE: [ProgressStep; 5] = [
    ProgressStep::new(0, Phase::Analyzing, 5),
    ProgressStep::new(5, Phase::Planning, 15),
    ProgressStep::new(20, Phase::Building, 30),
    ProgressStep::new(150, Phase::Styling, 65),
    ProgressStep::new(400, Phase::Finalizing, 90),
];

/// Maps a monotonically increasing delta counter onto the threshold table.
///
/// The table must be ascending by threshold and start at 0; config
/// validation enforces both.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    table: Vec<ProgressStep>,
    chunk_count: u64,
}

impl ProgressEstimator {
    #[must_use]
    pub fn new(table: Vec<ProgressStep>) -> Self {
        let table = if table.is_empty() {
            DEFAULT_PROGRESS_TABLE.to_vec()
        } else {
            table
        };
        Self {
            table,
            chunk_count: 0,
        }
    }

    /// Record one delta and return the step now in effect.
    pub fn advance(&mut self) -> ProgressStep {
        self.chunk_count += 1;
        self.estimate(self.chunk_count)
    }

    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Greatest-threshold entry not exceeding `chunk_count`.
    #[must_use]
    pub fn estimate(&self, chunk_count: u64) -> ProgressStep {
        let idx = self
            .table
            .partition_point(|step| step.threshold <= chunk_count);
        self.table[idx.saturating_sub(1)]
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_TABLE.to_vec())
    }
}
