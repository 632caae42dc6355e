// Serializable summary of a file scan

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{CarveError, CarveResult};
use crate::model::{DataBlock, FragmentArena};
use crate::packet::InputFile;

use super::{EventLog, FileScanCounts, FileScanOutcome, ScanEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapRecord {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileScanReport {
    pub input: String,
    pub input_length: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub counts: FileScanCounts,
    /// Accepted blocks in report order
    pub blocks: Vec<DataBlock>,
    pub gaps: Vec<GapRecord>,
    pub discarded: Vec<DataBlock>,
    pub fragments: FragmentArena,
}

impl FileScanReport {
    pub(crate) fn new(input: &InputFile, outcome: FileScanOutcome, log: EventLog) -> Self {
        let mut blocks = Vec::new();
        let mut gaps = Vec::new();
        let mut discarded = Vec::new();
        for event in log.into_events() {
            match event {
                ScanEvent::BlockDetected { block } => blocks.push(block),
                ScanEvent::BlockDiscarded { block } => discarded.push(block),
                ScanEvent::UnknownData { offset, length } => gaps.push(GapRecord { offset, length }),
                ScanEvent::DetectorFailed { .. } => {}
            }
        }

        Self {
            input: input.name().to_string(),
            input_length: input.length(),
            started_at: outcome.started_at,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            cancelled: outcome.cancelled,
            counts: outcome.counts,
            blocks,
            gaps,
            discarded,
            fragments: outcome.fragments,
        }
    }

    /// Total bytes claimed by blocks plus reported gaps
    pub fn covered_bytes(&self) -> u64 {
        self.blocks.iter().map(DataBlock::length).sum::<u64>()
            + self.gaps.iter().map(|gap| gap.length).sum::<u64>()
    }

    pub fn to_json(&self) -> CarveResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CarveError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CarveResult<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, &json).map_err(|e| CarveError::io(path, e))?;
        info!("Scan report saved: {:?} ({} bytes)", path, json.len());
        Ok(())
    }
}
