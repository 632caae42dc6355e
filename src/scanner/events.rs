//! Scan events and the observer interface
//!
//! Scanners report results through a [`ScanObserver`] passed into the scan
//! call. Returning an error from a callback aborts the scan; returning
//! `CarveError::Cancelled` ends it as cancelled.

use serde::Serialize;

use crate::detector::DetectorRef;
use crate::error::{CarveError, CarveResult};
use crate::model::DataBlock;

pub trait ScanObserver {
    /// A block was accepted; blocks arrive in non-decreasing start order
    fn block_detected(&mut self, _block: DataBlock) -> CarveResult<()> {
        Ok(())
    }

    /// A block lost overlap resolution; anything derived from it is stale
    fn block_discarded(&mut self, _block: &DataBlock) -> CarveResult<()> {
        Ok(())
    }

    /// No detector claimed `[offset, offset + length)`
    fn unknown_data(&mut self, _offset: u64, _length: u64) -> CarveResult<()> {
        Ok(())
    }

    /// A detector failed and was dropped from the scan
    fn detector_failed(&mut self, _detector: &DetectorRef, _error: &CarveError) {}

    /// Blended completion, 0.0 to 100.0
    fn progress(&mut self, _percent: f64) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl ScanObserver for NullObserver {}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    BlockDetected { block: DataBlock },
    BlockDiscarded { block: DataBlock },
    UnknownData { offset: u64, length: u64 },
    DetectorFailed { detector: String, message: String },
}

/// Records every event in order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<ScanEvent>,
    last_progress: f64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ScanEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ScanEvent> {
        self.events
    }

    pub fn blocks(&self) -> impl Iterator<Item = &DataBlock> {
        self.events.iter().filter_map(|event| match event {
            ScanEvent::BlockDetected { block } => Some(block),
            _ => None,
        })
    }

    pub fn discarded(&self) -> impl Iterator<Item = &DataBlock> {
        self.events.iter().filter_map(|event| match event {
            ScanEvent::BlockDiscarded { block } => Some(block),
            _ => None,
        })
    }

    /// `(offset, length)` of every unknown-data event
    pub fn gaps(&self) -> Vec<(u64, u64)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::UnknownData { offset, length } => Some((*offset, *length)),
                _ => None,
            })
            .collect()
    }

    pub fn last_progress(&self) -> f64 {
        self.last_progress
    }
}

impl ScanObserver for EventLog {
    fn block_detected(&mut self, block: DataBlock) -> CarveResult<()> {
        self.events.push(ScanEvent::BlockDetected { block });
        Ok(())
    }

    fn block_discarded(&mut self, block: &DataBlock) -> CarveResult<()> {
        self.events.push(ScanEvent::BlockDiscarded {
            block: block.clone(),
        });
        Ok(())
    }

    fn unknown_data(&mut self, offset: u64, length: u64) -> CarveResult<()> {
        self.events.push(ScanEvent::UnknownData { offset, length });
        Ok(())
    }

    fn detector_failed(&mut self, detector: &DetectorRef, error: &CarveError) {
        self.events.push(ScanEvent::DetectorFailed {
            detector: detector.name().to_string(),
            message: error.to_string(),
        });
    }

    fn progress(&mut self, percent: f64) {
        self.last_progress = percent;
    }
}
