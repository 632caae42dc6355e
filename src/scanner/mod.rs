//! Multi-detector lock-step scanning
//!
//! A [`Scanner`] runs several detectors over one reader. Every detector keeps
//! its own position and at most one pending block. Each step picks the
//! detector that is furthest behind, so blocks are reported in non-decreasing
//! start order and the reader mostly moves forward:
//!
//! - key: start of the pending block, or the position when nothing is pending
//! - ties: a detector with nothing pending goes first (it may still find an
//!   earlier block), then registration order
//!
//! A detector with a pending block that is furthest behind emits it; any
//! bytes between the previous block and this one are reported as unknown
//! data. When overlap is disallowed, a new block that overlaps another
//! detector's pending block is resolved immediately: the shorter one is
//! discarded, and on equal length the block produced first is kept. A
//! pending block is then only emitted once every other running detector has
//! moved past its end, so a longer block starting inside it still gets to
//! compete.

mod completeness;
mod events;
mod file_scanner;
mod progress;
mod report;

pub use events::{EventLog, NullObserver, ScanEvent, ScanObserver};
pub use file_scanner::{FileScanCounts, FileScanOutcome, FileScanner};
pub use report::{FileScanReport, GapRecord};

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::cancel::CancelToken;
use crate::detector::{DetectorRef, ScanContext};
use crate::error::{CarveError, CarveResult};
use crate::model::{BlockBuilder, DataBlock};
use crate::reader::Reader;

use progress::ProgressBlend;

/// Summary of one scanner run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanOutcome {
    /// Stopped early; everything reported before stopping stands
    pub cancelled: bool,
    pub blocks: usize,
    pub discarded: usize,
    pub unknown_bytes: u64,
    /// Times a detector returned nothing without advancing
    pub forced_advances: u64,
    pub failed_detectors: Vec<String>,
    /// Some detector split its data into fragments
    pub fragmented: bool,
}

pub struct Scanner {
    detectors: Arc<[DetectorRef]>,
    allow_overlap: bool,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(detectors: Vec<DetectorRef>, allow_overlap: bool, cancel: CancelToken) -> Self {
        Self {
            detectors: Arc::from(detectors),
            allow_overlap,
            cancel,
        }
    }

    pub fn detectors(&self) -> &[DetectorRef] {
        &self.detectors
    }

    /// Scan `reader` from offset 0 to its end
    pub fn scan(
        &self,
        reader: &mut dyn Reader,
        observer: &mut dyn ScanObserver,
    ) -> CarveResult<ScanOutcome> {
        let length = reader.length();
        if length == 0 {
            return Ok(ScanOutcome::default());
        }
        let input_file = Arc::clone(reader.packet(0, length)?.input_file());

        let states = self
            .detectors
            .iter()
            .map(|detector| DetectorState {
                detector: detector.clone(),
                builder: BlockBuilder::new(detector.clone(), Arc::clone(&input_file)),
                context: ScanContext::new(Arc::clone(&self.detectors)),
                position: 0,
                pending: None,
                finished: false,
                next_fragment: 0,
            })
            .collect::<Vec<_>>();

        debug!(
            detectors = states.len(),
            length,
            allow_overlap = self.allow_overlap,
            "Starting scan"
        );

        let mut run = ScanRun {
            progress: ProgressBlend::new(states.len(), length),
            states,
            reader,
            observer,
            length,
            allow_overlap: self.allow_overlap,
            cancel: &self.cancel,
            unknown_start: 0,
            outcome: ScanOutcome::default(),
        };

        match run.run() {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => {
                info!(position = run.unknown_start, "Scan cancelled");
                run.outcome.cancelled = true;
            }
            Err(e) => return Err(e),
        }
        Ok(run.finish())
    }
}

struct DetectorState {
    detector: DetectorRef,
    builder: BlockBuilder,
    context: ScanContext,
    position: u64,
    pending: Option<DataBlock>,
    finished: bool,
    /// Fragment index the next block of this detector gets
    next_fragment: u32,
}

impl DetectorState {
    fn is_active(&self) -> bool {
        self.pending.is_some() || !self.finished
    }

    fn key(&self) -> (u64, bool) {
        match &self.pending {
            Some(block) => (block.start_offset(), true),
            None => (self.position, false),
        }
    }
}

struct ScanRun<'s, 'r, 'o> {
    states: Vec<DetectorState>,
    reader: &'r mut dyn Reader,
    observer: &'o mut dyn ScanObserver,
    length: u64,
    allow_overlap: bool,
    cancel: &'s CancelToken,
    /// End of the last reported block
    unknown_start: u64,
    progress: ProgressBlend,
    outcome: ScanOutcome,
}

impl ScanRun<'_, '_, '_> {
    fn run(&mut self) -> CarveResult<()> {
        loop {
            self.cancel.check()?;
            let Some(index) = self.select() else {
                break;
            };
            if self.states[index].pending.is_some() {
                self.emit(index)?;
            } else {
                self.detect(index)?;
            }
        }

        if self.unknown_start < self.length {
            self.report_gap(self.unknown_start, self.length - self.unknown_start)?;
            self.unknown_start = self.length;
        }
        Ok(())
    }

    fn select(&self) -> Option<usize> {
        let index = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_active())
            .min_by_key(|(index, state)| {
                let (offset, pending) = state.key();
                (offset, pending, *index)
            })
            .map(|(index, _)| index)?;

        if self.allow_overlap {
            return Some(index);
        }
        let Some(end) = self.states[index].pending.as_ref().map(DataBlock::end_offset) else {
            return Some(index);
        };
        // Detectors still inside the pending block run before it is emitted
        let lagging = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.pending.is_none() && !state.finished && state.position < end)
            .min_by_key(|(other, state)| (state.position, *other))
            .map(|(other, _)| other);
        Some(lagging.unwrap_or(index))
    }

    fn detect(&mut self, index: usize) -> CarveResult<()> {
        let state = &mut self.states[index];
        if state.position >= self.length {
            trace!(detector = state.detector.name(), "Detector reached end of input");
            state.finished = true;
            self.progress.finish(index);
            return Ok(());
        }

        self.reader.seek(state.position);
        let result =
            state
                .detector
                .detect_data(&mut *self.reader, &state.builder, &mut state.context);

        match result {
            Ok(Some(mut block)) => {
                if block.start_offset() < state.position {
                    let error = CarveError::Detector {
                        detector: state.detector.name().to_string(),
                        message: format!(
                            "block at {} starts before scan position {}",
                            block.start_offset(),
                            state.position
                        ),
                    };
                    return self.drop_detector(index, error);
                }

                state.position = block.end_offset();
                let fragment = block.fragment_mut();
                fragment.index = state.next_fragment;
                state.next_fragment = if fragment.continues {
                    state.next_fragment + 1
                } else {
                    0
                };
                if fragment.index > 0 || fragment.continues {
                    self.outcome.fragmented = true;
                }
                trace!(
                    detector = state.detector.name(),
                    start = block.start_offset(),
                    end = block.end_offset(),
                    "Block produced"
                );

                let position = state.position;
                if self.allow_overlap {
                    state.pending = Some(block);
                } else {
                    self.resolve_overlap(index, block)?;
                }
                self.report_progress(index, position);
            }
            Ok(None) => {
                let after = self.reader.position();
                if after <= state.position {
                    error!(
                        detector = state.detector.name(),
                        position = state.position,
                        "Detector did not advance, skipping one byte"
                    );
                    state.position += 1;
                    self.outcome.forced_advances += 1;
                } else {
                    state.position = after;
                }
                let position = state.position;
                self.report_progress(index, position);
            }
            Err(e) if e.skips_detector() => return self.drop_detector(index, e),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn resolve_overlap(&mut self, index: usize, block: DataBlock) -> CarveResult<()> {
        let competitors: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter(|(other, state)| {
                *other != index
                    && state
                        .pending
                        .as_ref()
                        .is_some_and(|pending| pending.overlaps(&block))
            })
            .map(|(other, _)| other)
            .collect();

        // Pending blocks were produced earlier, so they win ties
        let loses = competitors.iter().any(|&other| {
            self.states[other]
                .pending
                .as_ref()
                .is_some_and(|pending| pending.length() >= block.length())
        });
        if loses {
            debug!(
                detector = block.detector().name(),
                start = block.start_offset(),
                end = block.end_offset(),
                "Discarding overlapped block"
            );
            self.outcome.discarded += 1;
            return self.observer.block_discarded(&block);
        }

        for other in competitors {
            if let Some(pending) = self.states[other].pending.take() {
                debug!(
                    detector = pending.detector().name(),
                    start = pending.start_offset(),
                    end = pending.end_offset(),
                    "Discarding smaller overlapping block"
                );
                self.outcome.discarded += 1;
                self.observer.block_discarded(&pending)?;
            }
        }
        self.states[index].pending = Some(block);
        Ok(())
    }

    fn emit(&mut self, index: usize) -> CarveResult<()> {
        let Some(block) = self.states[index].pending.take() else {
            return Ok(());
        };
        let start = block.start_offset();
        let end = block.end_offset();

        if start > self.unknown_start {
            self.report_gap(self.unknown_start, start - self.unknown_start)?;
        }
        self.unknown_start = self.unknown_start.max(end);

        debug!(
            detector = block.detector().name(),
            format = %block.data_format(),
            start,
            end,
            "Block detected"
        );
        self.outcome.blocks += 1;
        self.observer.block_detected(block)
    }

    fn drop_detector(&mut self, index: usize, error: CarveError) -> CarveResult<()> {
        let state = &mut self.states[index];
        warn!(
            detector = state.detector.name(),
            position = state.position,
            "Detector failed, dropping it from the scan: {}",
            error
        );
        state.finished = true;
        self.outcome
            .failed_detectors
            .push(state.detector.name().to_string());
        self.observer.detector_failed(&state.detector, &error);
        self.progress.finish(index);
        let percent = self.progress.percent();
        self.observer.progress(percent);
        Ok(())
    }

    fn report_gap(&mut self, offset: u64, length: u64) -> CarveResult<()> {
        trace!(offset, length, "Unknown data");
        self.outcome.unknown_bytes += length;
        self.observer.unknown_data(offset, length)
    }

    fn report_progress(&mut self, index: usize, position: u64) {
        self.progress.update(index, position);
        let percent = self.progress.percent();
        self.observer.progress(percent);
    }

    fn finish(mut self) -> ScanOutcome {
        if self.states.iter().any(|state| state.context.is_fragmented()) {
            self.outcome.fragmented = true;
        }
        debug!(
            blocks = self.outcome.blocks,
            discarded = self.outcome.discarded,
            unknown_bytes = self.outcome.unknown_bytes,
            cancelled = self.outcome.cancelled,
            "Scan finished"
        );
        self.outcome
    }
}
