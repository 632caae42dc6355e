//! Two-phase file scanning
//!
//! Phase one runs every container detector over the whole input. Each
//! container block's codec streams are probed for completeness as the block
//! is reported. Phase two runs the codec detectors over each gap the
//! container phase leaves, as soon as the gap is known; codec blocks and
//! the remaining gaps are shifted back to absolute offsets before they reach
//! the caller. Every result is registered in a `FragmentArena`, and pieces
//! of one stream are chained into a shared container.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::cancel::CancelToken;
use crate::common::ReaderPool;
use crate::config::CarveConfig;
use crate::detector::{DetectorRef, DetectorRegistry};
use crate::error::{CarveError, CarveResult};
use crate::model::{DataBlock, FragmentArena, FragmentId, StreamVerdict};
use crate::packet::{DataPacket, InputFile};
use crate::reader::FragmentedReader;

use super::completeness::StreamProbe;
use super::{EventLog, FileScanReport, ScanObserver, ScanOutcome, Scanner};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileScanCounts {
    pub container_blocks: usize,
    pub codec_blocks: usize,
    pub codec_streams: usize,
    pub complete_streams: usize,
    pub partial_streams: usize,
    pub unknown_streams: usize,
    pub discarded: usize,
    /// Bytes no detector of either phase claimed
    pub unknown_bytes: u64,
    pub failed_detectors: Vec<String>,
}

impl FileScanCounts {
    fn merge(&mut self, outcome: &ScanOutcome) {
        self.discarded += outcome.discarded;
        for name in &outcome.failed_detectors {
            if !self.failed_detectors.contains(name) {
                self.failed_detectors.push(name.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileScanOutcome {
    pub cancelled: bool,
    pub counts: FileScanCounts,
    pub fragments: FragmentArena,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Last fragment of a detector's series, with its streams by number
struct ChainTail {
    id: FragmentId,
    streams: HashMap<u32, FragmentId>,
}

/// State shared by both phases
struct PhaseState<'o> {
    observer: &'o mut dyn ScanObserver,
    fragments: FragmentArena,
    chains: HashMap<String, ChainTail>,
    counts: FileScanCounts,
}

impl PhaseState<'_> {
    /// Register `block` and its streams, chaining onto the previous fragment
    /// of the same detector when the block continues a series
    fn link(&mut self, block: &mut DataBlock) -> CarveResult<()> {
        let name = block.detector().name().to_string();
        let index = block.fragment().index;
        let continues = block.fragment().continues;
        let previous = self.chains.remove(&name).filter(|_| index > 0);

        let id = self.fragments.register(block.length());
        block.fragment_mut().id = Some(id);
        if let Some(tail) = &previous {
            self.fragments.chain(tail.id, id)?;
            debug!(detector = %name, index, "Chained block fragment");
        }

        let mut streams = HashMap::new();
        for stream in block.codec_streams_mut() {
            let stream_id = self.fragments.register(stream.length());
            let number = stream.stream_number();
            let fragment = stream.fragment_mut();
            fragment.id = Some(stream_id);
            fragment.continues = continues;

            let previous_stream = previous.as_ref().and_then(|tail| tail.streams.get(&number));
            if let Some(&previous_id) = previous_stream {
                fragment.index = index;
                self.fragments.chain(previous_id, stream_id)?;
            }
            streams.insert(number, stream_id);
        }

        self.chains.insert(name, ChainTail { id, streams });
        Ok(())
    }
}

/// Observer for the container phase
struct ContainerPhase<'a, 'o> {
    state: PhaseState<'o>,
    probe: StreamProbe<'a>,
    codec_scanner: Scanner,
    whole: DataPacket,
}

impl ScanObserver for ContainerPhase<'_, '_> {
    fn block_detected(&mut self, mut block: DataBlock) -> CarveResult<()> {
        let mut accepted: Vec<DetectorRef> = Vec::new();
        for stream in block.codec_streams_mut() {
            let result = self.probe.probe(stream)?;
            let counts = &mut self.state.counts;
            counts.codec_streams += 1;
            match result.verdict {
                StreamVerdict::Complete => counts.complete_streams += 1,
                StreamVerdict::Partial => counts.partial_streams += 1,
                StreamVerdict::Unknown | StreamVerdict::Unchecked => counts.unknown_streams += 1,
            }
            if result.verdict == StreamVerdict::Complete {
                if let Some(detector) = &result.detector {
                    accepted.push(detector.clone());
                }
            }
            stream.set_verdict(result.verdict, result.detector);
        }
        for detector in accepted {
            block.add_detector(detector);
        }

        self.state.link(&mut block)?;
        self.state.counts.container_blocks += 1;
        self.state.observer.block_detected(block)
    }

    fn block_discarded(&mut self, block: &DataBlock) -> CarveResult<()> {
        self.state.observer.block_discarded(block)
    }

    fn unknown_data(&mut self, offset: u64, length: u64) -> CarveResult<()> {
        if self.codec_scanner.detectors().is_empty() {
            self.state.counts.unknown_bytes += length;
            return self.state.observer.unknown_data(offset, length);
        }

        trace!(offset, length, "Scanning gap for codec data");
        let gap = self.whole.sub_packet(offset, length)?;
        let mut reader = FragmentedReader::new(self.probe.pool.clone(), gap);
        let mut relay = CodecPhase {
            base: offset,
            state: &mut self.state,
        };
        let outcome = self.codec_scanner.scan(&mut reader, &mut relay)?;
        self.state.counts.merge(&outcome);
        if outcome.cancelled {
            return Err(CarveError::Cancelled);
        }
        Ok(())
    }

    fn detector_failed(&mut self, detector: &DetectorRef, error: &CarveError) {
        self.state.observer.detector_failed(detector, error)
    }

    fn progress(&mut self, percent: f64) {
        self.state.observer.progress(percent)
    }
}

/// Observer for a codec scan over one gap; shifts results by `base`
struct CodecPhase<'p, 'o> {
    base: u64,
    state: &'p mut PhaseState<'o>,
}

impl ScanObserver for CodecPhase<'_, '_> {
    fn block_detected(&mut self, block: DataBlock) -> CarveResult<()> {
        let mut block = block.relocated(self.base);
        self.state.link(&mut block)?;
        self.state.counts.codec_blocks += 1;
        self.state.observer.block_detected(block)
    }

    fn block_discarded(&mut self, block: &DataBlock) -> CarveResult<()> {
        let block = block.clone().relocated(self.base);
        self.state.observer.block_discarded(&block)
    }

    fn unknown_data(&mut self, offset: u64, length: u64) -> CarveResult<()> {
        self.state.counts.unknown_bytes += length;
        self.state.observer.unknown_data(self.base + offset, length)
    }

    fn detector_failed(&mut self, detector: &DetectorRef, error: &CarveError) {
        self.state.observer.detector_failed(detector, error)
    }
}

/// Scans whole inputs with the registered container and codec detectors
pub struct FileScanner {
    registry: DetectorRegistry,
    config: CarveConfig,
    cancel: CancelToken,
}

impl FileScanner {
    pub fn new(registry: DetectorRegistry, config: CarveConfig) -> CarveResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Use `cancel` instead of the scanner's own token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &CarveConfig {
        &self.config
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Scan `input`, reporting blocks and gaps to `observer` in offset order
    pub fn scan(
        &self,
        input: &Arc<InputFile>,
        observer: &mut dyn ScanObserver,
    ) -> CarveResult<FileScanOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!(input = input.name(), length = input.length(), "Scanning input");

        let mut state = PhaseState {
            observer,
            fragments: FragmentArena::new(),
            chains: HashMap::new(),
            counts: FileScanCounts::default(),
        };
        let mut cancelled = false;

        if input.length() > 0 {
            let pool = ReaderPool::new(&self.config, self.cancel.clone());
            let codecs = self.registry.codecs();
            let whole = input.packet()?;
            let mut phase = ContainerPhase {
                state,
                probe: StreamProbe {
                    codecs: &codecs,
                    config: &self.config,
                    pool: &pool,
                },
                codec_scanner: Scanner::new(
                    codecs.clone(),
                    self.config.allow_codec_overlap,
                    self.cancel.clone(),
                ),
                whole: whole.clone(),
            };

            let scanner = Scanner::new(
                self.registry.containers(),
                self.config.allow_container_overlap,
                self.cancel.clone(),
            );
            let mut reader = FragmentedReader::new(pool.clone(), whole);
            let result = scanner.scan(&mut reader, &mut phase);
            pool.release();

            let outcome = result?;
            state = phase.state;
            state.counts.merge(&outcome);
            cancelled = outcome.cancelled;
        }

        let elapsed = timer.elapsed();
        info!(
            input = input.name(),
            containers = state.counts.container_blocks,
            codecs = state.counts.codec_blocks,
            unknown_bytes = state.counts.unknown_bytes,
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scan complete"
        );

        Ok(FileScanOutcome {
            cancelled,
            counts: state.counts,
            fragments: state.fragments,
            started_at,
            elapsed,
        })
    }

    /// Scan `input` and collect every event into a report
    pub fn scan_to_report(&self, input: &Arc<InputFile>) -> CarveResult<FileScanReport> {
        let mut log = EventLog::new();
        let outcome = self.scan(input, &mut log)?;
        Ok(FileScanReport::new(input, outcome, log))
    }

    /// Open and scan a file on disk
    pub fn scan_file(&self, path: impl AsRef<Path>) -> CarveResult<FileScanReport> {
        let input = InputFile::open(path)?;
        self.scan_to_report(&input)
    }

    /// Scan independent inputs in parallel, one reader pool per input
    pub fn scan_batch(&self, inputs: &[Arc<InputFile>]) -> Vec<CarveResult<FileScanReport>> {
        info!(inputs = inputs.len(), "Starting batch scan");
        inputs
            .par_iter()
            .map(|input| self.scan_to_report(input))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataFormat, Fragment};
    use crate::scanner::GapRecord;
    use crate::test_support::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MB: usize = 1024 * 1024;

    fn config() -> CarveConfig {
        CarveConfig {
            buffer_size: 4096,
            ..CarveConfig::default()
        }
    }

    fn assert_tiles(report: &FileScanReport) {
        let mut spans: Vec<(u64, u64)> = report
            .blocks
            .iter()
            .map(|b| (b.start_offset(), b.length()))
            .chain(report.gaps.iter().map(|g| (g.offset, g.length)))
            .collect();
        spans.sort();
        let mut covered = 0;
        for (offset, length) in spans {
            assert_eq!(offset, covered, "hole or overlap at {}", covered);
            covered += length;
        }
        assert_eq!(covered, report.input_length);
        assert_eq!(report.covered_bytes(), report.input_length);
    }

    #[test]
    fn test_ten_megabyte_scenario() {
        let mut rng = Lcg::new(99);
        let mut data = rng.noise(3 * MB);
        data.extend(carv_block(2 * MB - 8, 7));
        data.extend(rng.noise(MB));
        data.extend(carv_block(2 * MB - 8, 7));
        data.extend(rng.noise(2 * MB));
        let input = InputFile::from_bytes("ten-mb", data);

        let mut registry = DetectorRegistry::new();
        registry.register(MagicDetector::new("carv")).unwrap();
        let scanner = FileScanner::new(registry, CarveConfig::default()).unwrap();
        let report = scanner.scan_to_report(&input).unwrap();

        let mb = MB as u64;
        let blocks: Vec<(u64, u64)> = report
            .blocks
            .iter()
            .map(|b| (b.start_offset(), b.end_offset()))
            .collect();
        assert_eq!(blocks, vec![(3 * mb, 5 * mb), (6 * mb, 8 * mb)]);
        assert_eq!(
            report.gaps,
            vec![
                GapRecord { offset: 0, length: 3 * mb },
                GapRecord { offset: 5 * mb, length: mb },
                GapRecord { offset: 8 * mb, length: 2 * mb },
            ]
        );
        assert_tiles(&report);
        assert_eq!(report.counts.container_blocks, 2);
        assert_eq!(report.counts.unknown_bytes, 6 * mb);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_two_phase_scan() {
        let mut rng = Lcg::new(7);
        let mut data = rng.noise(500);
        let box_start = data.len() as u64;
        data.extend(boxs(&[(1, frames(20, 30)), (2, rng.noise(3000))]));
        let box_end = data.len() as u64;
        data.extend(rng.noise(700));
        let frames_start = data.len() as u64;
        data.extend(frames(6, 10));
        let frames_end = data.len() as u64;
        data.extend(rng.noise(300));
        let input = InputFile::from_bytes("two-phase", data);

        let mut registry = DetectorRegistry::new();
        registry.register(BoxDetector::new()).unwrap();
        registry.register(FrameDetector::new("frame")).unwrap();
        let scanner = FileScanner::new(registry, config()).unwrap();
        let report = scanner.scan_to_report(&input).unwrap();

        assert_eq!(report.blocks.len(), 2);
        let container = &report.blocks[0];
        assert_eq!((container.start_offset(), container.end_offset()), (box_start, box_end));
        let names: Vec<_> = container.detectors().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["boxs", "frame"]);

        let video = container.codec_stream(1).unwrap();
        assert_eq!(video.verdict(), StreamVerdict::Complete);
        assert_eq!(video.codec_detector().unwrap().name(), "frame");
        let opaque = container.codec_stream(2).unwrap();
        assert_eq!(opaque.verdict(), StreamVerdict::Unknown);
        assert_eq!(opaque.data_format(), &DataFormat::UNKNOWN);

        let codec = &report.blocks[1];
        assert_eq!(codec.detector().name(), "frame");
        assert_eq!((codec.start_offset(), codec.end_offset()), (frames_start, frames_end));
        assert_eq!(codec.packet().start_offset(), frames_start);

        assert_eq!(report.counts.container_blocks, 1);
        assert_eq!(report.counts.codec_blocks, 1);
        assert_eq!(report.counts.complete_streams, 1);
        assert_eq!(report.counts.unknown_streams, 1);
        assert_tiles(&report);
    }

    #[test]
    fn test_fragments_are_chained() {
        let mut data = boxs_continued(&[(1, frames(3, 8)), (2, frames(2, 8))]);
        data.extend(vec![0u8; 64]);
        data.extend(boxs(&[(1, frames(4, 8)), (3, frames(1, 8))]));
        let input = InputFile::from_bytes("fragments", data);

        let mut registry = DetectorRegistry::new();
        registry.register(BoxDetector::new()).unwrap();
        let scanner = FileScanner::new(registry, config()).unwrap();
        let report = scanner.scan_to_report(&input).unwrap();

        assert_eq!(report.blocks.len(), 2);
        let (first, second) = (&report.blocks[0], &report.blocks[1]);
        assert_eq!(second.fragment().index, 1);

        let arena = &report.fragments;
        let series = arena.container_of(first.fragment().id.unwrap()).unwrap();
        assert_eq!(series.fragments(), &[first.fragment().id.unwrap(), second.fragment().id.unwrap()]);
        assert_eq!(series.total_length(), first.length() + second.length());

        // Stream 1 continues across both blocks; streams 2 and 3 stand alone
        let stream_series = arena
            .container_of(second.codec_stream(1).unwrap().fragment().id.unwrap())
            .unwrap();
        assert_eq!(stream_series.fragments().len(), 2);
        assert_eq!(stream_series.total_length(), 3 * 12 + 4 * 12);
        assert!(arena
            .container_of(first.codec_stream(2).unwrap().fragment().id.unwrap())
            .is_none());
        assert!(arena
            .container_of(second.codec_stream(3).unwrap().fragment().id.unwrap())
            .is_none());
        assert_eq!(arena.containers().len(), 2);
    }

    #[test]
    fn test_codec_fragments_in_gap_are_chained() {
        let mut data = vec![0u8; 40];
        data.extend(frames(5, 6));
        let input = InputFile::from_bytes("codec-fragments", data);

        let mut registry = DetectorRegistry::new();
        registry.register(FrameDetector::new("frame").with_max_frames(2)).unwrap();
        let scanner = FileScanner::new(registry, config()).unwrap();
        let report = scanner.scan_to_report(&input).unwrap();

        let offsets: Vec<_> = report.blocks.iter().map(|b| b.start_offset()).collect();
        assert_eq!(offsets, vec![40, 60, 80]);
        assert_eq!(report.fragments.containers().len(), 1);
        assert_eq!(report.fragments.containers()[0].total_length(), 50);
        assert_eq!(report.gaps, vec![GapRecord { offset: 0, length: 40 }]);
    }

    #[test]
    fn test_cancelled_scan() {
        let input = InputFile::from_bytes("cancel", vec![0u8; 4096]);
        let token = CancelToken::new();
        let mut registry = DetectorRegistry::new();
        registry
            .register(CancellingDetector::new(token.clone(), 2))
            .unwrap();
        let scanner = FileScanner::new(registry, config())
            .unwrap()
            .with_cancel(token);

        let report = scanner.scan_to_report(&input).unwrap();
        assert!(report.cancelled);
        assert!(report.blocks.is_empty());
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn test_batch_and_file_scans() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("image.dd");
        let mut file = std::fs::File::create(&path).unwrap();
        let mut data = vec![0u8; 100];
        data.extend(carv_block(50, 1));
        file.write_all(&data).unwrap();
        drop(file);

        let mut registry = DetectorRegistry::new();
        registry.register(MagicDetector::new("carv")).unwrap();
        let scanner = FileScanner::new(registry, config()).unwrap();

        let from_disk = scanner.scan_file(&path).unwrap();
        assert_eq!(from_disk.blocks.len(), 1);
        assert_eq!(from_disk.blocks[0].start_offset(), 100);

        let inputs = vec![
            InputFile::open(&path).unwrap(),
            InputFile::from_bytes("empty", Vec::<u8>::new()),
            InputFile::from_bytes("mem", carv_block(10, 2)),
        ];
        let reports = scanner.scan_batch(&inputs);
        assert_eq!(reports.len(), 3);
        let counts: Vec<usize> = reports
            .iter()
            .map(|r| r.as_ref().unwrap().blocks.len())
            .collect();
        assert_eq!(counts, vec![1, 0, 1]);

        let json = from_disk.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["blocks"][0]["detectors"][0], "carv");
        assert_eq!(value["gaps"][0]["length"], 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CarveConfig {
            buffer_size: 4,
            ..CarveConfig::default()
        };
        assert!(matches!(
            FileScanner::new(DetectorRegistry::new(), config),
            Err(CarveError::Config(_))
        ));
    }
}
