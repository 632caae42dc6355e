// Codec stream completeness probing
//
// A codec stream reported by a container detector is re-scanned on its own
// with each codec detector in turn: detectors declaring the stream's format
// first, then the rest, in registration order. The first detector whose
// scan finishes uncancelled, finds at least one block, does not fragment the
// data and leaves at most `completeness_threshold` unknown bytes is accepted.
// Only the first `max_inspect_bytes` of a stream are probed.

use tracing::{debug, trace};

use crate::common::ReaderPool;
use crate::config::CarveConfig;
use crate::detector::DetectorRef;
use crate::error::{CarveError, CarveResult};
use crate::model::{CodecStream, DataBlock, Fragment, StreamVerdict};
use crate::reader::FragmentedReader;

use super::{ScanObserver, Scanner};

/// Counts what a single-detector probe scan found
#[derive(Default)]
struct ProbeTally {
    blocks: usize,
}

impl ScanObserver for ProbeTally {
    fn block_detected(&mut self, _block: DataBlock) -> CarveResult<()> {
        self.blocks += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ProbeResult {
    pub verdict: StreamVerdict,
    pub detector: Option<DetectorRef>,
}

pub(crate) struct StreamProbe<'a> {
    pub codecs: &'a [DetectorRef],
    pub config: &'a CarveConfig,
    pub pool: &'a ReaderPool,
}

impl StreamProbe<'_> {
    /// Codec detectors in probing order for `stream`
    fn candidates(&self, stream: &CodecStream) -> Vec<DetectorRef> {
        let format = stream.data_format();
        let (mut matching, rest): (Vec<_>, Vec<_>) = self
            .codecs
            .iter()
            .cloned()
            .partition(|detector| detector.supports(format));
        matching.extend(rest);
        matching
    }

    pub fn probe(&self, stream: &CodecStream) -> CarveResult<ProbeResult> {
        let inspect = stream.length().min(self.config.max_inspect_bytes);
        let packet = stream.packet().sub_packet(0, inspect)?;
        let threshold = self.config.completeness_threshold(inspect);
        let cancel = self.pool.cancel_token();

        let mut partial: Option<DetectorRef> = None;
        for detector in self.candidates(stream) {
            let scanner = Scanner::new(
                vec![detector.clone()],
                self.config.allow_codec_overlap,
                cancel.clone(),
            );
            let mut reader = FragmentedReader::new(self.pool.clone(), packet.clone());
            let mut tally = ProbeTally::default();
            let outcome = scanner.scan(&mut reader, &mut tally)?;
            if outcome.cancelled {
                return Err(CarveError::Cancelled);
            }

            trace!(
                stream = stream.stream_number(),
                detector = detector.name(),
                blocks = tally.blocks,
                unknown = outcome.unknown_bytes,
                threshold,
                fragmented = outcome.fragmented,
                "Probed codec stream"
            );

            if tally.blocks == 0 {
                continue;
            }
            if !outcome.fragmented && outcome.unknown_bytes <= threshold {
                debug!(
                    stream = stream.stream_number(),
                    detector = detector.name(),
                    "Codec stream complete"
                );
                return Ok(ProbeResult {
                    verdict: StreamVerdict::Complete,
                    detector: Some(detector),
                });
            }
            if partial.is_none() {
                partial = Some(detector);
            }
        }

        Ok(match partial {
            Some(detector) => ProbeResult {
                verdict: StreamVerdict::Partial,
                detector: Some(detector),
            },
            None => ProbeResult {
                verdict: StreamVerdict::Unknown,
                detector: None,
            },
        })
    }
}
