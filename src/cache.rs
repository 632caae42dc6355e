//! Memoized rescanning of detection results
//!
//! Result trees and codec stream extents are rebuilt by running the owning
//! detector again over a fragment's bytes. Both are cached in a byte-budgeted
//! LRU shared between threads. A lookup never holds the lock while a
//! detector runs: concurrent misses on one key each rescan and the last
//! insert wins, which is harmless because a rescan depends only on the
//! fragment's bytes and the detector.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::common::ReaderPool;
use crate::config::CarveConfig;
use crate::detector::{DetectorRef, ScanContext};
use crate::error::{CarveError, CarveResult};
use crate::logging;
use crate::model::{BlockBuilder, CodecStream, DataBlock, Fragment, ResultNode};
use crate::packet::DataPacket;
use crate::reader::FragmentedReader;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    /// Result tree of a fragment as parsed by the named detector
    Results(DataPacket, String),
    /// Rescanned parent block, for locating codec streams
    Parent(DataPacket),
}

impl CacheKey {
    fn packet(&self) -> &DataPacket {
        match self {
            CacheKey::Results(packet, _) | CacheKey::Parent(packet) => packet,
        }
    }
}

#[derive(Clone)]
enum CacheValue {
    Results(Arc<ResultNode>),
    Parent(Arc<DataBlock>),
}

struct CacheEntry {
    value: CacheValue,
    size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: u64,
    pub budget: u64,
}

struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Most recently used at the front
    lru_queue: VecDeque<CacheKey>,
    bytes: u64,
    budget: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn get(&mut self, key: &CacheKey) -> Option<CacheValue> {
        match self.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                self.lru_queue.retain(|k| k != key);
                self.lru_queue.push_front(key.clone());
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: CacheKey, value: CacheValue, size: u64) {
        if size > self.budget {
            debug!(size, budget = self.budget, "Result larger than cache budget, not cached");
            return;
        }
        self.remove(&key);

        while self.bytes + size > self.budget {
            let Some(oldest) = self.lru_queue.pop_back() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                trace!(size = evicted.size, "Evicting cache entry");
                self.bytes -= evicted.size;
            }
        }

        self.bytes += size;
        self.entries.insert(key.clone(), CacheEntry { value, size });
        self.lru_queue.push_front(key);
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.bytes -= entry.size;
            self.lru_queue.retain(|k| k != key);
        }
    }
}

/// What a single-detector rescan produced
struct Rescan {
    block: Option<DataBlock>,
    results: Option<ResultNode>,
}

/// Shared cache of rescanned results, safe for concurrent lookups
pub struct BlockCache {
    state: Mutex<CacheState>,
    config: CarveConfig,
}

impl BlockCache {
    pub fn new(config: CarveConfig) -> CarveResult<Self> {
        config.validate()?;
        let budget = config.cache_budget();
        debug!(budget, "Block cache created");
        Ok(Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                bytes: 0,
                budget,
                hits: 0,
                misses: 0,
            }),
            config,
        })
    }

    // A panic while holding the lock leaves the map consistent, so recover it
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Result tree for `fragment`, rescanning it on a miss
    ///
    /// Returns `Ok(None)` when the fragment has no detector able to re-parse
    /// it, or when `cancel` fired during the rescan; nothing is cached then.
    pub fn get_results(
        &self,
        fragment: &dyn Fragment,
        cancel: &CancelToken,
    ) -> CarveResult<Option<Arc<ResultNode>>> {
        let Some(detector) = fragment.rescan_detector() else {
            return Ok(None);
        };
        let key = CacheKey::Results(fragment.packet().clone(), detector.name().to_string());
        if let Some(CacheValue::Results(results)) = self.lock().get(&key) {
            trace!(detector = detector.name(), "Result cache hit");
            return Ok(Some(results));
        }
        trace!(detector = detector.name(), "Result cache miss");

        let rescan = match self.rescan(fragment, detector, cancel) {
            Ok(rescan) => rescan,
            Err(e) if e.is_cancellation() => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(block) = rescan.block else {
            return self
                .mismatch(detector, "rescan produced no block".into())
                .map(|()| None);
        };

        let mut results = rescan.results.unwrap_or_else(|| {
            ResultNode::new(block.data_format().as_str(), 0, block.length())
                .with_attribute("detector", detector.name())
        });

        if let Some(original) = fragment.as_block() {
            if let Err(reason) = check_consistency(original, &block) {
                self.mismatch(detector, reason)?;
                // Degraded results are handed out but never cached
                results = results.invalid();
                return Ok(Some(Arc::new(results)));
            }
        }

        let size = results.approx_size();
        let results = Arc::new(results);
        self.lock()
            .insert(key, CacheValue::Results(Arc::clone(&results)), size);
        Ok(Some(results))
    }

    /// Exact byte range of `stream`, re-derived from its parent block
    ///
    /// The parent is rescanned with its original detector and the stream
    /// with the same number is looked up in the result.
    pub fn get_data(
        &self,
        stream: &CodecStream,
        parent: &DataBlock,
        cancel: &CancelToken,
    ) -> CarveResult<Option<DataPacket>> {
        let key = CacheKey::Parent(parent.packet().clone());
        let cached = match self.lock().get(&key) {
            Some(CacheValue::Parent(block)) => Some(block),
            _ => None,
        };

        let block = match cached {
            Some(block) => {
                trace!(stream = stream.stream_number(), "Parent cache hit");
                block
            }
            None => {
                let detector = parent.detector();
                let rescan = match self.rescan(parent, detector, cancel) {
                    Ok(rescan) => rescan,
                    Err(e) if e.is_cancellation() => return Ok(None),
                    Err(e) => return Err(e),
                };
                let Some(block) = rescan.block else {
                    return self
                        .mismatch(detector, "rescan produced no block".into())
                        .map(|()| None);
                };
                if let Err(reason) = check_consistency(parent, &block) {
                    self.mismatch(detector, reason)?;
                    return Ok(block
                        .codec_stream(stream.stream_number())
                        .map(|child| child.packet().clone()));
                }

                let size = (mem::size_of::<DataBlock>()
                    + block.codec_streams().len() * mem::size_of::<CodecStream>())
                    as u64;
                let block = Arc::new(block);
                self.lock()
                    .insert(key, CacheValue::Parent(Arc::clone(&block)), size);
                block
            }
        };

        match block.codec_stream(stream.stream_number()) {
            Some(child) => Ok(Some(child.packet().clone())),
            None => self
                .mismatch(
                    parent.detector(),
                    format!("stream {} missing after rescan", stream.stream_number()),
                )
                .map(|()| None),
        }
    }

    /// Drop every entry derived from `packet`, e.g. after a discard event
    pub fn invalidate(&self, packet: &DataPacket) {
        let mut state = self.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.packet() == packet)
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        if !keys.is_empty() {
            debug!(entries = keys.len(), "Invalidated cache entries");
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
        state.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            bytes: state.bytes,
            budget: state.budget,
        }
    }

    /// Run `detector` once over the fragment's bytes, header spliced in
    fn rescan(
        &self,
        fragment: &dyn Fragment,
        detector: &DetectorRef,
        cancel: &CancelToken,
    ) -> CarveResult<Rescan> {
        cancel.check()?;
        let data = match fragment.reference_header() {
            Some(splice) => {
                if logging::is_debug_enabled() {
                    debug!(
                        label = splice.header.label(),
                        offset = splice.offset,
                        bytes = %logging::hex_preview(splice.header.bytes(), 16),
                        "Splicing reference header"
                    );
                }
                splice.splice(fragment.packet())?
            }
            None => fragment.packet().clone(),
        };

        let pool = ReaderPool::new(&self.config, cancel.clone());
        let mut reader = FragmentedReader::new(pool.clone(), data);
        let builder = BlockBuilder::new(detector.clone(), Arc::clone(fragment.input_file()));
        let mut context = ScanContext::for_rescan(detector.clone());
        let result = detector.detect_data(&mut reader, &builder, &mut context);
        pool.release();

        Ok(Rescan {
            block: result?,
            results: context.take_results(),
        })
    }

    /// Report a non-deterministic detector: an error in strict mode, a
    /// warning otherwise
    fn mismatch(&self, detector: &DetectorRef, reason: String) -> CarveResult<()> {
        if self.config.strict() {
            return Err(CarveError::Inconsistent {
                detector: detector.name().to_string(),
                reason,
            });
        }
        warn!(
            detector = detector.name(),
            "Rescan does not match original detection, results degraded: {}", reason
        );
        Ok(())
    }
}

/// Compare a rescanned block against the block it was rescanned from
fn check_consistency(original: &DataBlock, rescanned: &DataBlock) -> Result<(), String> {
    if rescanned.start_offset() != 0 {
        return Err(format!("starts at {} instead of 0", rescanned.start_offset()));
    }

    let header = original
        .reference_header()
        .map(|splice| splice.header.length())
        .unwrap_or(0);
    let expected = original.length() + header;
    if rescanned.length() != expected {
        return Err(format!(
            "length {} instead of {}",
            rescanned.length(),
            expected
        ));
    }
    // Past the spliced header the bytes must map onto the original input
    if original.length() > 0 {
        let source = rescanned
            .packet()
            .fragment_at(first_original_byte(original))
            .map_err(|e| e.to_string())?;
        if source.input_file().id() != original.packet().input_file().id() {
            return Err(format!(
                "maps onto input {} instead of {}",
                source.input_file().name(),
                original.packet().input_file().name()
            ));
        }
    }
    if rescanned.is_full_file() != original.is_full_file() {
        return Err("full-file flag differs".into());
    }

    let (before, after) = (original.codec_streams(), rescanned.codec_streams());
    if before.len() != after.len() {
        return Err(format!(
            "{} codec streams instead of {}",
            after.len(),
            before.len()
        ));
    }
    for (old, new) in before.iter().zip(after) {
        let format = old.data_format();
        if !format.is_unknown() && format != new.data_format() {
            return Err(format!(
                "stream {} format {} instead of {}",
                old.stream_number(),
                new.data_format(),
                format
            ));
        }
    }
    Ok(())
}

/// Offset of the first original byte within a rescanned block
fn first_original_byte(original: &DataBlock) -> u64 {
    match original.reference_header() {
        Some(splice) if splice.offset == 0 => splice.header.length(),
        _ => 0,
    }
}
