//! Detector contract
//!
//! A detector recognizes one family of formats directly from raw bytes. The
//! engine positions a reader at a candidate offset and calls
//! [`Detector::detect_data`]; the detector either returns a block built
//! through the supplied [`BlockBuilder`] (leaving the reader at the block's
//! end) or returns `None` after advancing the reader by at least one byte.
//!
//! Detectors are injected through a [`DetectorRegistry`]. Registration order
//! is significant: it breaks selection ties between detectors at the same
//! position, and decides which detector's block is produced first when
//! overlapping blocks are resolved.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{CarveError, CarveResult};
use crate::model::{BlockBuilder, DataBlock, DataFormat, ReferenceHeader, ResultNode};
use crate::reader::Reader;

/// Detector families, scanned in separate phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Container formats holding one or more codec streams
    Container,
    /// Elementary codec formats
    Codec,
}

pub trait Detector: Send + Sync {
    /// Unique name within a registry
    fn name(&self) -> &str;

    fn kind(&self) -> DetectorKind;

    fn supported_formats(&self) -> &[DataFormat];

    /// File extension used when exporting blocks
    fn output_extension(&self) -> &str {
        "bin"
    }

    /// Result columns for presentation layers
    fn columns(&self) -> &[&'static str] {
        &[]
    }

    /// Stable enumeration order: containers before codecs, then by name
    fn compare(&self, other: &dyn Detector) -> Ordering {
        self.kind()
            .cmp(&other.kind())
            .then_with(|| self.name().cmp(other.name()))
    }

    fn supports(&self, format: &DataFormat) -> bool {
        self.supported_formats().contains(format)
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>>;
}

/// Shared handle to a registered detector
#[derive(Clone)]
pub struct DetectorRef(Arc<dyn Detector>);

impl DetectorRef {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        DetectorRef(detector)
    }
}

impl Deref for DetectorRef {
    type Target = dyn Detector;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for DetectorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name() == other.0.name()
    }
}

impl Eq for DetectorRef {}

impl fmt::Debug for DetectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Detector({})", self.0.name())
    }
}

impl Serialize for DetectorRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.name())
    }
}

/// Registration-ordered set of detectors
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<DetectorRef>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<D: Detector + 'static>(&mut self, detector: D) -> CarveResult<DetectorRef> {
        self.register_arc(Arc::new(detector))
    }

    pub fn register_arc(&mut self, detector: Arc<dyn Detector>) -> CarveResult<DetectorRef> {
        if self.get(detector.name()).is_some() {
            return Err(CarveError::InvalidArgument(format!(
                "detector '{}' is already registered",
                detector.name()
            )));
        }
        let detector = DetectorRef::new(detector);
        self.detectors.push(detector.clone());
        Ok(detector)
    }

    /// All detectors in registration order
    pub fn all(&self) -> &[DetectorRef] {
        &self.detectors
    }

    pub fn of_kind(&self, kind: DetectorKind) -> Vec<DetectorRef> {
        self.detectors
            .iter()
            .filter(|d| d.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn containers(&self) -> Vec<DetectorRef> {
        self.of_kind(DetectorKind::Container)
    }

    pub fn codecs(&self) -> Vec<DetectorRef> {
        self.of_kind(DetectorKind::Codec)
    }

    pub fn get(&self, name: &str) -> Option<&DetectorRef> {
        self.detectors.iter().find(|d| d.name() == name)
    }

    /// Detectors in `Detector::compare` order
    pub fn sorted(&self) -> Vec<DetectorRef> {
        let mut sorted = self.detectors.clone();
        sorted.sort_by(|a, b| a.compare(&**b));
        sorted
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// State a detector sees across calls within one scan
///
/// Each detector in a scan gets its own context, so a carried header never
/// leaks between detectors.
pub struct ScanContext {
    detectors: Arc<[DetectorRef]>,
    carried_header: Option<ReferenceHeader>,
    results: Option<ResultNode>,
    collect_results: bool,
    fragmented: bool,
}

impl ScanContext {
    pub fn new(detectors: Arc<[DetectorRef]>) -> Self {
        Self {
            detectors,
            carried_header: None,
            results: None,
            collect_results: false,
            fragmented: false,
        }
    }

    /// Context for re-parsing a single block, with result collection on
    pub fn for_rescan(detector: DetectorRef) -> Self {
        let mut context = Self::new(Arc::from(vec![detector]));
        context.collect_results = true;
        context
    }

    /// Detectors active in this scan
    pub fn detectors(&self) -> &[DetectorRef] {
        &self.detectors
    }

    pub fn carried_header(&self) -> Option<&ReferenceHeader> {
        self.carried_header.as_ref()
    }

    /// Keep `header` for later fragments of the same stream
    pub fn carry_header(&mut self, header: ReferenceHeader) {
        self.carried_header = Some(header);
    }

    pub fn take_carried_header(&mut self) -> Option<ReferenceHeader> {
        self.carried_header.take()
    }

    /// Whether detectors should build a result tree
    pub fn collects_results(&self) -> bool {
        self.collect_results
    }

    /// Store the result tree of the last detection; ignored unless collecting
    pub fn set_results(&mut self, results: ResultNode) {
        if self.collect_results {
            self.results = Some(results);
        }
    }

    pub fn take_results(&mut self) -> Option<ResultNode> {
        self.results.take()
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    /// Record that the data seen so far is split into fragments
    pub fn mark_fragmented(&mut self) {
        self.fragmented = true;
    }
}
