//! Fragment bookkeeping
//!
//! A logical stream found as several disjoint pieces is tracked in a
//! `FragmentArena`: every piece gets a `FragmentId`, and pieces of one series
//! share a `FragmentContainer` that lists them in order. Containers hold ids,
//! never the fragments themselves, so there are no back-reference cycles.

use serde::Serialize;
use std::sync::Arc;

use crate::detector::DetectorRef;
use crate::error::{CarveError, CarveResult};
use crate::packet::{DataPacket, InputFile};

use super::{DataBlock, DataFormat, HeaderSplice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FragmentId(usize);

impl FragmentId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContainerId(usize);

/// Per-result fragmentation fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FragmentInfo {
    /// 0-based position in the fragment series
    pub index: u32,
    /// Arena handle, assigned by the file scanner
    pub id: Option<FragmentId>,
    /// The detector broke the stream here and resumes it in the next fragment
    pub continues: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FragmentEntry {
    pub length: u64,
    pub container: Option<ContainerId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentContainer {
    fragments: Vec<FragmentId>,
    total_length: u64,
}

impl FragmentContainer {
    pub fn fragments(&self) -> &[FragmentId] {
        &self.fragments
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FragmentArena {
    entries: Vec<FragmentEntry>,
    containers: Vec<FragmentContainer>,
}

impl FragmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, length: u64) -> FragmentId {
        self.entries.push(FragmentEntry {
            length,
            container: None,
        });
        FragmentId(self.entries.len() - 1)
    }

    /// Link `next` after `previous`, creating their container on first use
    pub fn chain(&mut self, previous: FragmentId, next: FragmentId) -> CarveResult<ContainerId> {
        let next_length = self.entry(next)?.length;
        if self.entry(next)?.container.is_some() {
            return Err(CarveError::InvalidArgument(format!(
                "fragment {} is already part of a series",
                next.0
            )));
        }

        let container = match self.entry(previous)?.container {
            Some(container) => container,
            None => {
                let first_length = self.entry(previous)?.length;
                self.containers.push(FragmentContainer {
                    fragments: vec![previous],
                    total_length: first_length,
                });
                let container = ContainerId(self.containers.len() - 1);
                // Retro-link the first fragment of the series
                self.entries[previous.0].container = Some(container);
                container
            }
        };

        let series = &mut self.containers[container.0];
        series.fragments.push(next);
        series.total_length += next_length;
        self.entries[next.0].container = Some(container);
        Ok(container)
    }

    fn entry(&self, id: FragmentId) -> CarveResult<&FragmentEntry> {
        self.entries
            .get(id.0)
            .ok_or_else(|| CarveError::InvalidArgument(format!("unknown fragment {}", id.0)))
    }

    pub fn get(&self, id: FragmentId) -> Option<&FragmentEntry> {
        self.entries.get(id.0)
    }

    /// The series `id` belongs to, if it has more than one fragment
    pub fn container_of(&self, id: FragmentId) -> Option<&FragmentContainer> {
        let container = self.entries.get(id.0)?.container?;
        self.containers.get(container.0)
    }

    pub fn container(&self, id: ContainerId) -> Option<&FragmentContainer> {
        self.containers.get(id.0)
    }

    pub fn containers(&self) -> &[FragmentContainer] {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A detection result that may be one piece of a larger stream
pub trait Fragment {
    /// Source bytes of this piece
    fn packet(&self) -> &DataPacket;

    fn fragment(&self) -> &FragmentInfo;

    fn data_format(&self) -> &DataFormat;

    /// Detector that re-parses this piece, if any
    fn rescan_detector(&self) -> Option<&DetectorRef>;

    fn reference_header(&self) -> Option<&HeaderSplice> {
        None
    }

    /// Set for data blocks, whose rescans are checked field by field
    fn as_block(&self) -> Option<&DataBlock> {
        None
    }

    fn input_file(&self) -> &Arc<InputFile> {
        self.packet().input_file()
    }
}
