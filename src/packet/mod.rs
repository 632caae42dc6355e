//! Immutable, possibly fragmented byte ranges
//!
//! A `DataPacket` is either a leaf (one contiguous range of one input) or a
//! node concatenating two packets. Nodes share their children, so slicing and
//! appending never copy bytes and never mutate an existing packet.
//!
//! ```text
//!            Node [len 7]
//!           /            \
//!   Leaf A[0..4)     Node [len 3]
//!                    /         \
//!             Leaf A[9..10)  Leaf B[2..4)
//! ```
//!
//! Appends attach to whichever side is shorter, which keeps repeated
//! sequential appends at logarithmic depth. Appending a range that directly
//! follows the rightmost leaf in the same input extends that leaf instead.

mod input;

pub use input::{InputFile, InputSource};

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{CarveError, CarveResult};

/// Handle to a contiguous or fragmented byte range
#[derive(Clone)]
pub struct DataPacket {
    node: Arc<PacketNode>,
}

enum PacketNode {
    Leaf {
        file: Arc<InputFile>,
        offset: u64,
        length: u64,
        fingerprint: u64,
    },
    Node {
        first: DataPacket,
        second: DataPacket,
        length: u64,
        start: u64,
        end: u64,
        depth: u32,
        fingerprint: u64,
    },
}

fn fingerprint(parts: &[u64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    hasher.finish()
}

impl DataPacket {
    /// Leaf packet over `[offset, offset + length)` of `file`
    pub fn new(file: &Arc<InputFile>, offset: u64, length: u64) -> CarveResult<Self> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| CarveError::invalid_range(offset, length, file.length()))?;
        if length == 0 || end > file.length() {
            return Err(CarveError::invalid_range(offset, length, file.length()));
        }
        Ok(Self::leaf(Arc::clone(file), offset, length))
    }

    fn leaf(file: Arc<InputFile>, offset: u64, length: u64) -> Self {
        let fingerprint = fingerprint(&[0, file.id(), offset, length]);
        Self {
            node: Arc::new(PacketNode::Leaf {
                file,
                offset,
                length,
                fingerprint,
            }),
        }
    }

    fn node(first: DataPacket, second: DataPacket) -> Self {
        let length = first.length() + second.length();
        let start = first.start_offset().min(second.start_offset());
        let end = first.end_offset().max(second.end_offset());
        let depth = first.depth().max(second.depth()) + 1;
        let fingerprint = fingerprint(&[1, first.fingerprint(), second.fingerprint()]);
        Self {
            node: Arc::new(PacketNode::Node {
                first,
                second,
                length,
                start,
                end,
                depth,
                fingerprint,
            }),
        }
    }

    /// Total number of bytes addressed
    pub fn length(&self) -> u64 {
        match &*self.node {
            PacketNode::Leaf { length, .. } | PacketNode::Node { length, .. } => *length,
        }
    }

    /// Smallest absolute offset covered by any fragment
    pub fn start_offset(&self) -> u64 {
        match &*self.node {
            PacketNode::Leaf { offset, .. } => *offset,
            PacketNode::Node { start, .. } => *start,
        }
    }

    /// Largest absolute end offset of any fragment
    pub fn end_offset(&self) -> u64 {
        match &*self.node {
            PacketNode::Leaf { offset, length, .. } => offset + length,
            PacketNode::Node { end, .. } => *end,
        }
    }

    /// Input of the first fragment
    pub fn input_file(&self) -> &Arc<InputFile> {
        match &*self.node {
            PacketNode::Leaf { file, .. } => file,
            PacketNode::Node { first, .. } => first.input_file(),
        }
    }

    /// True for a concatenation of two or more ranges
    pub fn is_fragmented(&self) -> bool {
        matches!(&*self.node, PacketNode::Node { .. })
    }

    /// Height of the range tree, 0 for a leaf
    pub fn depth(&self) -> u32 {
        match &*self.node {
            PacketNode::Leaf { .. } => 0,
            PacketNode::Node { depth, .. } => *depth,
        }
    }

    /// `(input, absolute offset, length)` when this packet is a single range
    pub fn as_leaf(&self) -> Option<(&Arc<InputFile>, u64, u64)> {
        match &*self.node {
            PacketNode::Leaf {
                file,
                offset,
                length,
                ..
            } => Some((file, *offset, *length)),
            PacketNode::Node { .. } => None,
        }
    }

    fn fingerprint(&self) -> u64 {
        match &*self.node {
            PacketNode::Leaf { fingerprint, .. } | PacketNode::Node { fingerprint, .. } => {
                *fingerprint
            }
        }
    }

    /// Packet addressing the bytes of `self` followed by those of `other`
    pub fn append(&self, other: &DataPacket) -> DataPacket {
        match &*self.node {
            PacketNode::Leaf { .. } => self
                .merge_leaf(other)
                .unwrap_or_else(|| Self::node(self.clone(), other.clone())),
            PacketNode::Node { first, second, .. } => {
                if second.length() < first.length() || second.merges_with(other) {
                    Self::node(first.clone(), second.append(other))
                } else {
                    Self::node(self.clone(), other.clone())
                }
            }
        }
    }

    /// Single leaf if `other` directly continues this leaf in the same input
    fn merge_leaf(&self, other: &DataPacket) -> Option<DataPacket> {
        match (&*self.node, &*other.node) {
            (
                PacketNode::Leaf {
                    file,
                    offset,
                    length,
                    ..
                },
                PacketNode::Leaf {
                    file: other_file,
                    offset: other_offset,
                    length: other_length,
                    ..
                },
            ) if file.id() == other_file.id() && offset + length == *other_offset => Some(
                Self::leaf(Arc::clone(file), *offset, length + other_length),
            ),
            _ => None,
        }
    }

    fn merges_with(&self, other: &DataPacket) -> bool {
        match &*self.node {
            PacketNode::Leaf { .. } => self.merge_leaf(other).is_some(),
            PacketNode::Node { second, .. } => second.merges_with(other),
        }
    }

    /// Packet addressing `length` bytes starting at logical `offset`
    ///
    /// Requesting the whole packet returns the packet itself.
    pub fn sub_packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| CarveError::invalid_range(offset, length, self.length()))?;
        if length == 0 || end > self.length() {
            return Err(CarveError::invalid_range(offset, length, self.length()));
        }
        Ok(self.slice(offset, length))
    }

    fn slice(&self, offset: u64, length: u64) -> DataPacket {
        if offset == 0 && length == self.length() {
            return self.clone();
        }
        match &*self.node {
            PacketNode::Leaf {
                file,
                offset: base,
                ..
            } => Self::leaf(Arc::clone(file), base + offset, length),
            PacketNode::Node { first, second, .. } => {
                let split = first.length();
                if offset + length <= split {
                    first.slice(offset, length)
                } else if offset >= split {
                    second.slice(offset - split, length)
                } else {
                    let head = first.slice(offset, split - offset);
                    let tail = second.slice(0, offset + length - split);
                    head.append(&tail)
                }
            }
        }
    }

    /// The contiguous range containing logical `offset`, from `offset` to the
    /// end of its leaf
    pub fn fragment_at(&self, offset: u64) -> CarveResult<DataPacket> {
        if offset >= self.length() {
            return Err(CarveError::invalid_range(offset, 1, self.length()));
        }
        Ok(self.fragment_unchecked(offset))
    }

    fn fragment_unchecked(&self, offset: u64) -> DataPacket {
        match &*self.node {
            PacketNode::Leaf {
                file,
                offset: base,
                length,
                ..
            } => {
                if offset == 0 {
                    self.clone()
                } else {
                    Self::leaf(Arc::clone(file), base + offset, length - offset)
                }
            }
            PacketNode::Node { first, second, .. } => {
                let split = first.length();
                if offset < split {
                    first.fragment_unchecked(offset)
                } else {
                    second.fragment_unchecked(offset - split)
                }
            }
        }
    }

    /// Walk the leaves in logical order
    pub fn fragments(&self) -> Fragments {
        Fragments {
            packet: self.clone(),
            offset: 0,
        }
    }
}

/// Iterator over the contiguous ranges of a packet
pub struct Fragments {
    packet: DataPacket,
    offset: u64,
}

impl Iterator for Fragments {
    type Item = DataPacket;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.packet.length() {
            return None;
        }
        let fragment = self.packet.fragment_unchecked(self.offset);
        self.offset += fragment.length();
        Some(fragment)
    }
}

impl PartialEq for DataPacket {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.node, &other.node) {
            return true;
        }
        if self.fingerprint() != other.fingerprint() {
            return false;
        }
        match (&*self.node, &*other.node) {
            (
                PacketNode::Leaf {
                    file: a,
                    offset: ao,
                    length: al,
                    ..
                },
                PacketNode::Leaf {
                    file: b,
                    offset: bo,
                    length: bl,
                    ..
                },
            ) => a.id() == b.id() && ao == bo && al == bl,
            (
                PacketNode::Node {
                    first: af,
                    second: as_,
                    ..
                },
                PacketNode::Node {
                    first: bf,
                    second: bs,
                    ..
                },
            ) => af == bf && as_ == bs,
            _ => false,
        }
    }
}

impl Eq for DataPacket {}

impl Hash for DataPacket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint());
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for fragment in self.fragments() {
            if let Some((file, offset, length)) = fragment.as_leaf() {
                list.entry(&format_args!("#{}[{}..{})", file.id(), offset, offset + length));
            }
        }
        list.finish()
    }
}

#[derive(Serialize)]
struct FragmentRecord<'a> {
    input: &'a str,
    offset: u64,
    length: u64,
}

impl Serialize for DataPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fragments: Vec<DataPacket> = self.fragments().collect();
        let mut seq = serializer.serialize_seq(Some(fragments.len()))?;
        for fragment in &fragments {
            if let Some((file, offset, length)) = fragment.as_leaf() {
                seq.serialize_element(&FragmentRecord {
                    input: file.name(),
                    offset,
                    length,
                })?;
            }
        }
        seq.end()
    }
}
