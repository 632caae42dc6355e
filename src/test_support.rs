// Synthetic detectors and byte generators shared by unit tests
//
// Formats:
//   carv   "CARV" u32be(payload_len) payload
//   boxs   "BOXS" u8(flags|count) { u8(stream) u32be(len) }* payloads in order,
//          flag 0x80 marks a block continued by the next one
//   frame  "FRM" u8(payload_len) payload, repeated
//   keyed  "HDR!v001" "BODY" u32be(len) payload, later fragments without the
//          8-byte header

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::detector::{Detector, DetectorKind, DetectorRef, ScanContext};
use crate::error::{CarveError, CarveResult};
use crate::model::{
    BlockBuilder, BlockParts, CodecStreamParts, DataBlock, DataFormat, HeaderSplice,
    ReferenceHeader, ResultNode,
};
use crate::packet::InputFile;
use crate::reader::{Reader, SourceReader};

const SEARCH_CHUNK: u64 = 64 * 1024;
pub const KEYED_HEADER: &[u8; 8] = b"HDR!v001";

/// Deterministic 64-bit LCG
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed ^ 0x5DEE_CE66_D)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let wide = ((self.next_u32() as u64) << 32) | self.next_u32() as u64;
        wide % n
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_u32() as u8).collect()
    }

    /// Random bytes that can never start a synthetic magic
    pub fn noise(&mut self, len: usize) -> Vec<u8> {
        self.bytes(len)
            .into_iter()
            .map(|b| match b {
                b'C' | b'B' | b'F' | b'H' => 0,
                b => b,
            })
            .collect()
    }
}

pub fn carv_block(payload_len: usize, fill: u8) -> Vec<u8> {
    let mut out = b"CARV".to_vec();
    out.extend_from_slice(&(payload_len as u32).to_be_bytes());
    out.resize(8 + payload_len, fill);
    out
}

pub fn frames(count: usize, payload_len: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..count {
        out.extend_from_slice(b"FRM");
        out.push(payload_len);
        out.extend(std::iter::repeat(i as u8).take(payload_len as usize));
    }
    out
}

pub fn boxs(streams: &[(u8, Vec<u8>)]) -> Vec<u8> {
    boxs_with_flags(streams, 0)
}

pub fn boxs_continued(streams: &[(u8, Vec<u8>)]) -> Vec<u8> {
    boxs_with_flags(streams, 0x80)
}

fn boxs_with_flags(streams: &[(u8, Vec<u8>)], flags: u8) -> Vec<u8> {
    let mut out = b"BOXS".to_vec();
    out.push(flags | streams.len() as u8);
    for (number, payload) in streams {
        out.push(*number);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    for (_, payload) in streams {
        out.extend_from_slice(payload);
    }
    out
}

pub fn keyed_body(payload_len: usize) -> Vec<u8> {
    let mut out = b"BODY".to_vec();
    out.extend_from_slice(&(payload_len as u32).to_be_bytes());
    out.resize(8 + payload_len, 0x5a);
    out
}

pub fn detector_ref(name: &str) -> DetectorRef {
    DetectorRef::new(Arc::new(MagicDetector::new(name)))
}

/// Search forward from the reader position for `magic`
///
/// On a miss the reader is left past the searched bytes, minus a tail that
/// could hold the start of a magic split across chunks.
fn find_magic(reader: &mut dyn Reader, magic: &[u8]) -> CarveResult<Option<u64>> {
    let start = reader.position();
    let length = reader.length();
    let remaining = length.saturating_sub(start);
    if remaining < magic.len() as u64 {
        reader.seek(length.max(start + 1));
        return Ok(None);
    }

    let chunk = reader.read_bytes(remaining.min(SEARCH_CHUNK) as usize)?;
    if let Some(k) = chunk.windows(magic.len()).position(|w| w == magic) {
        return Ok(Some(start + k as u64));
    }

    let next = if start + chunk.len() as u64 >= length {
        length
    } else {
        start + (chunk.len() - (magic.len() - 1)) as u64
    };
    reader.seek(next.max(start + 1));
    Ok(None)
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Container: "CARV" + u32be payload length
pub struct MagicDetector {
    name: String,
    formats: Vec<DataFormat>,
}

impl MagicDetector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            formats: vec![DataFormat::from_static("carv")],
        }
    }
}

impl Detector for MagicDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let Some(start) = find_magic(reader, b"CARV")? else {
            return Ok(None);
        };
        reader.seek(start + 4);
        let payload = read_u32_be(&reader.read_bytes(4)?) as u64;
        let end = start + 8 + payload;
        if end > reader.length() {
            reader.seek(start + 1);
            return Ok(None);
        }

        if context.collects_results() {
            let mut root = ResultNode::new("carv", start, end - start);
            root.push_child(ResultNode::new("header", start, 8));
            root.push_child(ResultNode::new("payload", start + 8, payload));
            context.set_results(root);
        }

        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: start,
                end_offset: Some(end),
                ..BlockParts::default()
            },
        )?;
        reader.seek(end);
        Ok(Some(block))
    }
}

/// Container holding numbered "frame" streams
pub struct BoxDetector {
    formats: Vec<DataFormat>,
}

impl BoxDetector {
    pub fn new() -> Self {
        Self {
            formats: vec![DataFormat::from_static("boxs")],
        }
    }
}

impl Detector for BoxDetector {
    fn name(&self) -> &str {
        "boxs"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn output_extension(&self) -> &str {
        "box"
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let Some(start) = find_magic(reader, b"BOXS")? else {
            return Ok(None);
        };
        reader.seek(start + 4);
        let flags = reader.read_bytes(1)?[0];
        let count = (flags & 0x7f) as u64;
        let table = reader.read_bytes((count * 5) as usize)?;

        let mut offset = start + 5 + count * 5;
        let mut streams = Vec::new();
        for entry in table.chunks(5) {
            let length = read_u32_be(&entry[1..]) as u64;
            if offset + length > reader.length() {
                reader.seek(start + 1);
                return Ok(None);
            }
            streams.push(CodecStreamParts {
                stream_number: entry[0] as u32,
                name: format!("Frames {}", entry[0]),
                data_format: Some(DataFormat::from_static("frame")),
                packet: Some(reader.packet(offset, length)?),
            });
            offset += length;
        }

        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: start,
                end_offset: Some(offset),
                continues: flags & 0x80 != 0,
                codec_streams: streams,
                ..BlockParts::default()
            },
        )?;
        reader.seek(offset);
        Ok(Some(block))
    }
}

/// Codec: runs of "FRM" frames
pub struct FrameDetector {
    name: String,
    formats: Vec<DataFormat>,
    max_frames: Option<usize>,
}

impl FrameDetector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            formats: vec![DataFormat::from_static("frame")],
            max_frames: None,
        }
    }

    /// Force a fragment break after `max` frames
    pub fn with_max_frames(mut self, max: usize) -> Self {
        self.max_frames = Some(max);
        self
    }
}

impl Detector for FrameDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Codec
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let Some(start) = find_magic(reader, b"FRM")? else {
            return Ok(None);
        };

        let mut root = ResultNode::new("frames", start, 0);
        let mut end = start;
        let mut count = 0;
        let mut continues = false;
        while end + 4 <= reader.length() {
            if self.max_frames.is_some_and(|max| count == max) {
                continues = true;
                context.mark_fragmented();
                break;
            }
            reader.seek(end);
            let header = reader.read_bytes(4)?;
            let frame_end = end + 4 + header[3] as u64;
            if &header[..3] != b"FRM" || frame_end > reader.length() {
                break;
            }
            root.push_child(ResultNode::new("frame", end, frame_end - end));
            end = frame_end;
            count += 1;
        }

        if count == 0 {
            reader.seek(start + 1);
            return Ok(None);
        }
        root.length = end - start;
        context.set_results(root.with_attribute("frames", count));

        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: start,
                end_offset: Some(end),
                continues,
                ..BlockParts::default()
            },
        )?;
        reader.seek(end);
        Ok(Some(block))
    }
}

/// Container whose later fragments rely on a header carried from the first
pub struct KeyedDetector {
    formats: Vec<DataFormat>,
}

impl KeyedDetector {
    pub fn new() -> Self {
        Self {
            formats: vec![DataFormat::from_static("keyed")],
        }
    }
}

impl Detector for KeyedDetector {
    fn name(&self) -> &str {
        "keyed"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let position = reader.position();
        let Some(body) = find_magic(reader, b"BODY")? else {
            return Ok(None);
        };

        let has_header = body >= position + 8 && {
            reader.seek(body - 8);
            reader.read_bytes(8)? == KEYED_HEADER
        };
        let (start, reference_header) = if has_header {
            let header = ReferenceHeader::new(
                "keyed",
                self.formats[0].clone(),
                KEYED_HEADER.to_vec(),
            )?;
            context.carry_header(header);
            (body - 8, None)
        } else if let Some(header) = context.carried_header() {
            (body, Some(HeaderSplice::new(0, header.clone())))
        } else {
            reader.seek(body + 1);
            return Ok(None);
        };

        reader.seek(body + 4);
        let payload = read_u32_be(&reader.read_bytes(4)?) as u64;
        let end = body + 8 + payload;
        if end > reader.length() {
            reader.seek(body + 1);
            return Ok(None);
        }

        let mut root = ResultNode::new("keyed", start, end - start);
        if has_header {
            root.push_child(ResultNode::new("header", start, 8));
        }
        root.push_child(ResultNode::new("body", body, end - body));
        context.set_results(root);

        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: start,
                end_offset: Some(end),
                reference_header,
                ..BlockParts::default()
            },
        )?;
        reader.seek(end);
        Ok(Some(block))
    }
}

/// Returns a fixed list of blocks, for selection and overlap tests
pub struct FixedDetector {
    name: String,
    kind: DetectorKind,
    formats: Vec<DataFormat>,
    blocks: Vec<(u64, u64)>,
}

impl FixedDetector {
    pub fn new(name: &str, kind: DetectorKind, blocks: &[(u64, u64)]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            formats: vec![DataFormat::new(name)],
            blocks: blocks.to_vec(),
        }
    }
}

impl Detector for FixedDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let position = reader.position();
        let next = self.blocks.iter().find(|(start, _)| *start >= position);
        let Some(&(start, end)) = next else {
            let length = reader.length();
            reader.seek(length.max(position + 1));
            return Ok(None);
        };

        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: start,
                end_offset: Some(end),
                ..BlockParts::default()
            },
        )?;
        reader.seek(end);
        Ok(Some(block))
    }
}

/// Always fails with a detector error
pub struct FailingDetector;

impl Detector for FailingDetector {
    fn name(&self) -> &str {
        "failing"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &[]
    }

    fn detect_data(
        &self,
        _reader: &mut dyn Reader,
        _builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        Err(CarveError::Detector {
            detector: "failing".into(),
            message: "corrupt plugin".into(),
        })
    }
}

/// Never advances the reader
pub struct StuckDetector;

impl Detector for StuckDetector {
    fn name(&self) -> &str {
        "stuck"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &[]
    }

    fn detect_data(
        &self,
        _reader: &mut dyn Reader,
        _builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        Ok(None)
    }
}

/// Behaves like `MagicDetector` but reports one byte less on every other call
pub struct FlakyDetector {
    inner: MagicDetector,
    calls: AtomicU32,
}

impl FlakyDetector {
    pub fn new() -> Self {
        Self {
            inner: MagicDetector::new("flaky"),
            calls: AtomicU32::new(0),
        }
    }
}

impl Detector for FlakyDetector {
    fn name(&self) -> &str {
        "flaky"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        self.inner.supported_formats()
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let Some(block) = self.inner.detect_data(reader, builder, context)? else {
            return Ok(None);
        };
        if self.calls.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
            return Ok(Some(block));
        }
        let shorter = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(block.data_format().clone()),
                start_offset: block.start_offset(),
                end_offset: Some(block.end_offset() - 1),
                ..BlockParts::default()
            },
        )?;
        Ok(Some(shorter))
    }
}

/// Behaves like `MagicDetector` but maps every block after the first onto a
/// private zero-filled input of the same length
pub struct ForeignDetector {
    inner: MagicDetector,
    calls: AtomicU32,
}

impl ForeignDetector {
    pub fn new() -> Self {
        Self {
            inner: MagicDetector::new("foreign"),
            calls: AtomicU32::new(0),
        }
    }
}

impl Detector for ForeignDetector {
    fn name(&self) -> &str {
        "foreign"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        self.inner.supported_formats()
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let Some(block) = self.inner.detect_data(reader, builder, context)? else {
            return Ok(None);
        };
        if self.calls.fetch_add(1, Ordering::Relaxed) == 0 {
            return Ok(Some(block));
        }
        let copy = InputFile::from_bytes("copy", vec![0u8; reader.length() as usize]);
        let foreign = SourceReader::open(&copy)?;
        let moved = builder.build(
            &foreign,
            BlockParts {
                data_format: Some(block.data_format().clone()),
                start_offset: block.start_offset(),
                end_offset: Some(block.end_offset()),
                ..BlockParts::default()
            },
        )?;
        Ok(Some(moved))
    }
}

/// Byte-stepping detector that recognizes `[start, end)` only when asked
/// exactly at `start`
pub struct SteppingDetector {
    name: String,
    formats: Vec<DataFormat>,
    start: u64,
    end: u64,
}

impl SteppingDetector {
    pub fn new(name: &str, start: u64, end: u64) -> Self {
        Self {
            name: name.to_string(),
            formats: vec![DataFormat::new(name)],
            start,
            end,
        }
    }
}

impl Detector for SteppingDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &self.formats
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        let position = reader.position();
        if position != self.start {
            reader.seek(position + 1);
            return Ok(None);
        }
        let block = builder.build(
            &*reader,
            BlockParts {
                data_format: Some(self.formats[0].clone()),
                start_offset: self.start,
                end_offset: Some(self.end),
                ..BlockParts::default()
            },
        )?;
        reader.seek(self.end);
        Ok(Some(block))
    }
}

/// Cancels `token` on its `after`-th call
pub struct CancellingDetector {
    token: CancelToken,
    after: u32,
    calls: AtomicU32,
}

impl CancellingDetector {
    pub fn new(token: CancelToken, after: u32) -> Self {
        Self {
            token,
            after,
            calls: AtomicU32::new(0),
        }
    }
}

impl Detector for CancellingDetector {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Container
    }

    fn supported_formats(&self) -> &[DataFormat] {
        &[]
    }

    fn detect_data(
        &self,
        reader: &mut dyn Reader,
        _builder: &BlockBuilder,
        _context: &mut ScanContext,
    ) -> CarveResult<Option<DataBlock>> {
        if self.calls.fetch_add(1, Ordering::Relaxed) + 1 >= self.after {
            self.token.cancel();
        }
        let position = reader.position();
        reader.seek(position + 16);
        Ok(None)
    }
}
