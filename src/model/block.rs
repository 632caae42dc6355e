//! Data blocks and the validating builder detectors emit them through
//!
//! A detector fills a plain `BlockParts` value and hands it to
//! `BlockBuilder::build`, which checks required fields and ranges once and
//! produces an immutable `DataBlock`.

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;

use crate::detector::DetectorRef;
use crate::error::{CarveError, CarveResult};
use crate::packet::{DataPacket, InputFile};
use crate::reader::Reader;

use super::{CodecStream, CodecStreamParts, DataFormat, Fragment, FragmentInfo, HeaderSplice};

/// Fields of a detected block, in reader-relative offsets
#[derive(Debug, Clone, Default)]
pub struct BlockParts {
    pub data_format: Option<DataFormat>,
    pub start_offset: u64,
    pub end_offset: Option<u64>,
    /// The block spans a whole file of its format
    pub is_full_file: bool,
    /// The detector forced a fragment break; the next block it returns
    /// continues this stream
    pub continues: bool,
    pub reference_header: Option<HeaderSplice>,
    pub codec_streams: Vec<CodecStreamParts>,
}

fn serialize_input<S: Serializer>(input: &Arc<InputFile>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(input.name())
}

#[derive(Debug, Clone, Serialize)]
pub struct DataBlock {
    data_format: DataFormat,
    /// Detector that found the block first, then codec detectors accepted
    /// for its streams
    detectors: Vec<DetectorRef>,
    #[serde(serialize_with = "serialize_input")]
    input_file: Arc<InputFile>,
    start_offset: u64,
    end_offset: u64,
    packet: DataPacket,
    is_full_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_header: Option<HeaderSplice>,
    codec_streams: Vec<CodecStream>,
    fragment: FragmentInfo,
}

impl DataBlock {
    pub fn data_format(&self) -> &DataFormat {
        &self.data_format
    }

    pub fn detectors(&self) -> &[DetectorRef] {
        &self.detectors
    }

    /// The detector that produced this block
    pub fn detector(&self) -> &DetectorRef {
        &self.detectors[0]
    }

    pub fn input_file(&self) -> &Arc<InputFile> {
        &self.input_file
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn length(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn packet(&self) -> &DataPacket {
        &self.packet
    }

    pub fn is_full_file(&self) -> bool {
        self.is_full_file
    }

    pub fn reference_header(&self) -> Option<&HeaderSplice> {
        self.reference_header.as_ref()
    }

    pub fn codec_streams(&self) -> &[CodecStream] {
        &self.codec_streams
    }

    pub fn codec_stream(&self, stream_number: u32) -> Option<&CodecStream> {
        self.codec_streams
            .iter()
            .find(|s| s.stream_number() == stream_number)
    }

    pub fn fragment(&self) -> &FragmentInfo {
        &self.fragment
    }

    pub fn overlaps(&self, other: &DataBlock) -> bool {
        self.start_offset < other.end_offset && other.start_offset < self.end_offset
    }

    /// Shift offsets from a sub-range reader back into the parent's space
    pub(crate) fn relocated(mut self, base: u64) -> Self {
        self.start_offset += base;
        self.end_offset += base;
        self
    }

    pub(crate) fn fragment_mut(&mut self) -> &mut FragmentInfo {
        &mut self.fragment
    }

    pub(crate) fn codec_streams_mut(&mut self) -> &mut [CodecStream] {
        &mut self.codec_streams
    }

    pub(crate) fn add_detector(&mut self, detector: DetectorRef) {
        if !self.detectors.contains(&detector) {
            self.detectors.push(detector);
        }
    }
}

impl Fragment for DataBlock {
    fn packet(&self) -> &DataPacket {
        &self.packet
    }

    fn fragment(&self) -> &FragmentInfo {
        &self.fragment
    }

    fn data_format(&self) -> &DataFormat {
        &self.data_format
    }

    fn rescan_detector(&self) -> Option<&DetectorRef> {
        self.detectors.first()
    }

    fn reference_header(&self) -> Option<&HeaderSplice> {
        self.reference_header.as_ref()
    }

    fn as_block(&self) -> Option<&DataBlock> {
        Some(self)
    }

    fn input_file(&self) -> &Arc<InputFile> {
        &self.input_file
    }
}

/// Handed to a detector for each detection call
pub struct BlockBuilder {
    detector: DetectorRef,
    input_file: Arc<InputFile>,
}

impl BlockBuilder {
    pub fn new(detector: DetectorRef, input_file: Arc<InputFile>) -> Self {
        Self {
            detector,
            input_file,
        }
    }

    pub fn detector(&self) -> &DetectorRef {
        &self.detector
    }

    pub fn input_file(&self) -> &Arc<InputFile> {
        &self.input_file
    }

    /// Validate `parts` against `reader` and build the block
    pub fn build(&self, reader: &dyn Reader, parts: BlockParts) -> CarveResult<DataBlock> {
        let data_format = parts.data_format.ok_or(CarveError::MissingField("data_format"))?;
        let end_offset = parts.end_offset.ok_or(CarveError::MissingField("end_offset"))?;
        let start_offset = parts.start_offset;
        if end_offset <= start_offset || end_offset > reader.length() {
            return Err(CarveError::invalid_range(
                start_offset,
                end_offset.saturating_sub(start_offset),
                reader.length(),
            ));
        }
        let packet = reader.packet(start_offset, end_offset - start_offset)?;

        let mut seen = HashSet::new();
        let mut codec_streams = Vec::with_capacity(parts.codec_streams.len());
        for stream in parts.codec_streams {
            if !seen.insert(stream.stream_number) {
                return Err(CarveError::InvalidArgument(format!(
                    "duplicate codec stream number {}",
                    stream.stream_number
                )));
            }
            let format = stream
                .data_format
                .ok_or(CarveError::MissingField("codec_stream.data_format"))?;
            let stream_packet = stream
                .packet
                .ok_or(CarveError::MissingField("codec_stream.packet"))?;
            let name = if stream.name.is_empty() {
                format!("Stream {}", stream.stream_number)
            } else {
                stream.name
            };
            codec_streams.push(CodecStream::new(
                stream.stream_number,
                name,
                format,
                stream_packet,
                self.detector.clone(),
            ));
        }

        Ok(DataBlock {
            data_format,
            detectors: vec![self.detector.clone()],
            input_file: Arc::clone(&self.input_file),
            start_offset,
            end_offset,
            packet,
            is_full_file: parts.is_full_file,
            reference_header: parts.reference_header,
            codec_streams,
            fragment: FragmentInfo {
                continues: parts.continues,
                ..FragmentInfo::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SourceReader;
    use crate::test_support::detector_ref;

    fn setup() -> (BlockBuilder, SourceReader) {
        let input = InputFile::from_bytes("block", vec![0u8; 100]);
        let builder = BlockBuilder::new(detector_ref("carv"), Arc::clone(&input));
        (builder, SourceReader::open(&input).unwrap())
    }

    #[test]
    fn test_missing_fields() {
        let (builder, reader) = setup();
        let err = builder.build(&reader, BlockParts::default()).unwrap_err();
        assert!(matches!(err, CarveError::MissingField("data_format")));

        let parts = BlockParts {
            data_format: Some(DataFormat::from_static("carv")),
            ..BlockParts::default()
        };
        let err = builder.build(&reader, parts).unwrap_err();
        assert!(matches!(err, CarveError::MissingField("end_offset")));
    }

    #[test]
    fn test_range_checks() {
        let (builder, reader) = setup();
        for (start, end) in [(10, 10), (20, 5), (90, 101)] {
            let parts = BlockParts {
                data_format: Some(DataFormat::from_static("carv")),
                start_offset: start,
                end_offset: Some(end),
                ..BlockParts::default()
            };
            assert!(matches!(
                builder.build(&reader, parts),
                Err(CarveError::InvalidRange { .. })
            ));
        }
    }

    #[test]
    fn test_build_with_streams() {
        let (builder, reader) = setup();
        let parts = BlockParts {
            data_format: Some(DataFormat::from_static("carv")),
            start_offset: 10,
            end_offset: Some(60),
            codec_streams: vec![CodecStreamParts {
                stream_number: 3,
                name: String::new(),
                data_format: Some(DataFormat::from_static("frame")),
                packet: Some(reader.packet(20, 10).unwrap()),
            }],
            ..BlockParts::default()
        };
        let block = builder.build(&reader, parts).unwrap();
        assert_eq!(block.length(), 50);
        assert_eq!(block.packet().start_offset(), 10);
        assert_eq!(block.detector().name(), "carv");
        let stream = block.codec_stream(3).unwrap();
        assert_eq!(stream.name(), "Stream 3");
        assert_eq!(stream.verdict(), crate::model::StreamVerdict::Unchecked);

        let moved = block.relocated(1000);
        assert_eq!(moved.start_offset(), 1010);
        assert_eq!(moved.packet().start_offset(), 10);
    }

    #[test]
    fn test_duplicate_stream_numbers() {
        let (builder, reader) = setup();
        let stream = CodecStreamParts {
            stream_number: 1,
            name: "a".into(),
            data_format: Some(DataFormat::from_static("frame")),
            packet: Some(reader.packet(0, 4).unwrap()),
        };
        let parts = BlockParts {
            data_format: Some(DataFormat::from_static("carv")),
            end_offset: Some(10),
            codec_streams: vec![stream.clone(), stream],
            ..BlockParts::default()
        };
        assert!(matches!(
            builder.build(&reader, parts),
            Err(CarveError::InvalidArgument(_))
        ));
    }
}
