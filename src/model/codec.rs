// Elementary streams found inside a data block

use serde::Serialize;

use crate::detector::DetectorRef;
use crate::packet::DataPacket;

use super::{DataFormat, Fragment, FragmentInfo};

/// How well a codec detector could reconstruct a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamVerdict {
    /// As reported by the container detector, not probed yet
    #[default]
    Unchecked,
    /// A codec detector parsed it with few enough unknown bytes
    Complete,
    /// A codec detector found data, but fragmented or too sparse
    Partial,
    /// No codec detector produced anything
    Unknown,
}

/// Codec stream fields a container detector fills in
#[derive(Debug, Clone, Default)]
pub struct CodecStreamParts {
    pub stream_number: u32,
    pub name: String,
    pub data_format: Option<DataFormat>,
    pub packet: Option<DataPacket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodecStream {
    stream_number: u32,
    name: String,
    data_format: DataFormat,
    packet: DataPacket,
    /// Container detector that found the stream
    detector: DetectorRef,
    /// Codec detector accepted while probing the stream
    codec_detector: Option<DetectorRef>,
    verdict: StreamVerdict,
    fragment: FragmentInfo,
}

impl CodecStream {
    pub(crate) fn new(
        stream_number: u32,
        name: String,
        data_format: DataFormat,
        packet: DataPacket,
        detector: DetectorRef,
    ) -> Self {
        Self {
            stream_number,
            name,
            data_format,
            packet,
            detector,
            codec_detector: None,
            verdict: StreamVerdict::Unchecked,
            fragment: FragmentInfo::default(),
        }
    }

    pub fn stream_number(&self) -> u32 {
        self.stream_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector(&self) -> &DetectorRef {
        &self.detector
    }

    pub fn codec_detector(&self) -> Option<&DetectorRef> {
        self.codec_detector.as_ref()
    }

    pub fn verdict(&self) -> StreamVerdict {
        self.verdict
    }

    pub fn length(&self) -> u64 {
        self.packet.length()
    }

    pub(crate) fn set_verdict(
        &mut self,
        verdict: StreamVerdict,
        codec_detector: Option<DetectorRef>,
    ) {
        self.verdict = verdict;
        self.codec_detector = codec_detector;
        if verdict == StreamVerdict::Unknown {
            self.data_format = DataFormat::UNKNOWN;
        }
    }

    pub(crate) fn fragment_mut(&mut self) -> &mut FragmentInfo {
        &mut self.fragment
    }
}

impl Fragment for CodecStream {
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
        self.codec_detector.as_ref()
    }
}
