//! Reference headers
//!
//! Out-of-band header bytes a detector can ask to have spliced into data
//! before it is parsed again. A detector that parsed a good header in one
//! fragment carries it (through `ScanContext`) into later headerless
//! fragments of the same stream and records where it belongs, so a rescan
//! of just that fragment can still be parsed.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::error::{CarveError, CarveResult};
use crate::logging::hex_preview;
use crate::packet::{DataPacket, InputFile};

use super::DataFormat;

#[derive(Clone, Serialize)]
pub struct ReferenceHeader {
    label: String,
    data_format: DataFormat,
    length: u64,
    #[serde(skip)]
    bytes: Arc<[u8]>,
    #[serde(skip)]
    source: Arc<InputFile>,
}

impl ReferenceHeader {
    pub fn new(
        label: impl Into<String>,
        data_format: DataFormat,
        bytes: impl Into<Arc<[u8]>>,
    ) -> CarveResult<Self> {
        let label = label.into();
        let bytes: Arc<[u8]> = bytes.into();
        if bytes.is_empty() {
            return Err(CarveError::InvalidArgument(format!(
                "reference header '{}' has no bytes",
                label
            )));
        }
        let source = InputFile::from_bytes(format!("header:{}", label), Arc::clone(&bytes));
        Ok(Self {
            label,
            data_format,
            length: bytes.len() as u64,
            bytes,
            source,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn data_format(&self) -> &DataFormat {
        &self.data_format
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Packet addressing the header bytes
    pub fn packet(&self) -> CarveResult<DataPacket> {
        self.source.packet()
    }
}

impl fmt::Debug for ReferenceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHeader")
            .field("label", &self.label)
            .field("data_format", &self.data_format)
            .field("bytes", &hex_preview(&self.bytes, 16))
            .finish()
    }
}

impl PartialEq for ReferenceHeader {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.data_format == other.data_format && self.bytes == other.bytes
    }
}

impl Eq for ReferenceHeader {}

/// A reference header and the logical offset it is inserted at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderSplice {
    pub offset: u64,
    pub header: ReferenceHeader,
}

impl HeaderSplice {
    pub fn new(offset: u64, header: ReferenceHeader) -> Self {
        Self { offset, header }
    }

    /// `data` with the header bytes inserted at `offset`
    pub fn splice(&self, data: &DataPacket) -> CarveResult<DataPacket> {
        let length = data.length();
        if self.offset > length {
            return Err(CarveError::invalid_range(self.offset, self.header.length(), length));
        }

        let header = self.header.packet()?;
        let spliced = if self.offset == 0 {
            header.append(data)
        } else if self.offset == length {
            data.append(&header)
        } else {
            data.sub_packet(0, self.offset)?
                .append(&header)
                .append(&data.sub_packet(self.offset, length - self.offset)?)
        };
        Ok(spliced)
    }
}
