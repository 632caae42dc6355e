//! Forensic carving engine
//!
//! Recovers structured content from raw byte sources without filesystem
//! metadata. Pluggable detectors are run over buffered readers in lock-step,
//! container formats first and codec formats over whatever the containers
//! leave unclaimed. Results are immutable `DataPacket` range trees that can
//! be re-parsed on demand through a shared `BlockCache`.

pub mod cache;
pub mod cancel;
pub mod common;
pub mod config;
pub mod detector;
pub mod error;
pub mod logging;
pub mod model;
pub mod packet;
pub mod reader;
pub mod scanner;

#[cfg(test)]
mod test_support;

pub use cache::{BlockCache, CacheStats};
pub use cancel::{CancelToken, PollerHandle};
pub use common::ReaderPool;
pub use config::CarveConfig;
pub use detector::{Detector, DetectorKind, DetectorRef, DetectorRegistry, ScanContext};
pub use error::{CarveError, CarveResult};
pub use model::{
    BlockBuilder, BlockParts, CodecStream, CodecStreamParts, DataBlock, DataFormat, Fragment,
    FragmentArena, HeaderSplice, ReferenceHeader, ResultNode, StreamVerdict,
};
pub use packet::{DataPacket, InputFile};
pub use reader::{BufferedReader, FragmentedReader, Reader};
pub use scanner::{
    EventLog, FileScanReport, FileScanner, ScanEvent, ScanObserver, ScanOutcome, Scanner,
};
