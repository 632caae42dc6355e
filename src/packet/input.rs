//! Input sources: the identity every `DataPacket` leaf refers to

use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CarveError, CarveResult};

use super::DataPacket;

static NEXT_INPUT_ID: AtomicU64 = AtomicU64::new(1);

/// Where the bytes of an input live
#[derive(Clone)]
pub enum InputSource {
    /// File on disk, opened read-only by each reader pool
    Path(PathBuf),
    /// Bytes held in memory (reference headers, test images)
    Memory(Arc<[u8]>),
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            InputSource::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
        }
    }
}

/// A raw byte source under examination
///
/// Identity is a process-unique id: two `InputFile`s opened from the same
/// path are distinct sources.
#[derive(Debug, Serialize)]
pub struct InputFile {
    id: u64,
    name: String,
    length: u64,
    #[serde(skip)]
    source: InputSource,
}

impl InputFile {
    /// Open a file on disk; only its metadata is read here
    pub fn open(path: impl AsRef<Path>) -> CarveResult<Arc<Self>> {
        let path = path.as_ref();
        let length = fs::metadata(path)
            .map_err(|e| CarveError::io(path, e))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let input = Self::with_source(name, length, InputSource::Path(path.to_path_buf()));
        debug!(id = input.id, name = %input.name, length, "Opened input file");
        Ok(Arc::new(input))
    }

    /// Wrap in-memory bytes as an input
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Arc<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let length = bytes.len() as u64;
        Arc::new(Self::with_source(name.into(), length, InputSource::Memory(bytes)))
    }

    fn with_source(name: String, length: u64, source: InputSource) -> Self {
        Self {
            id: NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            length,
            source,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn source(&self) -> &InputSource {
        &self.source
    }

    /// Packet covering the whole input
    pub fn packet(self: &Arc<Self>) -> CarveResult<DataPacket> {
        DataPacket::new(self, 0, self.length)
    }

    /// Open a fresh read-only handle on a disk-backed source
    pub(crate) fn open_handle(&self) -> CarveResult<Option<File>> {
        match &self.source {
            InputSource::Path(path) => File::open(path)
                .map(Some)
                .map_err(|e| CarveError::io(path, e)),
            InputSource::Memory(_) => Ok(None),
        }
    }

    /// Path used in error messages
    pub(crate) fn display_path(&self) -> PathBuf {
        match &self.source {
            InputSource::Path(path) => path.clone(),
            InputSource::Memory(_) => PathBuf::from(format!("<memory:{}>", self.name)),
        }
    }
}

impl PartialEq for InputFile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InputFile {}

impl Hash for InputFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
