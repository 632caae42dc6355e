// Format identifiers shared by detectors, blocks and codec streams

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Name of a container or codec format, e.g. `"mpeg-ps"` or `"h264"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataFormat(Cow<'static, str>);

impl DataFormat {
    /// Opaque data no codec detector could reconstruct
    pub const UNKNOWN: DataFormat = DataFormat(Cow::Borrowed("unknown"));

    pub const fn from_static(name: &'static str) -> Self {
        DataFormat(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        DataFormat(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for DataFormat {
    fn from(name: &'static str) -> Self {
        DataFormat::from_static(name)
    }
}
