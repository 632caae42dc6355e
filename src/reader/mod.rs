//! Byte readers used by detectors and scanners
//!
//! Every reader exposes the same positional contract: `read` fills the whole
//! buffer starting at the current position and advances it, reading bytes
//! past the end of input as zero. The returned count always equals the
//! requested length; callers detect the end through `position()`/`length()`.
//!
//! Readers compose as decorators:
//!
//! ```text
//! FragmentedReader (logical packet view)
//!   └── ReaderPool (one reader per input)
//!         └── CancellableReader (cancellation check per read)
//!               └── BufferedReader (read-ahead / read-back)
//!                     └── SourceReader (file or memory)
//! ```

mod buffered;
mod cancellable;
mod fragmented;
mod source;

pub use buffered::{BufferStats, BufferedReader};
pub use cancellable::CancellableReader;
pub use fragmented::FragmentedReader;
pub use source::SourceReader;

use crate::error::{try_reserve, CarveResult};
use crate::packet::DataPacket;

/// Seekable byte reader over a (possibly fragmented) range of input
pub trait Reader {
    /// Number of addressable bytes
    fn length(&self) -> u64;

    /// Current read position
    fn position(&self) -> u64;

    /// Move the read position; positions past the end are allowed
    fn seek(&mut self, position: u64);

    /// Fill `buf` from the current position and advance past it
    fn read(&mut self, buf: &mut [u8]) -> CarveResult<usize>;

    /// Map the reader-relative range `[offset, offset + length)` back onto
    /// source bytes
    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket>;

    /// Release underlying resources; later reads fail
    fn release(&mut self) {}

    fn is_at_end(&self) -> bool {
        self.position() >= self.length()
    }

    /// Read `length` bytes into a freshly allocated buffer
    fn read_bytes(&mut self, length: usize) -> CarveResult<Vec<u8>> {
        let mut buf = Vec::new();
        try_reserve(&mut buf, length)?;
        buf.resize(length, 0);
        self.read(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    fn length(&self) -> u64 {
        (**self).length()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn seek(&mut self, position: u64) {
        (**self).seek(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> CarveResult<usize> {
        (**self).read(buf)
    }

    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        (**self).packet(offset, length)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
