//! Adaptive read-ahead / read-back buffer
//!
//! Wraps any [`Reader`] with one fixed-size buffer. The direction of access
//! is inferred from where a read lands relative to the buffered window:
//!
//! - **forward shift**: the read starts inside (or just past) the window;
//!   keep a read-back margin, move the tail to the front, fetch only the
//!   missing forward bytes
//! - **backward shift**: the read ends just before or inside the window;
//!   move the head right, fetch only the missing leading bytes
//! - **replacement**: no usable overlap; the old window is parked in a
//!   one-slot discard so a seek straight back restores it without I/O
//!
//! Bytes past the end of input are buffered as zero padding.

use tracing::trace;

use crate::config::{CarveConfig, DEFAULT_READ_BACK_DIVISOR, MIN_BUFFER_SIZE};
use crate::error::{try_reserve, CarveError, CarveResult};
use crate::packet::DataPacket;

use super::Reader;

/// Counters for how refills were satisfied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub forward_shifts: u64,
    pub backward_shifts: u64,
    pub replacements: u64,
    pub restores: u64,
    /// Reads larger than the buffer, served directly
    pub bypasses: u64,
    /// Bytes requested from the wrapped reader
    pub bytes_fetched: u64,
}

struct Discarded {
    buffer: Vec<u8>,
    start: u64,
}

pub struct BufferedReader<R: Reader> {
    inner: Option<R>,
    length: u64,
    position: u64,
    buffer: Vec<u8>,
    /// Absolute offset of `buffer[0]`
    buffer_start: u64,
    /// Buffered bytes, either 0 (nothing loaded yet) or the full buffer
    valid: usize,
    /// Trailing zero bytes past end of input
    padding: usize,
    discarded: Option<Discarded>,
    read_back: usize,
    stats: BufferStats,
}

fn allocate(size: usize) -> CarveResult<Vec<u8>> {
    let mut buffer = Vec::new();
    try_reserve(&mut buffer, size)?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Fill `dst` from absolute `offset`, zero-filling past `length`
fn fetch<R: Reader>(
    inner: &mut R,
    length: u64,
    stats: &mut BufferStats,
    dst: &mut [u8],
    offset: u64,
) -> CarveResult<()> {
    let available = length.saturating_sub(offset).min(dst.len() as u64) as usize;
    if available > 0 {
        inner.seek(offset);
        inner.read(&mut dst[..available])?;
        stats.bytes_fetched += available as u64;
    }
    dst[available..].fill(0);
    Ok(())
}

impl<R: Reader> BufferedReader<R> {
    /// Buffer `inner` with `buffer_size` bytes and the default read-back margin
    pub fn new(inner: R, buffer_size: usize) -> CarveResult<Self> {
        Self::with_read_back(inner, buffer_size, buffer_size / DEFAULT_READ_BACK_DIVISOR)
    }

    /// Buffer `inner` using the sizes from `config`
    pub fn with_config(inner: R, config: &CarveConfig) -> CarveResult<Self> {
        Self::with_read_back(inner, config.buffer_size, config.read_back_bytes())
    }

    pub fn with_read_back(inner: R, buffer_size: usize, read_back: usize) -> CarveResult<Self> {
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(CarveError::BufferTooSmall {
                requested: buffer_size,
                minimum: MIN_BUFFER_SIZE,
            });
        }

        let length = inner.length();
        Ok(Self {
            inner: Some(inner),
            length,
            position: 0,
            buffer: allocate(buffer_size)?,
            buffer_start: 0,
            valid: 0,
            padding: 0,
            discarded: None,
            read_back: read_back.min(buffer_size / 2),
            stats: BufferStats::default(),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Trailing zero bytes in the current window
    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn inner(&self) -> Option<&R> {
        self.inner.as_ref()
    }

    fn covers(&self, position: u64, count: usize) -> bool {
        self.valid > 0
            && position >= self.buffer_start
            && position.saturating_add(count as u64) <= self.buffer_start + self.valid as u64
    }

    fn update_padding(&mut self) {
        let end = self.buffer_start + self.valid as u64;
        self.padding = end.saturating_sub(self.length.max(self.buffer_start)) as usize;
    }

    /// Swap the discarded window back in when it contains `position`
    fn restore_discarded(&mut self, position: u64) -> bool {
        let hit = matches!(
            &self.discarded,
            Some(d) if position >= d.start && position < d.start + d.buffer.len() as u64
        );
        if !hit {
            return false;
        }

        if let Some(mut parked) = self.discarded.take() {
            std::mem::swap(&mut self.buffer, &mut parked.buffer);
            let restored_start = parked.start;
            if self.valid > 0 {
                parked.start = self.buffer_start;
                self.discarded = Some(parked);
            }
            self.buffer_start = restored_start;
            self.valid = self.buffer.len();
            self.stats.restores += 1;
            self.update_padding();
            trace!(start = restored_start, "Restored discarded buffer");
        }
        true
    }

    fn refill(&mut self, position: u64, count: usize) -> CarveResult<()> {
        if self.restore_discarded(position) && self.covers(position, count) {
            return Ok(());
        }

        let capacity = self.buffer.len();
        let cap = capacity as u64;
        let want_end = position + count as u64;
        let read_back = self.read_back as u64;
        let inner = self.inner.as_mut().ok_or(CarveError::ReaderReleased)?;

        if self.valid > 0 {
            let old_start = self.buffer_start;
            let old_end = old_start + cap;

            if position >= old_start {
                let new_start = old_start
                    .max(position.saturating_sub(read_back))
                    .max(want_end.saturating_sub(cap));
                if new_start < old_end {
                    let keep_from = (new_start - old_start) as usize;
                    let keep = capacity - keep_from;
                    self.buffer.copy_within(keep_from.., 0);
                    fetch(inner, self.length, &mut self.stats, &mut self.buffer[keep..], old_end)?;
                    self.buffer_start = new_start;
                    self.stats.forward_shifts += 1;
                    self.update_padding();
                    trace!(new_start, kept = keep, "Buffer shifted forward");
                    return Ok(());
                }
            } else {
                let new_end = (old_start + read_back).max(want_end).min(old_end);
                let new_start = new_end.saturating_sub(cap);
                if new_start <= position && new_start + cap > old_start {
                    let shift = (old_start - new_start) as usize;
                    self.buffer.copy_within(..capacity - shift, shift);
                    fetch(inner, self.length, &mut self.stats, &mut self.buffer[..shift], new_start)?;
                    self.buffer_start = new_start;
                    self.stats.backward_shifts += 1;
                    self.update_padding();
                    trace!(new_start, fetched = shift, "Buffer shifted backward");
                    return Ok(());
                }
            }

            // No usable overlap: park the current window
            let spare = match self.discarded.take() {
                Some(parked) => parked.buffer,
                None => allocate(capacity)?,
            };
            let old = std::mem::replace(&mut self.buffer, spare);
            self.discarded = Some(Discarded {
                buffer: old,
                start: old_start,
            });
        }

        let new_start = position
            .saturating_sub(read_back)
            .max(want_end.saturating_sub(cap));
        fetch(inner, self.length, &mut self.stats, &mut self.buffer[..], new_start)?;
        self.buffer_start = new_start;
        self.valid = capacity;
        self.stats.replacements += 1;
        self.update_padding();
        trace!(new_start, "Buffer replaced");
        Ok(())
    }
}

impl<R: Reader> Reader for BufferedReader<R> {
    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) {
        self.position = position;
    }

    fn read(&mut self, buf: &mut [u8]) -> CarveResult<usize> {
        if self.inner.is_none() {
            return Err(CarveError::ReaderReleased);
        }
        let count = buf.len();
        if count == 0 {
            return Ok(0);
        }

        if self.position >= self.length {
            // Entirely past the end: zeros, buffer untouched
            buf.fill(0);
        } else if count > self.buffer.len() {
            let inner = self.inner.as_mut().ok_or(CarveError::ReaderReleased)?;
            fetch(inner, self.length, &mut self.stats, buf, self.position)?;
            self.stats.bypasses += 1;
        } else {
            if !self.covers(self.position, count) {
                self.refill(self.position, count)?;
            }
            let offset = (self.position - self.buffer_start) as usize;
            buf.copy_from_slice(&self.buffer[offset..offset + count]);
        }

        self.position = self.position.saturating_add(count as u64);
        Ok(count)
    }

    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        self.inner
            .as_ref()
            .ok_or(CarveError::ReaderReleased)?
            .packet(offset, length)
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release();
        }
        self.buffer = Vec::new();
        self.discarded = None;
        self.valid = 0;
    }
}
