//! Linear view over a (possibly fragmented, possibly multi-input) packet
//!
//! Logical offset 0 is the first byte of the packet. Reads walk the packet's
//! fragments and delegate each contiguous range to the shared pool.

use crate::common::ReaderPool;
use crate::error::{CarveError, CarveResult};
use crate::packet::DataPacket;

use super::Reader;

pub struct FragmentedReader {
    pool: ReaderPool,
    packet: DataPacket,
    position: u64,
    released: bool,
}

impl FragmentedReader {
    pub fn new(pool: ReaderPool, packet: DataPacket) -> Self {
        Self {
            pool,
            packet,
            position: 0,
            released: false,
        }
    }

    pub fn data_packet(&self) -> &DataPacket {
        &self.packet
    }

    pub fn pool(&self) -> &ReaderPool {
        &self.pool
    }
}

impl Reader for FragmentedReader {
    fn length(&self) -> u64 {
        self.packet.length()
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) {
        self.position = position;
    }

    fn read(&mut self, buf: &mut [u8]) -> CarveResult<usize> {
        if self.released {
            return Err(CarveError::ReaderReleased);
        }
        self.pool.read_packet(&self.packet, self.position, buf)?;
        self.position = self.position.saturating_add(buf.len() as u64);
        Ok(buf.len())
    }

    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        if self.released {
            return Err(CarveError::ReaderReleased);
        }
        self.packet.sub_packet(offset, length)
    }

    /// Only this view is released; the pool stays usable for other readers
    fn release(&mut self) {
        self.released = true;
    }
}
