// Shared reader pool for the inputs a scan touches
//
// Keeps at most one decorated reader (buffering + cancellation) per input,
// with LRU eviction so scans over many inputs never exceed the OS file
// descriptor limit. A pool is a cheap clone handle: readers nested inside
// observer callbacks share the pool of the outer scan.
//
// Not thread safe. Parallel scans each build their own pool.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::config::CarveConfig;
use crate::error::{CarveError, CarveResult};
use crate::packet::{DataPacket, InputFile};
use crate::reader::{BufferStats, BufferedReader, CancellableReader, Reader, SourceReader};

type PooledReader = CancellableReader<BufferedReader<SourceReader>>;

struct PoolState {
    /// Open readers keyed by input id
    readers: HashMap<u64, PooledReader>,
    /// LRU queue of input ids, most recent at the front
    lru_queue: VecDeque<u64>,
    max_open: usize,
    buffer_size: usize,
    read_back: usize,
    cancel: CancelToken,
    opened: u64,
    released: bool,
}

impl PoolState {
    fn reader(&mut self, input: &Arc<InputFile>) -> CarveResult<&mut PooledReader> {
        if self.released {
            return Err(CarveError::ReaderReleased);
        }
        let id = input.id();

        if self.readers.contains_key(&id) {
            self.lru_queue.retain(|&x| x != id);
            self.lru_queue.push_front(id);
            trace!(input = id, "Pooled reader hit");
        } else {
            if self.readers.len() >= self.max_open {
                if let Some(lru_id) = self.lru_queue.pop_back() {
                    trace!(input = lru_id, "Evicting LRU reader");
                    if let Some(mut evicted) = self.readers.remove(&lru_id) {
                        evicted.release();
                    }
                }
            }

            debug!(input = id, name = input.name(), "Opening pooled reader");
            let source = SourceReader::open(input)?;
            let buffered = BufferedReader::with_read_back(source, self.buffer_size, self.read_back)?;
            self.readers
                .insert(id, CancellableReader::new(buffered, self.cancel.clone()));
            self.lru_queue.push_front(id);
            self.opened += 1;
        }

        self.readers
            .get_mut(&id)
            .ok_or_else(|| CarveError::InvalidArgument(format!("input {} not pooled", id)))
    }
}

/// Clone handle to a shared set of per-input readers
#[derive(Clone)]
pub struct ReaderPool {
    state: Rc<RefCell<PoolState>>,
}

impl ReaderPool {
    pub fn new(config: &CarveConfig, cancel: CancelToken) -> Self {
        Self {
            state: Rc::new(RefCell::new(PoolState {
                readers: HashMap::new(),
                lru_queue: VecDeque::new(),
                max_open: config.max_open_readers.max(1),
                buffer_size: config.buffer_size,
                read_back: config.read_back_bytes(),
                cancel,
                opened: 0,
                released: false,
            })),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.state.borrow().cancel.clone()
    }

    /// Fill `buf` from absolute `offset` of `input`
    pub fn read_at(&self, input: &Arc<InputFile>, offset: u64, buf: &mut [u8]) -> CarveResult<()> {
        let mut state = self.state.borrow_mut();
        let reader = state.reader(input)?;
        reader.seek(offset);
        reader.read(buf)?;
        Ok(())
    }

    /// Fill `buf` from logical `offset` of `packet`, fragment by fragment
    ///
    /// Bytes past the end of the packet read as zero.
    pub fn read_packet(&self, packet: &DataPacket, offset: u64, buf: &mut [u8]) -> CarveResult<()> {
        let mut done = 0usize;
        let mut position = offset;

        while done < buf.len() && position < packet.length() {
            let fragment = packet.fragment_at(position)?;
            let (input, start, length) = fragment
                .as_leaf()
                .ok_or_else(|| CarveError::InvalidArgument("fragment is not contiguous".into()))?;
            let count = length.min((buf.len() - done) as u64) as usize;
            self.read_at(input, start, &mut buf[done..done + count])?;
            done += count;
            position += count as u64;
        }

        buf[done..].fill(0);
        Ok(())
    }

    /// Number of currently open readers
    pub fn open_count(&self) -> usize {
        self.state.borrow().readers.len()
    }

    /// Total readers opened over the pool's lifetime, including evicted ones
    pub fn opened_total(&self) -> u64 {
        self.state.borrow().opened
    }

    pub fn buffer_stats(&self, input: &InputFile) -> Option<BufferStats> {
        self.state
            .borrow()
            .readers
            .get(&input.id())
            .map(|reader| reader.inner().stats())
    }

    /// Release every reader the pool opened; later reads fail
    pub fn release(&self) {
        let mut state = self.state.borrow_mut();
        for (_, mut reader) in state.readers.drain() {
            reader.release();
        }
        state.lru_queue.clear();
        state.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }
}
