// Cancellation decorator
//
// Every read first checks the caller's cancellation flag, so a long scan
// unwinds at read granularity.

use crate::cancel::CancelToken;
use crate::error::CarveResult;
use crate::packet::DataPacket;

use super::Reader;

pub struct CancellableReader<R: Reader> {
    inner: R,
    cancel: CancelToken,
}

impl<R: Reader> CancellableReader<R> {
    pub fn new(inner: R, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl<R: Reader> Reader for CancellableReader<R> {
    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn seek(&mut self, position: u64) {
        self.inner.seek(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> CarveResult<usize> {
        self.cancel.check()?;
        self.inner.read(buf)
    }

    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        self.inner.packet(offset, length)
    }

    fn release(&mut self) {
        self.inner.release()
    }
}
