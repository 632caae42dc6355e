// Unbuffered positional reader over one input (disk file or memory)

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{CarveError, CarveResult};
use crate::packet::{DataPacket, InputFile, InputSource};

use super::Reader;

pub struct SourceReader {
    input: Arc<InputFile>,
    file: Option<File>,
    position: u64,
    released: bool,
}

impl SourceReader {
    /// Open a read-only handle on `input`
    pub fn open(input: &Arc<InputFile>) -> CarveResult<Self> {
        let file = input.open_handle()?;
        Ok(Self {
            input: Arc::clone(input),
            file,
            position: 0,
            released: false,
        })
    }

    pub fn input(&self) -> &Arc<InputFile> {
        &self.input
    }

    fn read_file(&mut self, offset: u64, buf: &mut [u8]) -> CarveResult<()> {
        let input = &self.input;
        let file = self.file.as_mut().ok_or(CarveError::ReaderReleased)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| CarveError::io(input.display_path(), e))?;

        let mut total_read = 0;
        while total_read < buf.len() {
            let bytes_read = file
                .read(&mut buf[total_read..])
                .map_err(|e| CarveError::io(input.display_path(), e))?;
            if bytes_read == 0 {
                // File shrank underneath us; the remainder reads as zero
                buf[total_read..].fill(0);
                break;
            }
            total_read += bytes_read;
        }
        Ok(())
    }
}

impl Reader for SourceReader {
    fn length(&self) -> u64 {
        self.input.length()
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

        let available = self
            .length()
            .saturating_sub(self.position)
            .min(buf.len() as u64) as usize;

        if available > 0 {
            let offset = self.position;
            let input = Arc::clone(&self.input);
            match input.source() {
                InputSource::Memory(bytes) => {
                    let start = offset as usize;
                    buf[..available].copy_from_slice(&bytes[start..start + available]);
                }
                InputSource::Path(_) => self.read_file(offset, &mut buf[..available])?,
            }
        }
        buf[available..].fill(0);

        self.position = self.position.saturating_add(buf.len() as u64);
        Ok(buf.len())
    }

    fn packet(&self, offset: u64, length: u64) -> CarveResult<DataPacket> {
        if self.released {
            return Err(CarveError::ReaderReleased);
        }
        DataPacket::new(&self.input, offset, length)
    }

    fn release(&mut self) {
        self.file = None;
        self.released = true;
    }
}
