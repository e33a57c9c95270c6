use std::io;
use std::ops::Range;

use parking_lot::Mutex;

use crate::BlockDevice;

/// 内存中的卷，容量固定为 `num_blocks` 个块
#[derive(Debug)]
pub struct MemDisk {
    block_size: usize,
    data: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        Self {
            block_size,
            data: Mutex::new(vec![0; block_size * num_blocks]),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }

    /// 块在整个卷中的字节范围
    fn range(&self, block_id: usize, len: usize) -> io::Result<Range<usize>> {
        if len != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer of {len} bytes is not a complete block"),
            ));
        }
        let start = block_id * self.block_size;
        if start + len > self.data.lock().len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {block_id} lies beyond the volume"),
            ));
        }
        Ok(start..start + len)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let range = self.range(block_id, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
