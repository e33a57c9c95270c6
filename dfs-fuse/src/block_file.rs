use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use block_dev::BlockDevice;
use parking_lot::Mutex;

/// 以宿主机上的一个普通文件充当卷，块按编号顺序排列
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    block_size: usize,
    num_blocks: usize,
}

impl BlockFile {
    /// 创建（或截断）镜像文件并定好长度
    pub fn create(path: &Path, block_size: usize, num_blocks: usize) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len((block_size * num_blocks) as u64)?;

        Ok(Self::new(fd, block_size, num_blocks))
    }

    /// 打开已有的镜像文件，长度必须恰好容纳全部块
    pub fn open(path: &Path, block_size: usize, num_blocks: usize) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        let len = fd.metadata()?.len();
        if len != (block_size * num_blocks) as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image holds {len} bytes, expected {num_blocks} blocks of {block_size}"),
            ));
        }

        Ok(Self::new(fd, block_size, num_blocks))
    }

    pub fn new(fd: File, block_size: usize, num_blocks: usize) -> Self {
        Self {
            file: Mutex::new(fd),
            block_size,
            num_blocks,
        }
    }

    fn seek_to(&self, file: &mut File, block_id: usize, len: usize) -> io::Result<()> {
        if len != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a complete block!",
            ));
        }
        if block_id >= self.num_blocks {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {block_id} lies beyond the image"),
            ));
        }

        file.seek(SeekFrom::Start((block_id * self.block_size) as u64))?;
        Ok(())
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        self.seek_to(&mut file, block_id, buf.len())?;
        file.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        self.seek_to(&mut file, block_id, buf.len())?;
        file.write_all(buf)
    }
}
