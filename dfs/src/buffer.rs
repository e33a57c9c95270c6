//! # 缓冲区
//!
//! 一个 [`Buffer`] 是某一块在内存中的影子。它的数据与状态位由自身的锁保护，
//! 磁盘工作线程的完成上行调用与读写操作在这把锁下互斥，
//! 所以调用者不会看到写了一半的缓冲区。
//!
//! 状态机：
//!
//! ```text
//! Invalid --start_fetch--> Fetching --完成--> ValidClean
//! ValidClean/ValidDirty --start_push--> Pushing --完成--> ValidClean
//! 任意状态 --write--> ValidDirty
//! ```

use std::sync::Arc;

use block_dev::{BlockDevice, IoKind, IoRequest, VirtualDisk};
use enumflags2::{BitFlags, bitflags};
use parking_lot::{Condvar, Mutex};

use crate::BufferError;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufFlag {
    /// 数据与磁盘一致或比磁盘更新
    Valid = 0b001,
    /// 上次刷写后被修改过
    Dirty = 0b010,
    /// I/O 进行中
    Busy = 0b100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufState {
    Invalid,
    Fetching,
    ValidClean,
    ValidDirty,
    Pushing,
}

pub struct Buffer {
    block_id: usize,
    disk: Arc<VirtualDisk>,
    inner: Mutex<BufferInner>,
    /// 任一状态位变化时广播
    cond: Condvar,
}

struct BufferInner {
    data: Box<[u8]>,
    flags: BitFlags<BufFlag>,
    /// 结束标记：此位置及之后的字节不属于最近一次写入
    end: usize,
    /// 通过 `BlockCache::get_block` 取得而尚未归还的次数
    holds: usize,
}

impl core::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Buffer")
            .field("block_id", &self.block_id)
            .field("flags", &inner.flags)
            .field("end", &inner.end)
            .field("holds", &inner.holds)
            .finish()
    }
}

impl Buffer {
    /// 内容未知的缓冲区，需要 [`Buffer::start_fetch`]
    pub fn new(block_id: usize, block_size: usize, disk: Arc<VirtualDisk>) -> Self {
        Self::with_flags(block_id, block_size, disk, BitFlags::empty())
    }

    /// 全零且干净的缓冲区，用于从未写过的空闲块
    pub fn zeroed(block_id: usize, block_size: usize, disk: Arc<VirtualDisk>) -> Self {
        Self::with_flags(block_id, block_size, disk, BufFlag::Valid.into())
    }

    fn with_flags(
        block_id: usize,
        block_size: usize,
        disk: Arc<VirtualDisk>,
        flags: BitFlags<BufFlag>,
    ) -> Self {
        Self {
            block_id,
            disk,
            inner: Mutex::new(BufferInner {
                data: vec![0; block_size].into_boxed_slice(),
                flags,
                end: block_size,
                holds: 0,
            }),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn block_id(&self) -> usize {
        self.block_id
    }

    pub fn state(&self) -> BufState {
        let flags = self.inner.lock().flags;
        match (
            flags.contains(BufFlag::Valid),
            flags.contains(BufFlag::Dirty),
            flags.contains(BufFlag::Busy),
        ) {
            (false, _, false) => BufState::Invalid,
            (false, _, true) => BufState::Fetching,
            (true, _, true) => BufState::Pushing,
            (true, false, false) => BufState::ValidClean,
            (true, true, false) => BufState::ValidDirty,
        }
    }

    /// 发起异步读取。已有有效数据或 I/O 进行中时什么也不做。
    pub fn start_fetch(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.flags.intersects(BufFlag::Valid | BufFlag::Busy) {
                return;
            }
            inner.flags.insert(BufFlag::Busy);
        }
        self.disk.submit(self.clone(), IoKind::Read);
    }

    /// 发起异步写回；干净的缓冲区立即返回。
    /// 已排队的写回尚未执行时，之后的修改会随它一起落盘。
    pub fn start_push(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if !inner.flags.contains(BufFlag::Valid | BufFlag::Dirty)
                || inner.flags.contains(BufFlag::Busy)
            {
                return;
            }
            inner.flags.insert(BufFlag::Busy);
        }
        self.disk.submit(self.clone(), IoKind::Write);
    }

    #[inline]
    pub fn check_valid(&self) -> bool {
        self.inner.lock().flags.contains(BufFlag::Valid)
    }

    #[inline]
    pub fn check_clean(&self) -> bool {
        !self.inner.lock().flags.contains(BufFlag::Dirty)
    }

    /// I/O 进行中或被持有，不可淘汰
    #[inline]
    pub fn is_busy(&self) -> bool {
        let inner = self.inner.lock();
        inner.flags.contains(BufFlag::Busy) || inner.holds > 0
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.inner.lock().holds > 0
    }

    /// 阻塞直到数据有效
    pub fn wait_valid(&self) {
        let mut inner = self.inner.lock();
        while !inner.flags.contains(BufFlag::Valid) {
            self.cond.wait(&mut inner);
        }
    }

    /// 阻塞直到数据干净
    pub fn wait_clean(&self) {
        let mut inner = self.inner.lock();
        while inner.flags.contains(BufFlag::Dirty) {
            self.cond.wait(&mut inner);
        }
    }

    /// 阻塞直到没有 I/O 在途
    pub fn wait_idle(&self) {
        let mut inner = self.inner.lock();
        while inner.flags.contains(BufFlag::Busy) {
            self.cond.wait(&mut inner);
        }
    }

    /// 写回并等到干净为止。
    /// 在途的读取结束后可能仍然是脏的，所以多试几轮；设备持续出错时放弃。
    pub fn flush(self: &Arc<Self>) {
        const ATTEMPTS: usize = 4;

        for _ in 0..ATTEMPTS {
            self.start_push();
            self.wait_idle();
            if !self.inner.lock().flags.contains(BufFlag::Valid | BufFlag::Dirty) {
                return;
            }
        }
        log::warn!("block {} is still dirty after flushing", self.block_id);
    }

    /// 从块内 `pos` 处读出至多 `count` 字节到 `buf[offset..]`。
    /// 遇到结束标记时提前停止，返回已读字节数。
    pub fn read(
        &self,
        pos: usize,
        buf: &mut [u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, BufferError> {
        check_bounds(buf.len(), offset, count)?;

        let inner = self.inner.lock();
        if pos > inner.data.len() {
            return Err(BufferError::OutOfBounds);
        }
        if !inner.flags.contains(BufFlag::Valid) {
            return Err(BufferError::Invalid);
        }

        let len = count
            .min(inner.data.len() - pos)
            .min(inner.end.saturating_sub(pos));
        buf[offset..offset + len].copy_from_slice(&inner.data[pos..pos + len]);
        Ok(len)
    }

    /// 把 `buf[offset..offset + count]` 写到块内 `pos` 处，超出块尾的部分被截去。
    /// 写入没有到达块尾时，其后的字节清零并在写入末尾放置结束标记。
    pub fn write(
        &self,
        pos: usize,
        buf: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, BufferError> {
        check_bounds(buf.len(), offset, count)?;

        let mut inner = self.inner.lock();
        let block_size = inner.data.len();
        if pos > block_size {
            return Err(BufferError::OutOfBounds);
        }

        let len = count.min(block_size - pos);
        inner.data[pos..pos + len].copy_from_slice(&buf[offset..offset + len]);
        if pos + len < block_size {
            inner.data[pos + len..].fill(0);
            inner.end = pos + len;
        }
        inner.flags.insert(BufFlag::Valid | BufFlag::Dirty);
        self.cond.notify_all();

        Ok(len)
    }

    /// 清零 `len` 之后的字节并把结束标记放在 `len`
    pub fn truncate(&self, len: usize) {
        let mut inner = self.inner.lock();
        let len = len.min(inner.data.len());
        inner.data[len..].fill(0);
        inner.end = len;
        inner.flags.insert(BufFlag::Valid | BufFlag::Dirty);
        self.cond.notify_all();
    }

    /// 整块清零
    pub fn zeroize(&self) {
        let mut inner = self.inner.lock();
        inner.data.fill(0);
        inner.end = inner.data.len();
        inner.flags.insert(BufFlag::Valid | BufFlag::Dirty);
        self.cond.notify_all();
    }

    /// 以只读方式访问整块数据
    #[inline]
    pub fn map<V>(&self, f: impl FnOnce(&[u8]) -> V) -> V {
        f(&self.inner.lock().data)
    }

    /// 以可写方式访问整块数据，之后缓冲区为有效且脏
    pub fn map_mut<V>(&self, f: impl FnOnce(&mut [u8]) -> V) -> V {
        let mut inner = self.inner.lock();
        let value = f(&mut inner.data);
        inner.end = inner.data.len();
        inner.flags.insert(BufFlag::Valid | BufFlag::Dirty);
        self.cond.notify_all();
        value
    }
}

impl Buffer {
    #[inline]
    pub(crate) fn hold(&self) {
        self.inner.lock().holds += 1;
    }

    pub(crate) fn unhold(&self) {
        let mut inner = self.inner.lock();
        match inner.holds.checked_sub(1) {
            Some(holds) => inner.holds = holds,
            None => log::error!("block {} released more often than held", self.block_id),
        }
    }
}

impl IoRequest for Buffer {
    fn block_id(&self) -> usize {
        self.block_id
    }

    fn io_complete(&self, kind: IoKind, dev: &dyn BlockDevice) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match kind {
            IoKind::Read => {
                // 读取途中被整块写过，磁盘上的旧数据不再需要
                if !inner.flags.contains(BufFlag::Valid) {
                    if let Err(err) = dev.read_block(self.block_id, &mut inner.data) {
                        log::error!("failed to read block {}: {err}", self.block_id);
                    }
                    inner.end = inner.data.len();
                }
                inner.flags.insert(BufFlag::Valid);
            }
            IoKind::Write => match dev.write_block(self.block_id, &inner.data) {
                Ok(()) => inner.flags.remove(BufFlag::Dirty),
                Err(err) => log::error!("failed to write block {}: {err}", self.block_id),
            },
        }

        inner.flags.remove(BufFlag::Busy);
        log::trace!("block {} {kind:?} complete", self.block_id);
        self.cond.notify_all();
    }
}

/// 检查 `[offset, offset + count)` 是否落在长度为 `len` 的缓冲区内
#[inline]
fn check_bounds(len: usize, offset: usize, count: usize) -> Result<(), BufferError> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(BufferError::OutOfBounds),
    }
}
