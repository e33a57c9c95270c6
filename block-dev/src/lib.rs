//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备；
//! [`BlockDevice`] 是对同步读写整块的抽象，实现了此特质的类型称为**卷**。
//!
//! 上层并不直接调用卷，而是把请求交给 [`VirtualDisk`] 的请求队列，
//! 由唯一的工作线程依次完成 I/O，再通过 [`IoRequest::io_complete`] 上行通知请求者。

use std::any::Any;
use std::io;

mod mem_disk;
mod virtual_disk;

pub use self::{mem_disk::MemDisk, virtual_disk::VirtualDisk};

/// 卷特质：同步地读写一整块
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()>;
}

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// 提交给 [`VirtualDisk`] 的请求者。
///
/// 每个被提交的请求，工作线程都恰好调用一次 [`IoRequest::io_complete`]；
/// 同一请求者的请求按提交顺序完成。
pub trait IoRequest: Send + Sync {
    /// 请求所针对的块
    fn block_id(&self) -> usize;

    /// 完成上行调用：请求者在自己的锁内经由 `dev` 搬运数据，然后唤醒等待者
    fn io_complete(&self, kind: IoKind, dev: &dyn BlockDevice);
}
