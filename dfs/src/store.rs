//! # 文件接口层
//!
//! 文件没有名字也没有目录，只以一个小整数 [`FileId`] 标识，取值 `1..=max_dfiles`。

use derive_more::{Display, From, Into};

use crate::DfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[display(fmt = "#{}", _0)]
#[repr(transparent)]
pub struct FileId(u32);

impl FileId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// 并发安全的文件存储。
///
/// `read`/`write` 的 `offset`、`count` 同时指定调用者缓冲区与文件中的区间：
/// 文件字节 `[offset, offset + count)` 对应 `buf[offset..offset + count]`。
pub trait FileStore: Send + Sync {
    /// 创建空文件；文件数已达上限时返回 `None`
    fn create_dfile(&self) -> Option<FileId>;

    /// 销毁文件并归还它的全部块；未知 ID 仅记录警告
    fn destroy_dfile(&self, id: FileId);

    /// 返回实际读出的字节数
    fn read(&self, id: FileId, buf: &mut [u8], offset: usize, count: usize)
    -> Result<usize, DfsError>;

    /// 写入后文件大小恰为 `offset + count`，返回写入的字节数
    fn write(&self, id: FileId, buf: &[u8], offset: usize, count: usize) -> Result<usize, DfsError>;

    fn size_dfile(&self, id: FileId) -> Option<usize>;

    fn list_all_dfiles(&self) -> Vec<FileId>;

    /// 把所有脏块交给磁盘，不等待完成
    fn sync(&self);
}
