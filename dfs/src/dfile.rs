use std::ops::Range;

use parking_lot::RwLock;

use crate::FileId;
use crate::layout::DiskInode;

/// inode 在磁盘上的位置：**块ID**以及**块内槽位**
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodePos {
    pub block_id: usize,
    pub slot: usize,
}

impl InodePos {
    /// 槽位在块内的字节范围
    #[inline]
    pub fn range(&self, inode_size: usize) -> Range<usize> {
        self.slot * inode_size..(self.slot + 1) * inode_size
    }
}

/// 内存中的文件句柄，由文件表独占。
/// 读写锁使同一文件上的写操作排斥其它一切读写。
#[derive(Debug)]
pub struct DFile {
    id: FileId,
    state: RwLock<DFileState>,
}

#[derive(Debug)]
pub struct DFileState {
    /// inode 的内存副本：大小与间接块列表
    pub inode: DiskInode,
    pub pos: InodePos,
    /// 已从文件表移除，之后拿到锁的操作一律失败
    pub destroyed: bool,
}

impl DFile {
    pub fn new(inode: DiskInode, pos: InodePos) -> Self {
        Self {
            id: FileId::new(inode.file_id),
            state: RwLock::new(DFileState {
                inode,
                pos,
                destroyed: false,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> &RwLock<DFileState> {
        &self.state
    }
}

impl DFileState {
    #[inline]
    pub fn size(&self) -> usize {
        self.inode.size as usize
    }
}
