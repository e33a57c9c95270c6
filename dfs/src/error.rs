use std::io;

use thiserror::Error;

use crate::FileId;

/// 缓冲区读写的两种失败
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("range lies outside the caller's buffer")]
    OutOfBounds,
    #[error("buffer does not hold valid data")]
    Invalid,
}

/// 建立间接映射时违反约定
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    #[error("file needs {expected} indirect blocks, {found} supplied")]
    IndirectCount { expected: usize, found: usize },
    #[error("{found} data blocks exceed the {capacity} the indirect blocks can address")]
    TooManyDataBlocks { capacity: usize, found: usize },
}

/// 客户操作可能返回的错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DfsError {
    #[error("no such file: {0}")]
    UnknownFile(FileId),
    #[error("offset and count lie outside the caller's buffer")]
    OutOfBounds,
    #[error("file would grow to {0} bytes, beyond the size limit")]
    FileTooLarge(usize),
    #[error("write needs {needed} free blocks, only {available} left")]
    NoSpace { needed: usize, available: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// 挂载时发现的不一致，一律致命
#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device error: {0}")]
    Io(#[from] io::Error),
    #[error("inode at block {block} slot {slot} holds invalid file id {id}")]
    InvalidFileId { block: usize, slot: usize, id: u32 },
    #[error("file {id} claims {size} bytes, beyond the size limit")]
    FileTooLarge { id: FileId, size: usize },
    #[error("file id {0} is claimed by two inodes")]
    DuplicateFileId(FileId),
    #[error("inode of file {0} does not match its size")]
    CorruptInode(FileId),
    #[error("file {file} maps block {block}, outside the data region")]
    BlockOutOfRange { file: FileId, block: usize },
    #[error("block {block} of file {file} is already mapped")]
    DoubleMapped { file: FileId, block: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("block size {0} is not a positive multiple of 4")]
    BlockSize(usize),
    #[error("inode size {0} cannot hold a header and an indirect id within one block")]
    InodeSize(usize),
    #[error("at least one file must be allowed")]
    NoFiles,
    #[error("{0} blocks cannot be addressed by int32 block ids")]
    TooManyBlocks(usize),
    #[error("{num_blocks} blocks leave no room after {inode_region} inode blocks")]
    NoDataRegion { num_blocks: usize, inode_region: usize },
    #[error("largest file needs {needed} indirect blocks, inode holds {slots}")]
    FileTooLargeForInode { needed: usize, slots: usize },
    #[error("cache of {cache_blocks} blocks cannot hold {pinned} pinned inode blocks")]
    CacheTooSmall { cache_blocks: usize, pinned: usize },
}
