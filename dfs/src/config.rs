//! 卷的几何参数

use crate::ConfigError;

/// 块 ID 以大端 int32 存放，因此卷最多这么多块
const MAX_ADDRESSABLE_BLOCKS: usize = i32::MAX as usize;

/// inode 头部：文件 ID 与文件大小各占 4 字节
const INODE_HEADER: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsConfig {
    /// 块的字节数
    pub block_size: usize,
    /// 卷的总块数
    pub num_blocks: usize,
    /// 单个 inode 记录的字节数
    pub inode_size: usize,
    /// 块缓存的容量（块数）
    pub cache_blocks: usize,
    /// 文件大小上限（字节）
    pub max_file_size: usize,
    /// 同时存活的文件数上限，亦即文件 ID 的上限
    pub max_dfiles: usize,
}

impl Default for DfsConfig {
    fn default() -> Self {
        const BLOCK_SIZE: usize = 1024;
        Self {
            block_size: BLOCK_SIZE,
            num_blocks: 262_144,
            inode_size: 32,
            cache_blocks: 65_536,
            max_file_size: BLOCK_SIZE * 500,
            max_dfiles: 512,
        }
    }
}

impl DfsConfig {
    #[inline]
    pub fn inodes_per_block(&self) -> usize {
        self.block_size / self.inode_size
    }

    /// inode 区域占据的块数，从 1 号块开始
    #[inline]
    pub fn inode_region_size(&self) -> usize {
        self.max_dfiles.div_ceil(self.inodes_per_block())
    }

    /// 第一个可分配的块
    #[inline]
    pub fn first_data_block(&self) -> usize {
        self.inode_region_size() + 1
    }

    #[inline]
    pub fn is_inode_block(&self, block_id: usize) -> bool {
        (1..=self.inode_region_size()).contains(&block_id)
    }

    /// 一个间接块能容纳多少个块 ID
    #[inline]
    pub fn ids_per_block(&self) -> usize {
        self.block_size / 4
    }

    /// inode 内可记录的间接块 ID 个数
    #[inline]
    pub fn inode_indirect_slots(&self) -> usize {
        (self.inode_size - INODE_HEADER) / 4
    }

    /// 容纳 `size` 字节需要多少个数据块
    #[inline]
    pub fn data_blocks_for(&self, size: usize) -> usize {
        size.div_ceil(self.block_size)
    }

    /// 容纳 `size` 字节需要多少个间接块
    #[inline]
    pub fn indirect_blocks_for(&self, size: usize) -> usize {
        self.data_blocks_for(size).div_ceil(self.ids_per_block())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || self.block_size % 4 != 0 {
            return Err(ConfigError::BlockSize(self.block_size));
        }
        if self.inode_size < INODE_HEADER + 4
            || self.inode_size % 4 != 0
            || self.inode_size > self.block_size
        {
            return Err(ConfigError::InodeSize(self.inode_size));
        }
        if self.max_dfiles == 0 {
            return Err(ConfigError::NoFiles);
        }
        if self.num_blocks > MAX_ADDRESSABLE_BLOCKS {
            return Err(ConfigError::TooManyBlocks(self.num_blocks));
        }
        if self.first_data_block() >= self.num_blocks {
            return Err(ConfigError::NoDataRegion {
                num_blocks: self.num_blocks,
                inode_region: self.inode_region_size(),
            });
        }

        let needed = self.indirect_blocks_for(self.max_file_size);
        if needed > self.inode_indirect_slots() {
            return Err(ConfigError::FileTooLargeForInode {
                needed,
                slots: self.inode_indirect_slots(),
            });
        }

        // inode 区域常驻缓存，至少还要留出一块周转
        if self.cache_blocks <= self.inode_region_size() {
            return Err(ConfigError::CacheTooSmall {
                cache_blocks: self.cache_blocks,
                pinned: self.inode_region_size(),
            });
        }

        Ok(())
    }
}
