//! inode 记录：
//! - 文件 ID（0 表示空槽位）
//! - 文件大小（字节）
//! - 若干间接块编号，从第一个槽位起连续存放，其后补零
//!
//! 间接块个数由文件大小决定：`ceil(ceil(size / BLOCK_SIZE) / (BLOCK_SIZE / 4))`。

use std::sync::Arc;

use super::{encode_indirect, get_u32, put_u32};
use crate::{Buffer, DfsConfig, MapError};

/// 文件 ID 所在字
const FILE_ID: usize = 0;
/// 文件大小所在字
const FILE_SIZE: usize = 1;
/// 间接块编号的起始字
const INDIRECT_START: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    pub file_id: u32,
    pub size: u32,
    /// 间接块编号，按文件顺序
    pub indirect: Vec<u32>,
}

impl DiskInode {
    /// 空文件
    #[inline]
    pub fn new(file_id: u32) -> Self {
        Self {
            file_id,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.file_id == 0
    }

    /// 从一条 inode 记录解码，跳过为零的间接块槽位
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            file_id: get_u32(raw, FILE_ID),
            size: get_u32(raw, FILE_SIZE),
            indirect: (INDIRECT_START..raw.len() / 4)
                .map(|index| get_u32(raw, index))
                .filter(|&block_id| block_id != 0)
                .collect(),
        }
    }

    /// 编码到一条 inode 记录，覆盖整个槽位
    pub fn encode(&self, raw: &mut [u8]) {
        debug_assert!(self.indirect.len() <= raw.len() / 4 - INDIRECT_START);
        raw.fill(0);
        put_u32(raw, FILE_ID, self.file_id);
        put_u32(raw, FILE_SIZE, self.size);
        for (index, &block_id) in self.indirect.iter().enumerate() {
            put_u32(raw, INDIRECT_START + index, block_id);
        }
    }

    /// 当前大小需要的间接块个数
    #[inline]
    pub fn count_indirect_block(&self, config: &DfsConfig) -> usize {
        config.indirect_blocks_for(self.size as usize)
    }

    /// 把数据块编号按每块 `BLOCK_SIZE / 4` 个分组，依次写入间接块，
    /// 再用这些间接块的编号改写 inode 自身的列表。
    ///
    /// 间接块个数必须恰好符合当前大小，数据块不能超出它们的容量。
    pub fn map_file(
        &mut self,
        indirect: &[Arc<Buffer>],
        data: &[u32],
        config: &DfsConfig,
    ) -> Result<(), MapError> {
        let expected = self.count_indirect_block(config);
        if indirect.len() != expected {
            return Err(MapError::IndirectCount {
                expected,
                found: indirect.len(),
            });
        }

        let capacity = indirect.len() * config.ids_per_block();
        if data.len() > capacity {
            return Err(MapError::TooManyDataBlocks {
                capacity,
                found: data.len(),
            });
        }

        let mut chunks = data.chunks(config.ids_per_block());
        for buffer in indirect {
            let chunk = chunks.next().unwrap_or_default();
            buffer.map_mut(|raw| encode_indirect(chunk, raw));
        }
        self.indirect = indirect
            .iter()
            .map(|buffer| buffer.block_id() as u32)
            .collect();

        Ok(())
    }
}
