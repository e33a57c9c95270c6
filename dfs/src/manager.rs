//! # 文件管理器层
//!
//! [`Dfs`] 持有文件表与块缓存，实现 [`FileStore`]。
//!
//! 文件表只决定成员关系：操作先在表锁下找到文件句柄，随即放开表锁，
//! 再在句柄自身的读写锁下完成真正的工作。
//!
//! 挂载时扫描整个 inode 区域，重建文件表与空闲块集合，
//! 任何不一致都会使挂载失败。

use std::collections::BTreeMap;
use std::sync::Arc;

use block_dev::{BlockDevice, VirtualDisk};

use crate::layout::{DiskInode, decode_indirect};
use crate::{
    BlockCache, DFile, DfsConfig, DfsError, FileId, FileStore, InodePos, MountError,
};

pub struct Dfs {
    config: DfsConfig,
    cache: BlockCache,
    files: spin::Mutex<BTreeMap<FileId, Arc<DFile>>>,
}

/// 文件占用的块，按文件顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedBlocks {
    pub indirect: Vec<u32>,
    pub data: Vec<u32>,
}

impl MappedBlocks {
    #[inline]
    pub fn total(&self) -> usize {
        self.indirect.len() + self.data.len()
    }
}

impl core::fmt::Debug for Dfs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dfs")
            .field("config", &self.config)
            .field("files", &self.files.lock().len())
            .field("cache", &self.cache)
            .finish()
    }
}

impl Dfs {
    /// 把整个设备清零，再挂载这个空卷
    pub fn format(dev: Arc<dyn BlockDevice>, config: DfsConfig) -> Result<Self, MountError> {
        config.validate()?;

        let zero = vec![0; config.block_size];
        for block_id in 0..config.num_blocks {
            dev.write_block(block_id, &zero)?;
        }
        log::info!(
            "formatted {} blocks of {} bytes",
            config.num_blocks,
            config.block_size
        );

        Self::open(dev, config)
    }

    /// 挂载已有的卷
    pub fn open(dev: Arc<dyn BlockDevice>, config: DfsConfig) -> Result<Self, MountError> {
        config.validate()?;

        let disk = Arc::new(VirtualDisk::new(dev)?);
        let dfs = Self {
            cache: BlockCache::new(&config, disk),
            config,
            files: spin::Mutex::new(BTreeMap::new()),
        };
        dfs.scan()?;

        Ok(dfs)
    }

    #[inline]
    pub fn config(&self) -> &DfsConfig {
        &self.config
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    #[inline]
    pub fn free_block_count(&self) -> usize {
        self.cache.num_of_free_blocks()
    }

    /// 文件当前占用的间接块与数据块
    pub fn mapped_blocks(&self, id: FileId) -> Option<MappedBlocks> {
        let file = self.files.lock().get(&id).cloned()?;
        let state = file.state().read();
        if state.destroyed {
            return None;
        }

        Some(MappedBlocks {
            indirect: state.inode.indirect.clone(),
            data: self.get_mapped_block_ids(&state.inode),
        })
    }

    /// 写回所有缓冲区并等待完成
    pub fn flush(&self) {
        self.cache.flush();
        log::debug!("flushed");
    }
}

impl Dfs {
    /// 按文件顺序取出 inode 映射的全部数据块
    fn get_mapped_block_ids(&self, inode: &DiskInode) -> Vec<u32> {
        inode
            .indirect
            .iter()
            .flat_map(|&indirect| {
                self.cache
                    .with_block(indirect as usize, |buffer| buffer.map(decode_indirect))
            })
            .collect()
    }

    fn lookup(&self, id: FileId) -> Result<Arc<DFile>, DfsError> {
        match self.files.lock().get(&id) {
            Some(file) => Ok(Arc::clone(file)),
            None => {
                log::warn!("unknown file {id}");
                Err(DfsError::UnknownFile(id))
            }
        }
    }

    /// inode 区域中第一个空槽位
    fn find_free_slot(&self) -> Option<InodePos> {
        let inode_size = self.config.inode_size;
        (1..=self.config.inode_region_size()).find_map(|block_id| {
            self.cache
                .with_block(block_id, |buffer| {
                    buffer.map(|raw| {
                        raw.chunks_exact(inode_size)
                            .position(|record| DiskInode::decode(record).is_free())
                    })
                })
                .map(|slot| InodePos { block_id, slot })
        })
    }

    /// 把 inode 写进它的槽位并发起写回
    fn write_inode(&self, inode: &DiskInode, pos: InodePos) {
        let range = pos.range(self.config.inode_size);
        self.cache.with_block(pos.block_id, |buffer| {
            buffer.map_mut(|raw| inode.encode(&mut raw[range]));
            buffer.start_push();
        });
    }
}

/* 挂载扫描 */
impl Dfs {
    fn scan(&self) -> Result<(), MountError> {
        let config = &self.config;
        let mut files = self.files.lock();

        for block_id in 1..=config.inode_region_size() {
            let inodes: Vec<DiskInode> = self.cache.with_block(block_id, |buffer| {
                buffer.map(|raw| {
                    raw.chunks_exact(config.inode_size)
                        .map(DiskInode::decode)
                        .collect()
                })
            });

            for (slot, inode) in inodes.into_iter().enumerate() {
                if inode.is_free() {
                    continue;
                }

                let id = FileId::new(inode.file_id);
                if inode.file_id as usize > config.max_dfiles {
                    return Err(MountError::InvalidFileId {
                        block: block_id,
                        slot,
                        id: inode.file_id,
                    });
                }
                if inode.size as usize > config.max_file_size {
                    return Err(MountError::FileTooLarge {
                        id,
                        size: inode.size as usize,
                    });
                }
                if files.contains_key(&id) {
                    return Err(MountError::DuplicateFileId(id));
                }
                if inode.indirect.len() != inode.count_indirect_block(config) {
                    return Err(MountError::CorruptInode(id));
                }

                files.insert(id, Arc::new(DFile::new(inode, InodePos { block_id, slot })));
            }
        }

        // 逐个文件登记它占用的块
        for file in files.values() {
            let state = file.state().read();
            let mut data_blocks = 0;

            for &indirect in &state.inode.indirect {
                // 先登记再读取，否则缓存会把它当作空闲块给出全零内容
                self.claim(file.id(), indirect as usize)?;
                let data = self
                    .cache
                    .with_block(indirect as usize, |buffer| buffer.map(decode_indirect));

                data_blocks += data.len();
                for block_id in data {
                    self.claim(file.id(), block_id as usize)?;
                }
            }

            if data_blocks != config.data_blocks_for(state.size()) {
                return Err(MountError::CorruptInode(file.id()));
            }
        }

        log::info!(
            "mounted {} files, {} blocks free",
            files.len(),
            self.cache.num_of_free_blocks()
        );

        Ok(())
    }

    fn claim(&self, file: FileId, block_id: usize) -> Result<(), MountError> {
        if !(self.config.first_data_block()..self.config.num_blocks).contains(&block_id) {
            return Err(MountError::BlockOutOfRange {
                file,
                block: block_id,
            });
        }
        if self.cache.is_used(block_id) {
            return Err(MountError::DoubleMapped {
                file,
                block: block_id,
            });
        }
        self.cache.new_used_block(block_id);
        Ok(())
    }
}

impl FileStore for Dfs {
    fn create_dfile(&self) -> Option<FileId> {
        let mut files = self.files.lock();

        let Some(id) = (1..=self.config.max_dfiles as u32)
            .map(FileId::new)
            .find(|id| !files.contains_key(id))
        else {
            log::warn!("all {} file ids are taken", self.config.max_dfiles);
            return None;
        };
        let Some(pos) = self.find_free_slot() else {
            log::error!("inode region is full while file {id} is free");
            return None;
        };

        let inode = DiskInode::new(id.raw());
        self.write_inode(&inode, pos);
        files.insert(id, Arc::new(DFile::new(inode, pos)));
        log::info!("create file {id} at block {} slot {}", pos.block_id, pos.slot);

        Some(id)
    }

    fn destroy_dfile(&self, id: FileId) {
        let Some(file) = self.files.lock().get(&id).cloned() else {
            log::warn!("destroy unknown file {id}");
            return;
        };

        let mut state = file.state().write();
        if state.destroyed {
            log::warn!("file {id} is already destroyed");
            return;
        }

        let data = self.get_mapped_block_ids(&state.inode);
        self.write_inode(&DiskInode::default(), state.pos);
        self.cache
            .with_block(state.pos.block_id, |buffer| buffer.flush());
        for &block_id in state.inode.indirect.iter().chain(&data) {
            self.cache.new_free_block(block_id as usize);
        }
        state.inode.indirect.clear();
        state.inode.size = 0;
        state.destroyed = true;
        drop(state);

        // 句柄一直留在表中直到槽位清空，ID 不会被提前复用
        self.files.lock().remove(&id);
        log::info!("destroy file {id}, {} blocks released", data.len());
    }

    fn read(
        &self,
        id: FileId,
        buf: &mut [u8],
        offset: usize,
        count: usize,
    ) -> Result<usize, DfsError> {
        check_range(buf.len(), offset, count)?;

        let file = self.lookup(id)?;
        let state = file.state().read();
        if state.destroyed {
            return Err(DfsError::UnknownFile(id));
        }

        let end = (offset + count).min(state.size());
        if offset >= end {
            return Ok(0);
        }

        let block_size = self.config.block_size;
        let blocks = self.get_mapped_block_ids(&state.inode);
        let mut cursor = offset;
        while cursor < end {
            let Some(&block_id) = blocks.get(cursor / block_size) else {
                log::error!("file {id} has no block for byte {cursor}");
                break;
            };
            let pos = cursor % block_size;
            let chunk = (block_size - pos).min(end - cursor);

            let read = self
                .cache
                .with_block(block_id as usize, |buffer| buffer.read(pos, buf, cursor, chunk))?;
            cursor += read;
            if read < chunk {
                break;
            }
        }
        log::trace!("read {} bytes of file {id} at {offset}", cursor - offset);

        Ok(cursor - offset)
    }

    fn write(&self, id: FileId, buf: &[u8], offset: usize, count: usize) -> Result<usize, DfsError> {
        check_range(buf.len(), offset, count)?;

        let end = offset + count;
        if end > self.config.max_file_size {
            log::warn!("write to file {id} would reach {end} bytes");
            return Err(DfsError::FileTooLarge(end));
        }

        let file = self.lookup(id)?;
        let mut state = file.state().write();
        if state.destroyed {
            return Err(DfsError::UnknownFile(id));
        }

        let config = &self.config;
        let block_size = config.block_size;
        let old_size = state.size();
        let mut indirect = state.inode.indirect.clone();
        let mut data = self.get_mapped_block_ids(&state.inode);

        // 先一次性取够新块，空间不足时什么都不改
        let need_indirect = config.indirect_blocks_for(end);
        let need_data = config.data_blocks_for(end);
        let grow_indirect = need_indirect.saturating_sub(indirect.len());
        let grow_data = need_data.saturating_sub(data.len());
        let needed = grow_indirect + grow_data;
        if needed > 0 {
            let fresh = self.cache.alloc_blocks(needed).map_err(|available| {
                log::warn!("write to file {id} needs {needed} blocks, {available} free");
                DfsError::NoSpace { needed, available }
            })?;
            for &block_id in &fresh {
                let buffer = self.cache.get_fresh_block(block_id);
                self.cache.release_block(buffer);
            }

            let mut fresh = fresh.into_iter().map(|block_id| block_id as u32);
            indirect.extend(fresh.by_ref().take(grow_indirect));
            data.extend(fresh);
        }
        let mut released = data.split_off(need_data);
        released.extend(indirect.split_off(need_indirect));

        // 数据块列表变了就重建映射
        if needed > 0 || !released.is_empty() {
            let buffers: Vec<_> = indirect
                .iter()
                .map(|&block_id| {
                    let buffer = self.cache.get_block(block_id as usize);
                    buffer.wait_valid();
                    buffer
                })
                .collect();

            let mut inode = state.inode.clone();
            inode.size = end as u32;
            let mapped = inode.map_file(&buffers, &data, config);
            buffers
                .into_iter()
                .for_each(|buffer| self.cache.release_block(buffer));
            mapped?;
            state.inode = inode;
        } else {
            state.inode.size = end as u32;
        }

        // 越过旧的文件尾，旧末块的结束标记不再成立
        if end > old_size && old_size % block_size != 0 {
            let last = data[old_size / block_size] as usize;
            self.cache.with_block(last, |buffer| buffer.truncate(block_size));
        }

        let mut cursor = offset;
        while cursor < end {
            let pos = cursor % block_size;
            let chunk = (block_size - pos).min(end - cursor);
            let block_id = data[cursor / block_size] as usize;
            let written = self
                .cache
                .with_block(block_id, |buffer| buffer.write(pos, buf, cursor, chunk))?;
            cursor += written;
        }

        // 空写只改变大小，末块需要新的结束标记
        if count == 0 && end % block_size != 0 {
            let last = data[end / block_size] as usize;
            self.cache.with_block(last, |buffer| buffer.truncate(end % block_size));
        }

        self.write_inode(&state.inode, state.pos);
        for &block_id in &released {
            self.cache.new_free_block(block_id as usize);
        }
        log::debug!(
            "write {count} bytes to file {id} at {offset}: size {old_size} -> {end}, \
             {needed} blocks allocated, {} released",
            released.len()
        );

        Ok(count)
    }

    fn size_dfile(&self, id: FileId) -> Option<usize> {
        let file = self.files.lock().get(&id).cloned()?;
        let state = file.state().read();
        (!state.destroyed).then(|| state.size())
    }

    fn list_all_dfiles(&self) -> Vec<FileId> {
        self.files.lock().keys().copied().collect()
    }

    fn sync(&self) {
        self.cache.sync();
        log::debug!("sync");
    }
}

#[inline]
fn check_range(len: usize, offset: usize, count: usize) -> Result<(), DfsError> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(DfsError::OutOfBounds),
    }
}
