//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 对块的所有访问都经过 [`BlockCache`]，且**操作块时一定在缓冲区当中**。
//!
//! 缓存同时掌管空闲块与已用块两个集合，分配总是取编号最小的空闲块。
//!
//! 缓冲区与块设备同步后并不会被移除，移除由淘汰策略调度执行：
//! 近似 LRU，跳过被持有或 I/O 在途的缓冲区，inode 区域常驻不淘汰。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;

use block_dev::VirtualDisk;
use parking_lot::Mutex;

use crate::{Buffer, DfsConfig};

pub struct BlockCache {
    disk: Arc<VirtualDisk>,
    block_size: usize,
    /// 缓冲区个数的上限
    capacity: usize,
    /// 常驻缓存的 inode 区域
    pinned: RangeInclusive<usize>,
    /// 淘汰时可能要等待写回完成，用可休眠的锁
    resident: Mutex<Resident>,
    /// 锁序：先 `resident` 后 `blocks`
    blocks: spin::Mutex<BlockSets>,
}

struct Resident {
    buffers: HashMap<usize, Entry>,
    /// 最近使用时刻 -> 块ID，越靠前越久未用
    lru: BTreeMap<u64, usize>,
    clock: u64,
}

struct Entry {
    buffer: Arc<Buffer>,
    stamp: u64,
}

/// 数据区内每个块要么空闲要么已用
struct BlockSets {
    free: BTreeSet<usize>,
    used: BTreeSet<usize>,
}

impl core::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity)
            .field("resident", &self.resident_count())
            .field("free", &self.num_of_free_blocks())
            .finish()
    }
}

impl BlockCache {
    /// 数据区起初全部空闲，由挂载扫描把已用块登记进来
    pub fn new(config: &DfsConfig, disk: Arc<VirtualDisk>) -> Self {
        Self {
            disk,
            block_size: config.block_size,
            capacity: config.cache_blocks,
            pinned: 1..=config.inode_region_size(),
            resident: Mutex::new(Resident {
                buffers: HashMap::new(),
                lru: BTreeMap::new(),
                clock: 0,
            }),
            blocks: spin::Mutex::new(BlockSets {
                free: (config.first_data_block()..config.num_blocks).collect(),
                used: BTreeSet::new(),
            }),
        }
    }

    /// 取得块的缓冲区并持有它，直到 [`BlockCache::release_block`]。
    /// 未命中时若该块曾被使用则发起读取，空闲块直接给出全零缓冲区。
    pub fn get_block(&self, block_id: usize) -> Arc<Buffer> {
        self.lookup(block_id, false)
    }

    /// 取得刚分配的块：不读磁盘，内容清零
    pub fn get_fresh_block(&self, block_id: usize) -> Arc<Buffer> {
        let buffer = self.lookup(block_id, true);
        buffer.zeroize();
        buffer
    }

    fn lookup(&self, block_id: usize, fresh: bool) -> Arc<Buffer> {
        let mut resident = self.resident.lock();
        let resident = &mut *resident;
        resident.clock += 1;
        let stamp = resident.clock;

        // 命中：移到队尾
        if let Some(entry) = resident.buffers.get_mut(&block_id) {
            resident.lru.remove(&entry.stamp);
            resident.lru.insert(stamp, block_id);
            entry.stamp = stamp;
            entry.buffer.hold();
            return Arc::clone(&entry.buffer);
        }

        // 触及上限，先淘汰
        if resident.buffers.len() >= self.capacity {
            self.evict(resident);
        }

        let buffer = if fresh || self.blocks.lock().free.contains(&block_id) {
            Arc::new(Buffer::zeroed(block_id, self.block_size, self.disk.clone()))
        } else {
            let buffer = Arc::new(Buffer::new(block_id, self.block_size, self.disk.clone()));
            buffer.start_fetch();
            buffer
        };
        log::trace!("cache block {block_id}");

        buffer.hold();
        resident.buffers.insert(
            block_id,
            Entry {
                buffer: Arc::clone(&buffer),
                stamp,
            },
        );
        resident.lru.insert(stamp, block_id);

        buffer
    }

    /// 归还持有，缓冲区重新可以被淘汰
    #[inline]
    pub fn release_block(&self, buffer: Arc<Buffer>) {
        buffer.unhold();
    }

    /// 取得块、等到数据有效后交给 `f`，结束时归还
    pub fn with_block<V>(&self, block_id: usize, f: impl FnOnce(&Arc<Buffer>) -> V) -> V {
        let buffer = self.get_block(block_id);
        buffer.wait_valid();
        let value = f(&buffer);
        self.release_block(buffer);
        value
    }

    /// 对所有缓冲区发起写回，不等待完成
    pub fn sync(&self) {
        self.resident
            .lock()
            .buffers
            .values()
            .for_each(|entry| entry.buffer.start_push());
    }

    /// 写回所有缓冲区并等到它们干净
    pub fn flush(&self) {
        let buffers: Vec<_> = self
            .resident
            .lock()
            .buffers
            .values()
            .map(|entry| Arc::clone(&entry.buffer))
            .collect();
        buffers.iter().for_each(Buffer::flush);
    }

    /// 停止磁盘工作线程
    pub fn terminate(&self) {
        self.disk.terminate();
    }

    #[inline]
    pub fn resident_count(&self) -> usize {
        self.resident.lock().buffers.len()
    }

    #[inline]
    pub fn is_resident(&self, block_id: usize) -> bool {
        self.resident.lock().buffers.contains_key(&block_id)
    }
}

/* 分配器 */
impl BlockCache {
    /// 把空闲块登记为已用；重复分配说明上层有错，记录后忽略
    pub fn new_used_block(&self, block_id: usize) -> bool {
        self.blocks.lock().mark_used(block_id)
    }

    /// 把已用块归还空闲集合；重复释放说明上层有错，记录后忽略
    pub fn new_free_block(&self, block_id: usize) -> bool {
        self.blocks.lock().mark_free(block_id)
    }

    #[inline]
    pub fn num_of_free_blocks(&self) -> usize {
        self.blocks.lock().free.len()
    }

    /// 编号最小的空闲块
    #[inline]
    pub fn get_next_free_block(&self) -> Option<usize> {
        self.blocks.lock().next_free()
    }

    #[inline]
    pub fn is_used(&self, block_id: usize) -> bool {
        self.blocks.lock().used.contains(&block_id)
    }

    /// 一次性分配 `count` 个块，编号从小到大。
    /// 空闲块不够时什么也不分配，返回现有的空闲块数。
    pub fn alloc_blocks(&self, count: usize) -> Result<Vec<usize>, usize> {
        let mut blocks = self.blocks.lock();
        if blocks.free.len() < count {
            return Err(blocks.free.len());
        }

        let mut allocated = Vec::with_capacity(count);
        while allocated.len() < count {
            let Some(block_id) = blocks.next_free() else {
                break;
            };
            blocks.mark_used(block_id);
            allocated.push(block_id);
        }
        log::debug!("allocate blocks {allocated:?}");

        Ok(allocated)
    }
}

impl BlockCache {
    #[inline]
    fn is_pinned(&self, block_id: usize) -> bool {
        self.pinned.contains(&block_id)
    }

    // 块缓存调度策略：先整体写回，再按 LRU 顺序踢走闲置块
    fn evict(&self, resident: &mut Resident) {
        resident
            .buffers
            .values()
            .for_each(|entry| entry.buffer.start_push());

        // 第一轮只踢干净且空闲的，第二轮等待写回中的
        for wait in [false, true] {
            let victims: Vec<(u64, usize)> = resident
                .lru
                .iter()
                .map(|(&stamp, &block_id)| (stamp, block_id))
                .filter(|&(_, block_id)| !self.is_pinned(block_id))
                .collect();

            for (stamp, block_id) in victims {
                if resident.buffers.len() < self.capacity {
                    return;
                }

                let buffer = Arc::clone(&resident.buffers[&block_id].buffer);
                if buffer.is_held() {
                    continue;
                }
                if buffer.is_busy() || !buffer.check_clean() {
                    if !wait {
                        continue;
                    }
                    buffer.flush();
                    if !buffer.check_clean() {
                        continue;
                    }
                }

                resident.buffers.remove(&block_id);
                resident.lru.remove(&stamp);
                log::trace!("evict block {block_id}");
            }
        }

        if resident.buffers.len() >= self.capacity {
            log::warn!(
                "block cache over capacity: {} buffers are all held or pinned",
                resident.buffers.len()
            );
        }
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.flush();
        self.terminate();
    }
}

impl BlockSets {
    #[inline]
    fn next_free(&self) -> Option<usize> {
        self.free.first().copied()
    }

    fn mark_used(&mut self, block_id: usize) -> bool {
        if self.used.contains(&block_id) {
            log::error!("block {block_id} is already in use");
            return false;
        }
        if !self.free.remove(&block_id) {
            log::error!("block {block_id} is not an allocatable block");
            return false;
        }
        self.used.insert(block_id);
        true
    }

    fn mark_free(&mut self, block_id: usize) -> bool {
        if self.free.contains(&block_id) {
            log::error!("block {block_id} is already free");
            return false;
        }
        if !self.used.remove(&block_id) {
            log::error!("block {block_id} is not an allocatable block");
            return false;
        }
        self.free.insert(block_id);
        true
    }
}
