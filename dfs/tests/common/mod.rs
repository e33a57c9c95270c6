#![allow(dead_code)]

use std::sync::Arc;

use block_dev::MemDisk;
use dfs::{Dfs, DfsConfig, FileId, FileStore};

pub const BLOCK_SIZE: usize = 1024;

/// 一个 inode 块，数据区从 2 号块开始
pub fn small_config() -> DfsConfig {
    DfsConfig {
        block_size: BLOCK_SIZE,
        num_blocks: 256,
        inode_size: 32,
        cache_blocks: 32,
        max_file_size: 64 * BLOCK_SIZE,
        max_dfiles: 16,
    }
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn mem_disk(config: &DfsConfig) -> Arc<MemDisk> {
    Arc::new(MemDisk::new(config.block_size, config.num_blocks))
}

pub fn format(config: DfsConfig) -> (Arc<MemDisk>, Dfs) {
    init_log();
    let disk = mem_disk(&config);
    let dfs = Dfs::format(disk.clone(), config).unwrap();
    (disk, dfs)
}

/// 第 `i` 字节为 `(i * 7 + seed) % 251`
pub fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + seed) % 251) as u8).collect()
}

pub fn read_all(dfs: &Dfs, id: FileId) -> Vec<u8> {
    let size = dfs.size_dfile(id).unwrap();
    let mut buf = vec![0; size];
    assert_eq!(dfs.read(id, &mut buf, 0, size), Ok(size));
    buf
}

/// 所有存活文件占用的块两两不相交
pub fn assert_disjoint(dfs: &Dfs) {
    let mut seen = std::collections::BTreeSet::new();
    for id in dfs.list_all_dfiles() {
        let mapped = dfs.mapped_blocks(id).unwrap();
        for block_id in mapped.indirect.iter().chain(&mapped.data) {
            assert!(seen.insert(*block_id), "block {block_id} mapped twice");
            assert!(*block_id as usize >= dfs.config().first_data_block());
        }
    }
}
