use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use block_dev::BlockDevice;
use dfs::{Dfs, DfsConfig, FileStore};

use crate::BlockFile;

const BLOCK_SIZE: usize = 512;
const NUM_BLOCKS: usize = 128;

fn config() -> DfsConfig {
    DfsConfig {
        block_size: BLOCK_SIZE,
        num_blocks: NUM_BLOCKS,
        inode_size: 32,
        cache_blocks: 16,
        max_file_size: 32 * BLOCK_SIZE,
        max_dfiles: 8,
    }
}

/// 每个测试各用一个镜像文件，结束时删除
struct Image(PathBuf);

impl Image {
    fn new(name: &str) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self(std::env::temp_dir().join(format!("dfs-{}-{name}.img", std::process::id())))
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

#[test]
fn block_file_round_trip() {
    let image = Image::new("raw");
    let file = BlockFile::create(&image.0, BLOCK_SIZE, NUM_BLOCKS).unwrap();
    assert_eq!(
        fs::metadata(&image.0).unwrap().len(),
        (BLOCK_SIZE * NUM_BLOCKS) as u64
    );

    file.write_block(7, &[0x42; BLOCK_SIZE]).unwrap();
    let mut buf = [0; BLOCK_SIZE];
    file.read_block(7, &mut buf).unwrap();
    assert_eq!(buf, [0x42; BLOCK_SIZE]);
    file.read_block(8, &mut buf).unwrap();
    assert_eq!(buf, [0; BLOCK_SIZE]);

    assert!(file.read_block(NUM_BLOCKS, &mut buf).is_err());
    assert!(file.write_block(0, &[0; 16]).is_err());
}

#[test]
fn open_checks_image_length() {
    let image = Image::new("length");
    BlockFile::create(&image.0, BLOCK_SIZE, NUM_BLOCKS).unwrap();

    assert!(BlockFile::open(&image.0, BLOCK_SIZE, NUM_BLOCKS).is_ok());
    assert!(BlockFile::open(&image.0, BLOCK_SIZE, NUM_BLOCKS + 1).is_err());
}

#[test]
fn store_survives_remount() {
    let image = Image::new("remount");
    let data: Vec<u8> = (0..3000).map(|i| (i % 253) as u8).collect();

    let id = {
        let file = Arc::new(BlockFile::create(&image.0, BLOCK_SIZE, NUM_BLOCKS).unwrap());
        let dfs = Dfs::format(file, config()).unwrap();
        let id = dfs.create_dfile().unwrap();
        dfs.write(id, &data, 0, data.len()).unwrap();
        id
    };

    let file = Arc::new(BlockFile::open(&image.0, BLOCK_SIZE, NUM_BLOCKS).unwrap());
    let dfs = Dfs::open(file, config()).unwrap();
    assert_eq!(dfs.list_all_dfiles(), vec![id]);

    let mut buf = vec![0; data.len()];
    assert_eq!(dfs.read(id, &mut buf, 0, data.len()), Ok(data.len()));
    assert_eq!(buf, data);
}
