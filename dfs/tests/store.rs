mod common;

use std::sync::Arc;
use std::thread;

use common::{BLOCK_SIZE, assert_disjoint, format, pattern, read_all, small_config};
use dfs::{DfsConfig, DfsError, FileId, FileStore};

#[test]
fn round_trip() {
    let (_, dfs) = format(small_config());
    let id = dfs.create_dfile().unwrap();
    assert_eq!(dfs.size_dfile(id), Some(0));

    for len in [1, 100, BLOCK_SIZE, BLOCK_SIZE + 1, 5000, 64 * BLOCK_SIZE] {
        let data = pattern(len, len);
        assert_eq!(dfs.write(id, &data, 0, len), Ok(len));
        assert_eq!(dfs.size_dfile(id), Some(len));
        assert_eq!(read_all(&dfs, id), data);
    }
}

#[test]
fn offset_addresses_buffer_and_file() {
    let (_, dfs) = format(small_config());
    let id = dfs.create_dfile().unwrap();

    let data = pattern(3000, 1);
    dfs.write(id, &data, 0, 3000).unwrap();

    // 只取文件的 [1000, 1500)，落在 buf 的同一区间
    let mut buf = vec![0xee; 3000];
    assert_eq!(dfs.read(id, &mut buf, 1000, 500), Ok(500));
    assert_eq!(&buf[1000..1500], &data[1000..1500]);
    assert!(buf[..1000].iter().all(|&b| b == 0xee));
    assert!(buf[1500..].iter().all(|&b| b == 0xee));

    // 读到文件尾就停
    let mut buf = vec![0; 4000];
    assert_eq!(dfs.read(id, &mut buf, 2500, 1500), Ok(500));
    assert_eq!(&buf[2500..3000], &data[2500..]);
    assert_eq!(dfs.read(id, &mut buf, 3000, 1000), Ok(0));
}

#[test]
fn write_sets_exact_size() {
    let (_, dfs) = format(small_config());
    let id = dfs.create_dfile().unwrap();
    let data = pattern(2500, 3);

    dfs.write(id, &data, 0, 2500).unwrap();
    assert_eq!(dfs.write(id, &data, 0, 100), Ok(100));
    assert_eq!(dfs.size_dfile(id), Some(100));

    // 缩短后读不到旧内容
    let mut buf = vec![0; 2500];
    assert_eq!(dfs.read(id, &mut buf, 0, 2500), Ok(100));
    assert_eq!(&buf[..100], &data[..100]);

    // 空写把文件拉长，新出现的区间全是零
    assert_eq!(dfs.write(id, &data, 2500, 0), Ok(0));
    assert_eq!(dfs.size_dfile(id), Some(2500));
    let content = read_all(&dfs, id);
    assert_eq!(&content[..100], &data[..100]);
    assert!(content[100..].iter().all(|&b| b == 0));
}

#[test]
fn shrink_releases_blocks() {
    let (_, dfs) = format(small_config());
    let initial = dfs.free_block_count();
    let id = dfs.create_dfile().unwrap();
    let data = pattern(2500, 5);

    dfs.write(id, &data, 0, 2500).unwrap();
    let mapped = dfs.mapped_blocks(id).unwrap();
    assert_eq!(mapped.indirect.len(), 1);
    assert_eq!(mapped.data.len(), 3);
    assert_eq!(dfs.free_block_count(), initial - 4);

    // 剩一个数据块，仍需一个间接块
    dfs.write(id, &data, 0, 100).unwrap();
    let mapped = dfs.mapped_blocks(id).unwrap();
    assert_eq!(mapped.indirect.len(), 1);
    assert_eq!(mapped.data.len(), 1);
    assert_eq!(dfs.free_block_count(), initial - 2);
    assert_eq!(read_all(&dfs, id), &data[..100]);

    dfs.write(id, &data, 0, 0).unwrap();
    assert_eq!(dfs.mapped_blocks(id).unwrap().total(), 0);
    assert_eq!(dfs.free_block_count(), initial);
}

#[test]
fn rejected_requests() {
    let (_, dfs) = format(small_config());
    let id = dfs.create_dfile().unwrap();
    let mut buf = [0; 16];

    assert_eq!(dfs.read(id, &mut buf, 10, 7), Err(DfsError::OutOfBounds));
    assert_eq!(dfs.write(id, &buf, usize::MAX, 2), Err(DfsError::OutOfBounds));

    let ghost = FileId::new(9);
    assert_eq!(dfs.read(ghost, &mut buf, 0, 1), Err(DfsError::UnknownFile(ghost)));
    assert_eq!(dfs.write(ghost, &buf, 0, 1), Err(DfsError::UnknownFile(ghost)));
    assert_eq!(dfs.size_dfile(ghost), None);

    let big = vec![0; 64 * BLOCK_SIZE + 1];
    assert_eq!(
        dfs.write(id, &big, 0, big.len()),
        Err(DfsError::FileTooLarge(big.len()))
    );
    assert_eq!(dfs.size_dfile(id), Some(0));
}

#[test]
fn no_space_changes_nothing() {
    let config = DfsConfig {
        num_blocks: 16,
        ..small_config()
    };
    let (_, dfs) = format(config);
    assert_eq!(dfs.free_block_count(), 14);

    let id = dfs.create_dfile().unwrap();
    let data = pattern(20 * BLOCK_SIZE, 7);
    dfs.write(id, &data, 0, 1000).unwrap();
    let before = dfs.mapped_blocks(id).unwrap();

    assert_eq!(
        dfs.write(id, &data, 0, data.len()),
        Err(DfsError::NoSpace {
            needed: 19,
            available: 12
        })
    );
    assert_eq!(dfs.size_dfile(id), Some(1000));
    assert_eq!(dfs.mapped_blocks(id).unwrap(), before);
    assert_eq!(dfs.free_block_count(), 12);
    assert_eq!(read_all(&dfs, id), &data[..1000]);

    // 刚好用完
    assert_eq!(dfs.write(id, &data, 0, 13 * BLOCK_SIZE), Ok(13 * BLOCK_SIZE));
    assert_eq!(dfs.free_block_count(), 0);
}

#[test]
fn capacity() {
    let (_, dfs) = format(small_config());
    let ids: Vec<_> = (0..16).map(|_| dfs.create_dfile().unwrap()).collect();
    assert_eq!(ids, (1..=16).map(FileId::new).collect::<Vec<_>>());
    assert_eq!(dfs.create_dfile(), None);

    dfs.destroy_dfile(FileId::new(5));
    assert_eq!(dfs.list_all_dfiles().len(), 15);
    assert_eq!(dfs.create_dfile(), Some(FileId::new(5)));
    assert_eq!(dfs.create_dfile(), None);
}

#[test]
fn destroy_unknown_is_harmless() {
    let (_, dfs) = format(small_config());
    let id = dfs.create_dfile().unwrap();
    dfs.destroy_dfile(FileId::new(7));
    dfs.destroy_dfile(id);
    dfs.destroy_dfile(id);
    assert!(dfs.list_all_dfiles().is_empty());
}

#[test]
fn destroyed_blocks_are_reused_zeroed() {
    let (_, dfs) = format(small_config());
    let initial = dfs.free_block_count();

    let a = dfs.create_dfile().unwrap();
    let b = dfs.create_dfile().unwrap();
    dfs.write(a, &[0xff; 3000], 0, 3000).unwrap();
    dfs.write(b, &pattern(1500, 9), 0, 1500).unwrap();
    let old = dfs.mapped_blocks(a).unwrap();
    assert_disjoint(&dfs);

    dfs.destroy_dfile(a);
    assert_eq!(dfs.size_dfile(a), None);
    assert_eq!(dfs.free_block_count(), initial - 3);

    // 新文件拿到 A 的旧块，但看不到 A 的内容
    let c = dfs.create_dfile().unwrap();
    let mut buf = vec![0; 3000];
    buf[2999] = 1;
    dfs.write(c, &buf, 2999, 1).unwrap();
    let new = dfs.mapped_blocks(c).unwrap();
    assert_eq!(new, old);

    let content = read_all(&dfs, c);
    assert!(content[..2999].iter().all(|&b| b == 0));
    assert_eq!(content[2999], 1);
    assert_disjoint(&dfs);
}

#[test]
fn readers_share_a_file() {
    let (_, dfs) = format(small_config());
    let dfs = Arc::new(dfs);
    let id = dfs.create_dfile().unwrap();
    let data = pattern(10 * BLOCK_SIZE, 11);
    dfs.write(id, &data, 0, data.len()).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let dfs = Arc::clone(&dfs);
            thread::spawn(move || {
                for _ in 0..20 {
                    let mut buf = vec![0; 10 * BLOCK_SIZE];
                    let len = buf.len();
                    assert_eq!(dfs.read(id, &mut buf, 0, len), Ok(len));
                    assert_eq!(buf, pattern(10 * BLOCK_SIZE, 11));
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn writes_are_never_torn() {
    const LEN: usize = 6 * BLOCK_SIZE;

    let (_, dfs) = format(small_config());
    let dfs = Arc::new(dfs);
    let id = dfs.create_dfile().unwrap();
    dfs.write(id, &[1; LEN], 0, LEN).unwrap();

    let writers = (1..=4u8).map(|fill| {
        let dfs = Arc::clone(&dfs);
        thread::spawn(move || {
            for _ in 0..20 {
                dfs.write(id, &[fill; LEN], 0, LEN).unwrap();
            }
        })
    });
    let readers = (0..4).map(|_| {
        let dfs = Arc::clone(&dfs);
        thread::spawn(move || {
            for _ in 0..50 {
                let mut buf = vec![0; LEN];
                assert_eq!(dfs.read(id, &mut buf, 0, LEN), Ok(LEN));
                assert!(buf.iter().all(|&b| b == buf[0]), "observed a partial write");
            }
        })
    });
    let handles: Vec<_> = writers.chain(readers).collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_files_stay_disjoint() {
    let (_, dfs) = format(small_config());
    let dfs = Arc::new(dfs);

    let workers: Vec<_> = (0..6)
        .map(|seed| {
            let dfs = Arc::clone(&dfs);
            thread::spawn(move || {
                let id = dfs.create_dfile().unwrap();
                for round in 0..10 {
                    let len = (seed * 1000 + round * 777) % (20 * BLOCK_SIZE) + 1;
                    let data = pattern(len, seed + round);
                    dfs.write(id, &data, 0, len).unwrap();
                    assert_eq!(read_all(&dfs, id), data);
                }
                if seed % 2 == 0 {
                    dfs.destroy_dfile(id);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(dfs.list_all_dfiles().len(), 3);
    assert_disjoint(&dfs);

    let used: usize = dfs
        .list_all_dfiles()
        .into_iter()
        .map(|id| dfs.mapped_blocks(id).unwrap().total())
        .sum();
    assert_eq!(dfs.free_block_count() + used, 256 - 2);
}
