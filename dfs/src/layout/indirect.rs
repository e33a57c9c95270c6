//! 间接块：整个块连续存储数据块编号

use super::{get_u32, put_u32};

/// 按顺序取出块内所有非零编号
pub fn decode_indirect(raw: &[u8]) -> Vec<u32> {
    (0..raw.len() / 4)
        .map(|index| get_u32(raw, index))
        .filter(|&block_id| block_id != 0)
        .collect()
}

/// 把 `ids` 依次写入块内，其余槽位清零
pub fn encode_indirect(ids: &[u32], raw: &mut [u8]) {
    debug_assert!(ids.len() <= raw.len() / 4);
    raw.fill(0);
    for (index, &block_id) in ids.iter().enumerate() {
        put_u32(raw, index, block_id);
    }
}
