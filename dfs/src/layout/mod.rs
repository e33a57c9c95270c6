//! # 磁盘数据结构层
//!
//! dfs 的磁盘布局：
//! 保留块 | inode 区域 | 间接块与数据块
//!
//! 所有整数均以大端 int32 存放，0 表示空槽位。

mod indirect;
mod inode;

pub use self::{
    indirect::{decode_indirect, encode_indirect},
    inode::DiskInode,
};

#[inline]
fn get_u32(raw: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

#[inline]
fn put_u32(raw: &mut [u8], index: usize, value: u32) {
    let at = index * 4;
    raw[at..at + 4].copy_from_slice(&value.to_be_bytes());
}
