/* dfs 的整体架构，自上而下 */

// 文件接口层：客户可见的操作集合
mod store;

// 文件管理器层：文件表、分配与挂载扫描
mod manager;

// 内存中的文件句柄
mod dfile;

// 磁盘数据结构层：inode 与间接块的编解码
pub mod layout;

// 块缓存层：缓冲区状态机与 LRU 淘汰
pub mod block_cache;
mod buffer;

mod config;
mod error;

pub use self::{
    block_cache::BlockCache,
    buffer::{BufFlag, BufState, Buffer},
    config::DfsConfig,
    dfile::{DFile, DFileState, InodePos},
    error::{BufferError, ConfigError, DfsError, MapError, MountError},
    manager::{Dfs, MappedBlocks},
    store::{FileId, FileStore},
};
