use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dfs::DfsConfig;

#[derive(Parser)]
pub struct Cli {
    /// Volume image on the host
    #[arg(long, short, default_value = "DSTORE.dat")]
    pub image: PathBuf,

    /// Zero the whole image before mounting it
    #[arg(long)]
    pub format: bool,

    /// Bytes per block
    #[arg(long, default_value_t = 1024)]
    pub block_size: usize,

    /// Blocks in the volume
    #[arg(long, default_value_t = 16384)]
    pub blocks: usize,

    /// Bytes per inode record
    #[arg(long, default_value_t = 32)]
    pub inode_size: usize,

    /// Buffers the block cache keeps in memory
    #[arg(long, default_value_t = 1024)]
    pub cache_blocks: usize,

    /// Upper bound on live files
    #[arg(long, default_value_t = 512)]
    pub max_dfiles: usize,

    /// Upper bound on a file's size, in blocks
    #[arg(long, default_value_t = 500)]
    pub max_file_blocks: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store every host file as a new file
    Pack { files: Vec<PathBuf> },
    /// List every file with its size
    Ls,
    /// Write a file's bytes to stdout
    Cat { id: u32 },
    /// Destroy a file
    Rm { id: u32 },
    /// Mount the volume and report its usage
    Check,
}

impl Cli {
    pub fn config(&self) -> DfsConfig {
        DfsConfig {
            block_size: self.block_size,
            num_blocks: self.blocks,
            inode_size: self.inode_size,
            cache_blocks: self.cache_blocks,
            max_file_size: self.max_file_blocks * self.block_size,
            max_dfiles: self.max_dfiles,
        }
    }
}
