mod cli;

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use dfs::{Dfs, FileId, FileStore};
use dfs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();
    log::info!("image={:?} config={config:?}", cli.image);

    let dfs = if cli.format || !cli.image.exists() {
        let file = BlockFile::create(&cli.image, config.block_size, config.num_blocks)?;
        Dfs::format(Arc::new(file), config)
    } else {
        let file = BlockFile::open(&cli.image, config.block_size, config.num_blocks)?;
        Dfs::open(Arc::new(file), config)
    }
    .map_err(io::Error::other)?;

    match cli.command {
        Command::Pack { files } => {
            for path in files {
                let data = fs::read(&path)?;
                let id = dfs
                    .create_dfile()
                    .ok_or_else(|| io::Error::other("no file id left"))?;
                if let Err(err) = dfs.write(id, &data, 0, data.len()) {
                    dfs.destroy_dfile(id);
                    return Err(io::Error::other(format!("{}: {err}", path.display())));
                }
                println!("{id}\t{}\t{}", data.len(), path.display());
            }
        }
        Command::Ls => {
            for id in dfs.list_all_dfiles() {
                println!("{id}\t{}", dfs.size_dfile(id).unwrap_or_default());
            }
        }
        Command::Cat { id } => {
            let id = FileId::new(id);
            let size = dfs
                .size_dfile(id)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no file {id}")))?;
            let mut buf = vec![0; size];
            let read = dfs.read(id, &mut buf, 0, size).map_err(io::Error::other)?;
            io::stdout().write_all(&buf[..read])?;
        }
        Command::Rm { id } => {
            let id = FileId::new(id);
            if dfs.size_dfile(id).is_none() {
                return Err(io::Error::new(io::ErrorKind::NotFound, format!("no file {id}")));
            }
            dfs.destroy_dfile(id);
        }
        Command::Check => {
            let files = dfs.list_all_dfiles();
            let used: usize = files
                .iter()
                .filter_map(|&id| dfs.mapped_blocks(id))
                .map(|mapped| mapped.total())
                .sum();
            println!("files: {}", files.len());
            println!("used blocks: {used}");
            println!("free blocks: {}", dfs.free_block_count());
        }
    }

    dfs.flush();
    Ok(())
}
