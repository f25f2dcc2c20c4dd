use std::path::PathBuf;
use std::process;

use clap::Parser;
use zqlite::storage::page::PAGE_SIZE;
use zqlite::wal::reader;

#[derive(Parser)]
#[command(
    name = "zqlite-wal-inspect",
    about = "Dump the valid committed frames of a ZQLite WAL file"
)]
struct Cli {
    /// Path to the -wal file
    wal_path: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let scan = match reader::scan(&cli.wal_path, PAGE_SIZE) {
        Ok(scan) => scan,
        Err(e) => {
            eprintln!("zqlite-wal-inspect: {}", e);
            process::exit(2);
        }
    };

    println!(
        "salt={:#018x} checksum_seed={:#018x} page_size={}",
        scan.header.salt, scan.header.checksum_seed, scan.header.page_size
    );
    println!(
        "committed frames: {} (through offset {})",
        scan.committed_frames.len(),
        scan.committed_len
    );
    for (i, (page_no, offset)) in scan.committed_frames.iter().enumerate() {
        println!("frame {:>4}: page {:>6} at offset {}", i, page_no, offset);
    }
    if scan.db_size > 0 {
        println!("db size after last commit: {} pages", scan.db_size);
    }
}
