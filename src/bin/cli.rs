//! CaskDB CLI
//!
//! Command-line interface for operating on a CaskDB data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use caskdb::{CaskError, Config, Engine, IndexType, IteratorOptions};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// CaskDB CLI
#[derive(Parser, Debug)]
#[command(name = "caskdb-cli")]
#[command(about = "CLI for the CaskDB key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./caskdb_data")]
    dir: PathBuf,

    /// Index backend (btree, art, bptree)
    #[arg(short, long, default_value = "btree")]
    index: IndexType,

    /// Sync every write to disk
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List keys and values in order
    Scan {
        /// Only keys starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Descending order
        #[arg(short, long)]
        reverse: bool,
    },

    /// Compact sealed segments (applied on next open)
    Merge {
        /// Minimum reclaimable/total ratio required
        #[arg(long, default_value = "0.0")]
        ratio: f32,
    },

    /// Show storage statistics
    Stat,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CaskError::KeyNotFound) => {
            eprintln!("(nil)");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> caskdb::Result<()> {
    let mut builder = Config::builder()
        .dir_path(&args.dir)
        .index_type(args.index)
        .sync_writes(args.sync);
    if let Commands::Merge { ratio } = args.command {
        builder = builder.data_file_merge_ratio(ratio);
    }

    let engine = Engine::open(builder.build())?;
    let result = execute(&engine, args.command);
    engine.close()?;
    result
}

fn execute(engine: &Engine, command: Commands) -> caskdb::Result<()> {
    match command {
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Get { key } => {
            let value = engine.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { prefix, reverse } => {
            let options = IteratorOptions::default()
                .with_prefix(prefix)
                .reversed(reverse);
            let mut iter = engine.iter(options)?;
            while iter.valid() {
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(iter.key()),
                    String::from_utf8_lossy(&iter.value()?)
                );
                iter.next();
            }
        }
        Commands::Merge { .. } => {
            engine.merge()?;
            println!("OK (applied on next open)");
        }
        Commands::Stat => {
            let stat = engine.stat()?;
            println!("keys:        {}", stat.key_num);
            println!("segments:    {}", stat.data_file_num);
            println!("reclaimable: {} bytes", stat.reclaimable_size);
            println!("disk size:   {} bytes", stat.disk_size);
        }
    }
    Ok(())
}
