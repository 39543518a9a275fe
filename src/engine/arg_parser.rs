use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::utils::parse_size;

struct DefaultArgs;

impl DefaultArgs {
    pub const SIDECAR: &'static str = ".dupeshred.json";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    /// Streaming blake3 hashing.
    Blake3,
    /// Byte-exact comparison; slower, immune to hash collisions.
    Paranoid,
}

/// Progressive duplicate-file detector.
#[derive(Clone, Parser)]
#[command(name = "dupeshred")]
#[command(about = "Find byte-identical files with the minimum amount of reading.")]
pub struct Cli {
    /// Directories to scan. Default: current directory.
    #[arg(value_name = "DIR")]
    pub dirs: Vec<PathBuf>,

    /// Additional directories tagged as "original" locations for the keep
    /// criteria. Can be given multiple times.
    #[arg(long, short = 't')]
    pub tag: Vec<PathBuf>,

    /// Comparison algorithm. Default: blake3.
    #[arg(long, short = 'a', value_enum, default_value = "blake3")]
    pub algorithm: Algorithm,

    /// Only report groups containing at least one tagged file.
    #[arg(long)]
    pub must_match_tagged: bool,

    /// Only report groups containing at least one untagged file.
    #[arg(long)]
    pub must_match_untagged: bool,

    /// Keep every tagged file (mark them all as originals).
    #[arg(long)]
    pub keep_all_tagged: bool,

    /// Keep every untagged file.
    #[arg(long)]
    pub keep_all_untagged: bool,

    /// Only report groups with a file modified at/after this epoch second.
    #[arg(long, short = 'N')]
    pub newer_than: Option<i64>,

    /// Read cached checksums from the sidecar file.
    #[arg(long)]
    pub read_sidecar: bool,

    /// Write finished checksums to the sidecar file.
    #[arg(long)]
    pub write_sidecar: bool,

    /// Also report lone files with their partial checksum.
    #[arg(long)]
    pub write_unfinished: bool,

    /// Sidecar cache path. Default: `.dupeshred.json` in the first DIR.
    #[arg(long)]
    pub sidecar: Option<PathBuf>,

    /// Memory budget for byte-exact comparison buffers (accepts K/M/G).
    #[arg(long, value_parser = parse_size)]
    pub paranoid_mem: Option<u64>,

    /// Overall memory target (accepts K/M/G).
    #[arg(long, value_parser = parse_size)]
    pub total_mem: Option<u64>,

    /// Read buffer memory (accepts K/M/G).
    #[arg(long, value_parser = parse_size)]
    pub read_buffer_mem: Option<u64>,

    /// Bytes hashed per scheduling pass across all devices (accepts K/M/G).
    #[arg(long, value_parser = parse_size)]
    pub sweep_size: Option<u64>,

    /// Files processed per scheduling pass across all devices.
    #[arg(long)]
    pub sweep_count: Option<u64>,

    /// Hasher threads. Default: one per CPU.
    #[arg(long, short = 'j')]
    pub threads: Option<usize>,

    /// Use buffered sequential reads instead of positional reads.
    #[arg(long)]
    pub buffered_read: bool,

    /// Always block for a hash result before moving to the next file.
    #[arg(long, hide = true)]
    pub always_wait: bool,

    /// Never block for a hash result.
    #[arg(long, hide = true)]
    pub never_wait: bool,

    /// Disable physical-offset probing on rotational disks.
    #[arg(long)]
    pub no_fiemap: bool,

    /// Treat each search root as its own disk (testing setups).
    #[arg(long, hide = true)]
    pub paths_as_disks: bool,

    /// Compare symlinks by their target paths instead of skipping them.
    #[arg(long, short = 's')]
    pub symlinks: bool,

    /// Seed the hash functions (same seed, same partitioning).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Emit line-delimited JSON records instead of the listing.
    #[arg(long)]
    pub json: bool,

    /// Verbose output. Default: false.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// The sidecar cache path, defaulting to the first scanned directory.
    pub fn sidecar_path(&self) -> PathBuf {
        self.sidecar.clone().unwrap_or_else(|| {
            self.dirs
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DefaultArgs::SIDECAR)
        })
    }
}
