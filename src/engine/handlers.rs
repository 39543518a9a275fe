//! Command handler: wire the CLI onto a session and run it.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use crate::engine::arg_parser::{Algorithm, Cli};
use crate::engine::settings::{apply_file_to_cli, load_settings_toml};
use crate::iface::report::{JsonReporter, Reporter, TerminalReporter};
use crate::iface::sidecar::{JsonSidecar, NullSidecar, SidecarStore};
use crate::shred::{ChecksumKind, ShredConfig, ShredContext};
use crate::utils::setup_logging;
use crate::walk::parse_roots;
use crate::{default_oracle, run_with_ctx};

fn build_config(cli: &Cli) -> ShredConfig {
    let mut cfg = ShredConfig::default();
    cfg.checksum_kind = match cli.algorithm {
        Algorithm::Blake3 => ChecksumKind::Blake3,
        Algorithm::Paranoid => ChecksumKind::Paranoid,
    };
    cfg.min_mtime = cli.newer_than.unwrap_or(0);
    cfg.must_match_tagged = cli.must_match_tagged;
    cfg.must_match_untagged = cli.must_match_untagged;
    cfg.keep_all_tagged = cli.keep_all_tagged;
    cfg.keep_all_untagged = cli.keep_all_untagged;
    cfg.read_cksum_from_sidecar = cli.read_sidecar;
    cfg.write_cksum_to_sidecar = cli.write_sidecar;
    cfg.write_unfinished = cli.write_unfinished;
    if let Some(v) = cli.paranoid_mem {
        cfg.paranoid_mem = v;
    }
    if let Some(v) = cli.total_mem {
        cfg.total_mem = v;
    }
    if let Some(v) = cli.read_buffer_mem {
        cfg.read_buffer_mem = v;
    }
    if let Some(v) = cli.sweep_size {
        cfg.sweep_size = v;
    }
    if let Some(v) = cli.sweep_count {
        cfg.sweep_count = v;
    }
    if let Some(v) = cli.threads {
        cfg.threads = v;
    }
    cfg.use_buffered_read = cli.buffered_read;
    cfg.always_wait = cli.always_wait;
    cfg.never_wait = cli.never_wait;
    cfg.build_fiemap = !cli.no_fiemap;
    cfg.fake_pathindex_as_disk = cli.paths_as_disks;
    cfg.see_symlinks = cli.symlinks;
    cfg.hash_seed = cli.seed.unwrap_or(0);
    cfg
}

/// Handle the scan: discover, shred, summarize.
pub fn handle_scan(cli: &Cli) -> Result<()> {
    let mut cli = cli.clone();
    setup_logging(cli.verbose);
    if let Some(file) = load_settings_toml(
        &cli.dirs
            .first()
            .cloned()
            .unwrap_or_else(|| std::path::PathBuf::from(".")),
    ) {
        apply_file_to_cli(&file, &mut cli);
    }

    let cfg = build_config(&cli);
    let roots = parse_roots(&cli.dirs, &cli.tag);

    let reporter: Box<dyn Reporter> = if cli.json {
        Box::new(JsonReporter::new())
    } else {
        Box::new(TerminalReporter::new(!cli.verbose))
    };
    let sidecar: Box<dyn SidecarStore> = if cli.read_sidecar || cli.write_sidecar {
        Box::new(JsonSidecar::load(cli.sidecar_path()))
    } else {
        Box::new(NullSidecar)
    };

    let ctx = ShredContext::new(cfg, default_oracle(), sidecar, reporter);

    let abort_handle = Arc::downgrade(&ctx);
    if let Err(e) = ctrlc::set_handler(move || {
        if let Some(ctx) = abort_handle.upgrade() {
            ctx.abort();
        }
    }) {
        warn!("cannot install interrupt handler: {}", e);
    }

    let summary = run_with_ctx(&roots, &ctx)?;

    if summary.aborted {
        warn!("scan aborted; results are incomplete");
    }
    info!(
        "{} duplicate sets, {} duplicates, {} bytes reclaimable ({} of {} candidate bytes read)",
        summary.dup_groups,
        summary.dup_files,
        summary.reclaimable_bytes,
        summary.bytes_hashed,
        summary.bytes_considered
    );
    Ok(())
}
