use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use dupeshred::iface::report::CollectReporter;
use dupeshred::iface::sidecar::JsonSidecar;
use dupeshred::iface::{NullOracle, NullSidecar, SidecarStore};
use dupeshred::shred::{ChecksumKind, ShredConfig, ShredContext};
use dupeshred::walk::SearchRoot;
use dupeshred::{DupeSet, ShredSummary, find_dupes, run_with_ctx};

const KIB: u64 = 1024;

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dupeshred_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Patterned content so equal lengths do not mean equal bytes.
fn patterned(len: usize, tag: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ tag).collect()
}

fn scan_cfg() -> ShredConfig {
    let mut cfg = ShredConfig::default();
    // deterministic single-device setup, no mount or extent probing
    cfg.fake_pathindex_as_disk = true;
    cfg.build_fiemap = false;
    cfg.threads = 2;
    cfg
}

fn scan(dir: &Path, cfg: &ShredConfig) -> Result<(Vec<DupeSet>, ShredSummary)> {
    let roots = [SearchRoot {
        path: dir.to_path_buf(),
        tagged: false,
    }];
    find_dupes(&roots, cfg)
}

fn paths_of(set: &DupeSet) -> Vec<String> {
    let mut v: Vec<String> = set
        .files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    v.sort();
    v
}

// --- three identical files, one odd one out ---

#[test]
fn test_three_identical_one_odd() {
    let dir = test_dir("three_identical");
    let size = 64 * KIB as usize;
    let same = patterned(size, 0);
    let mut odd = same.clone();
    odd[0] ^= 0xFF; // differs from byte 0

    write_file(&dir, "a", &same);
    write_file(&dir, "b", &same);
    write_file(&dir, "c", &same);
    write_file(&dir, "d", &odd);

    let (sets, summary) = scan(&dir, &scan_cfg()).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(paths_of(&sets[0]), vec!["a", "b", "c"]);
    assert_eq!(sets[0].files.iter().filter(|f| f.is_original).count(), 1);
    assert_eq!(summary.dup_groups, 1);
    assert_eq!(summary.dup_files, 2);
    assert_eq!(summary.reclaimable_bytes, 2 * size as u64);
    // one read to diverge the odd one, one to confirm the rest
    assert!(summary.bytes_hashed <= 2 * 4 * size as u64);
}

// --- deep prefix match, no duplicates ---

#[test]
fn test_deep_prefix_match_stops_at_divergence() {
    let dir = test_dir("deep_prefix");
    let size = 8 * 1024 * KIB as usize;
    let a = patterned(size, 0);
    let mut b = a.clone();
    // diverge inside the third increment, well before EOF
    b[200 * KIB as usize] ^= 0xFF;

    write_file(&dir, "a", &a);
    write_file(&dir, "b", &b);

    let (sets, summary) = scan(&dir, &scan_cfg()).unwrap();
    assert!(sets.is_empty());
    assert_eq!(summary.dup_groups, 0);
    assert!(
        summary.bytes_hashed < 2 * size as u64,
        "files must not be read past the increment containing the divergence"
    );
}

// --- paranoid mode under a tight budget ---

#[test]
fn test_paranoid_tight_memory() {
    let dir = test_dir("paranoid_tight");
    let size = 64 * KIB as usize;
    let same = patterned(size, 7);
    for name in ["a", "b", "c", "d"] {
        write_file(&dir, name, &same);
    }

    let mut cfg = scan_cfg();
    cfg.checksum_kind = ChecksumKind::Paranoid;
    // budget far below one group's estimate: progress comes from the
    // active-group threshold admitting classes one at a time
    cfg.paranoid_mem = 16 * KIB;
    cfg.total_mem = 0;

    let (sets, summary) = scan(&dir, &cfg).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(paths_of(&sets[0]), vec!["a", "b", "c", "d"]);
    assert_eq!(summary.dup_files, 3);
}

// --- hardlink cluster plus an independent twin ---

#[test]
#[cfg(unix)]
fn test_hardlink_cluster_unbundles() {
    let dir = test_dir("hardlinks");
    let size = 16 * KIB as usize;
    let content = patterned(size, 3);

    let h1 = write_file(&dir, "h1", &content);
    let h2 = dir.join("h2");
    std::fs::hard_link(&h1, &h2).unwrap();
    write_file(&dir, "f", &content);

    let (sets, summary) = scan(&dir, &scan_cfg()).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(paths_of(&sets[0]), vec!["f", "h1", "h2"]);
    assert_eq!(summary.dup_files, 2);
    // hardlinks contribute no extra space: only one inode is reclaimable
    assert_eq!(summary.reclaimable_bytes, size as u64);
    assert_eq!(sets[0].files.iter().filter(|f| f.is_hardlink).count(), 1);
}

// --- external checksums short-circuit all reads ---

#[test]
fn test_sidecar_checksums_skip_reading() {
    let dir = test_dir("sidecar");
    let size = 32 * KIB as usize;
    let content = patterned(size, 5);
    let p1 = write_file(&dir, "a", &content);
    let p2 = write_file(&dir, "b", &content);

    let store = JsonSidecar::load(dir.join("cache.json"));
    store.write_hash(&p1, "cafebabe");
    store.write_hash(&p2, "cafebabe");

    let mut cfg = scan_cfg();
    cfg.read_cksum_from_sidecar = true;

    let collector = Arc::new(CollectReporter::new());
    let ctx = ShredContext::new(
        cfg,
        Box::new(NullOracle),
        Box::new(store),
        Box::new(Arc::clone(&collector)),
    );
    let roots = [SearchRoot {
        path: dir.clone(),
        tagged: false,
    }];
    let summary = run_with_ctx(&roots, &ctx).unwrap();

    let groups = collector.take_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert_eq!(groups[0][0].checksum.as_deref(), Some("cafebabe"));
    assert_eq!(summary.bytes_hashed, 0, "no byte may be read from disk");
}

// --- cancellation before any work ---

#[test]
fn test_abort_emits_nothing() {
    let dir = test_dir("abort");
    let content = patterned(16 * KIB as usize, 1);
    write_file(&dir, "a", &content);
    write_file(&dir, "b", &content);

    let collector = Arc::new(CollectReporter::new());
    let ctx = ShredContext::new(
        scan_cfg(),
        Box::new(NullOracle),
        Box::new(NullSidecar),
        Box::new(Arc::clone(&collector)),
    );
    ctx.abort();

    let roots = [SearchRoot {
        path: dir.clone(),
        tagged: false,
    }];
    let summary = run_with_ctx(&roots, &ctx).unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.dup_groups, 0);
    assert!(collector.take_groups().is_empty());
}

// --- boundary behaviors ---

#[test]
fn test_singleton_sizes_emit_nothing() {
    let dir = test_dir("singletons");
    write_file(&dir, "a", &patterned(4 * KIB as usize, 0));
    write_file(&dir, "b", &patterned(8 * KIB as usize, 0));

    let (sets, summary) = scan(&dir, &scan_cfg()).unwrap();
    assert!(sets.is_empty());
    assert_eq!(summary.dup_groups, 0);
}

#[test]
fn test_empty_files_are_filtered() {
    let dir = test_dir("empty");
    write_file(&dir, "a", b"");
    write_file(&dir, "b", b"");

    let (sets, _summary) = scan(&dir, &scan_cfg()).unwrap();
    assert!(sets.is_empty());
}

#[test]
fn test_same_size_different_content() {
    let dir = test_dir("same_size_diff");
    write_file(&dir, "a", &patterned(16 * KIB as usize, 1));
    write_file(&dir, "b", &patterned(16 * KIB as usize, 2));

    let (sets, _summary) = scan(&dir, &scan_cfg()).unwrap();
    assert!(sets.is_empty());
}

// --- determinism ---

#[test]
fn test_same_input_same_partitioning() {
    let dir = test_dir("idempotent");
    let content = patterned(32 * KIB as usize, 9);
    write_file(&dir, "a", &content);
    write_file(&dir, "b", &content);
    write_file(&dir, "c", &patterned(32 * KIB as usize, 10));

    let mut cfg = scan_cfg();
    cfg.hash_seed = 1234;

    let (first, _) = scan(&dir, &cfg).unwrap();
    let (second, _) = scan(&dir, &cfg).unwrap();
    let flatten = |sets: &[DupeSet]| -> Vec<Vec<String>> {
        let mut v: Vec<Vec<String>> = sets.iter().map(paths_of).collect();
        v.sort();
        v
    };
    assert_eq!(flatten(&first), flatten(&second));
    assert_eq!(first.len(), 1);
}

// --- originals selection ---

#[test]
fn test_tagged_root_keeps_all_tagged() {
    let keep = test_dir("tagged_keep");
    let scan_root = test_dir("tagged_scan");
    let content = patterned(16 * KIB as usize, 4);
    write_file(&keep, "master", &content);
    write_file(&scan_root, "copy1", &content);
    write_file(&scan_root, "copy2", &content);

    let mut cfg = scan_cfg();
    cfg.keep_all_tagged = true;

    let roots = [
        SearchRoot {
            path: scan_root.clone(),
            tagged: false,
        },
        SearchRoot {
            path: keep.clone(),
            tagged: true,
        },
    ];
    let (sets, _) = find_dupes(&roots, &cfg).unwrap();
    assert_eq!(sets.len(), 1);
    let master = sets[0]
        .files
        .iter()
        .find(|f| f.path.ends_with("master"))
        .unwrap();
    assert!(master.is_original);
    // the top-ranked untagged file is also kept, so one copy remains
    assert_eq!(sets[0].duplicates().count(), 1);
}
