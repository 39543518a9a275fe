use std::path::PathBuf;
use std::sync::Arc;

use dupeshred::shred::{
    ChecksumKind, FileState, GroupStatus, ShredConfig, ShredContext, ShredDevice, ShredDigest,
    ShredFile, ShredGroup,
};
use dupeshred::utils::config::ReadSizeConsts;
use dupeshred::utils::parse_size;

fn test_ctx(cfg: ShredConfig) -> Arc<ShredContext> {
    ShredContext::for_tests(cfg)
}

fn test_device() -> Arc<ShredDevice> {
    Arc::new(ShredDevice::new(0, "testdisk".to_string(), false))
}

fn test_file(path: &str, size: u64, inode: u64, device: &Arc<ShredDevice>) -> Box<ShredFile> {
    let mut f = Box::new(ShredFile::new(PathBuf::from(path), 7, inode, size, 1000));
    f.device = Some(Arc::clone(device));
    f
}

// --- parse_size ---

#[test]
fn test_parse_size_plain() {
    assert_eq!(parse_size("4096").unwrap(), 4096);
}

#[test]
fn test_parse_size_suffixes() {
    assert_eq!(parse_size("4K").unwrap(), 4096);
    assert_eq!(parse_size("2m").unwrap(), 2 * 1024 * 1024);
    assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
}

#[test]
fn test_parse_size_rejects_garbage() {
    assert!(parse_size("").is_err());
    assert!(parse_size("12X").is_err());
    assert!(parse_size("K").is_err());
}

// --- digest equality ---

#[test]
fn test_stream_digest_equal_same_bytes() {
    let a = ShredDigest::new_stream(42);
    let b = ShredDigest::new_stream(42);
    a.update(b"hello world");
    b.update(b"hello world");
    assert_eq!(a.key(), b.key());
    assert!(a == b);
}

#[test]
fn test_stream_digest_diverges() {
    let a = ShredDigest::new_stream(42);
    let b = ShredDigest::new_stream(42);
    a.update(b"hello world");
    b.update(b"hello earth");
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_stream_digest_seed_changes_key() {
    let a = ShredDigest::new_stream(1);
    let b = ShredDigest::new_stream(2);
    a.update(b"same bytes");
    b.update(b"same bytes");
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_stream_digest_fork_continues_prefix() {
    let a = ShredDigest::new_stream(0);
    a.update(b"prefix");
    let b = a.fork();
    a.update(b"-tail");
    b.update(b"-tail");
    assert_eq!(a.key(), b.key());
}

#[test]
fn test_paranoid_digest_equality_is_bytewise() {
    let a = ShredDigest::new_paranoid(0, 16, false);
    let b = ShredDigest::new_paranoid(0, 16, false);
    a.update(b"0123456789");
    b.update(b"0123456789");
    assert_eq!(a.key(), b.key());
    b.update(b"x");
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_paranoid_bytes_fed() {
    let d = ShredDigest::new_paranoid(0, 16, false);
    d.update(b"abcd");
    d.update(b"ef");
    assert_eq!(d.bytes_fed(), 6);
}

// --- twin candidates ---

#[test]
fn test_twin_candidate_matches_increment() {
    let proto = ShredDigest::new_paranoid(0, 8, false);
    proto.update(b"deadbeef");

    let running = ShredDigest::new_paranoid(0, 8, false);
    running.add_twin_candidate(&proto);
    assert!(running.has_twin_candidate());

    running.update(b"dead");
    assert!(running.has_twin_candidate());
    running.update(b"beef");
    assert!(running.has_twin_candidate());
    assert_eq!(running.key(), proto.key());
}

#[test]
fn test_twin_candidate_dropped_on_mismatch() {
    let proto = ShredDigest::new_paranoid(0, 8, false);
    proto.update(b"deadbeef");

    let running = ShredDigest::new_paranoid(0, 8, false);
    running.add_twin_candidate(&proto);
    running.update(b"dead");
    running.update(b"f00d");
    assert!(!running.has_twin_candidate());
}

#[test]
fn test_twin_candidate_added_midway() {
    let proto = ShredDigest::new_paranoid(0, 8, false);
    proto.update(b"deadbeef");

    let running = ShredDigest::new_paranoid(0, 8, false);
    running.update(b"dead");
    running.add_twin_candidate(&proto);
    assert!(running.has_twin_candidate());

    let diverged = ShredDigest::new_paranoid(0, 8, false);
    diverged.update(b"f00d");
    diverged.add_twin_candidate(&proto);
    assert!(!diverged.has_twin_candidate());
}

#[test]
fn test_twin_candidate_ignored_for_stream() {
    let proto = ShredDigest::new_stream(0);
    proto.update(b"data");
    let running = ShredDigest::new_stream(0);
    running.add_twin_candidate(&proto);
    assert!(!running.has_twin_candidate());
}

// --- read order ---

#[test]
fn test_read_order_by_device_then_offset_then_inode() {
    use dupeshred::shred::file::cmp_read_order;
    use std::cmp::Ordering;

    let device = test_device();
    let mut a = test_file("/a", 100, 10, &device);
    let mut b = test_file("/b", 100, 20, &device);

    // same dev, zero offsets: inode decides
    assert_eq!(cmp_read_order(&a, &b), Ordering::Less);

    // physical offset dominates inode
    a.phys_offset = 9000;
    b.phys_offset = 100;
    assert_eq!(cmp_read_order(&a, &b), Ordering::Greater);

    // device dominates everything
    b.dev = 99;
    assert_eq!(cmp_read_order(&a, &b), Ordering::Less);
}

#[test]
fn test_read_order_subvol_ignores_device() {
    use dupeshred::shred::file::cmp_read_order;
    use std::cmp::Ordering;

    let device = test_device();
    let mut a = test_file("/a", 100, 10, &device);
    let mut b = test_file("/b", 100, 20, &device);
    a.dev = 1;
    b.dev = 2;
    a.is_on_subvol_fs = true;
    b.is_on_subvol_fs = true;
    // same path index, subvolume filesystems: device numbers lie, use inode
    assert_eq!(cmp_read_order(&a, &b), Ordering::Less);
}

// --- read-size policy ---

#[test]
fn test_read_size_first_generation_is_balanced_pages() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(64 * 1024 * 1024, ChecksumKind::Blake3);
    let mut file = test_file("/a", 64 * 1024 * 1024, 1, &device);

    let mut inner = group.lock_inner();
    let bytes = group.next_read_size(&mut inner, &mut file, &ctx);
    assert_eq!(bytes, ReadSizeConsts::BALANCED_PAGES * ctx.page_size);
    assert_eq!(inner.next_offset, bytes);
}

#[test]
fn test_read_size_absorbs_tail() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    // target + slack reaches past EOF: the read covers the whole file
    let size = ReadSizeConsts::BALANCED_PAGES * ctx.page_size * 2 - 1;
    let group = ShredGroup::new_root(size, ChecksumKind::Blake3);
    let mut file = test_file("/a", size, 1, &device);

    let mut inner = group.lock_inner();
    let bytes = group.next_read_size(&mut inner, &mut file, &ctx);
    assert_eq!(inner.next_offset, size);
    assert_eq!(bytes, size);
    assert!(file.fadvise_requested);
}

#[test]
fn test_read_size_scales_with_offset_factor() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(1 << 40, ChecksumKind::Blake3);
    let mut file = test_file("/a", 1 << 40, 1, &device);

    let mut inner = group.lock_inner();
    inner.offset_factor = 64;
    let bytes = group.next_read_size(&mut inner, &mut file, &ctx);
    assert_eq!(bytes, 64 * ReadSizeConsts::BALANCED_PAGES * ctx.page_size);
}

#[test]
fn test_read_size_paranoid_cap() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(1 << 40, ChecksumKind::Paranoid);
    let mut file = test_file("/a", 1 << 40, 1, &device);

    let mut inner = group.lock_inner();
    inner.offset_factor = ReadSizeConsts::max_read_factor(ctx.page_size);
    let bytes = group.next_read_size(&mut inner, &mut file, &ctx);
    assert_eq!(bytes, ReadSizeConsts::PARANOID_MAX_INCREMENT);
}

#[test]
fn test_read_size_resets_file_state() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(1 << 30, ChecksumKind::Blake3);
    let mut file = test_file("/a", 1 << 30, 1, &device);
    file.state = FileState::Fragment;

    let mut inner = group.lock_inner();
    let _ = group.next_read_size(&mut inner, &mut file, &ctx);
    assert_eq!(file.state, FileState::Normal);
}

#[test]
fn test_offset_factor_saturates_in_children() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let parent = ShredGroup::new_root(1 << 30, ChecksumKind::Blake3);
    let max = ReadSizeConsts::max_read_factor(ctx.page_size);
    {
        let mut inner = parent.lock_inner();
        inner.offset_factor = max / 4;
    }

    let mut file = test_file("/a", 1 << 30, 1, &device);
    file.advance(4096);
    file.digest = Some(Arc::new(ShredDigest::new_stream(0)));
    let inner = parent.lock_inner();
    let child = ShredGroup::new_child(&mut file, &parent, &inner, &ctx);
    assert_eq!(child.lock_inner().offset_factor, max);
}

// --- promotion predicate ---

#[test]
fn test_group_promotes_at_two_files() {
    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(4096, ChecksumKind::Blake3);

    assert!(group.push_file(test_file("/a", 4096, 1, &device), true, &ctx).is_none());
    assert_eq!(group.status(), GroupStatus::Dormant);
    assert_eq!(device.lock_queue().files.len(), 0);

    assert!(group.push_file(test_file("/b", 4096, 2, &device), true, &ctx).is_none());
    assert_eq!(group.status(), GroupStatus::Hashing);
    // promotion drained both held files into the device queue
    assert_eq!(device.lock_queue().files.len(), 2);
    assert_eq!(group.ref_count_value(), 2);
}

#[test]
fn test_group_waits_for_tagged_member() {
    let mut cfg = ShredConfig::default();
    cfg.must_match_tagged = true;
    let ctx = test_ctx(cfg);
    let device = test_device();
    let group = ShredGroup::new_root(4096, ChecksumKind::Blake3);

    group.push_file(test_file("/a", 4096, 1, &device), true, &ctx);
    group.push_file(test_file("/b", 4096, 2, &device), true, &ctx);
    assert_eq!(group.status(), GroupStatus::Dormant);

    let mut tagged = test_file("/c", 4096, 3, &device);
    tagged.is_prefd = true;
    group.push_file(tagged, true, &ctx);
    assert_eq!(group.status(), GroupStatus::Hashing);
    assert_eq!(device.lock_queue().files.len(), 3);
}

#[test]
fn test_group_waits_for_untagged_member() {
    let mut cfg = ShredConfig::default();
    cfg.keep_all_tagged = true; // implies a group needs an untagged file
    let ctx = test_ctx(cfg);
    let device = test_device();
    let group = ShredGroup::new_root(4096, ChecksumKind::Blake3);

    let mut a = test_file("/a", 4096, 1, &device);
    let mut b = test_file("/b", 4096, 2, &device);
    a.is_prefd = true;
    b.is_prefd = true;
    group.push_file(a, true, &ctx);
    group.push_file(b, true, &ctx);
    assert_eq!(group.status(), GroupStatus::Dormant);

    group.push_file(test_file("/c", 4096, 3, &device), true, &ctx);
    assert_eq!(group.status(), GroupStatus::Hashing);
}

#[test]
fn test_group_waits_for_new_member() {
    let mut cfg = ShredConfig::default();
    cfg.min_mtime = 5000;
    let ctx = test_ctx(cfg);
    let device = test_device();
    let group = ShredGroup::new_root(4096, ChecksumKind::Blake3);

    // default helper mtime is 1000, older than the cutoff
    group.push_file(test_file("/a", 4096, 1, &device), true, &ctx);
    group.push_file(test_file("/b", 4096, 2, &device), true, &ctx);
    assert_eq!(group.status(), GroupStatus::Dormant);

    let mut fresh = test_file("/c", 4096, 3, &device);
    fresh.is_new_or_has_new = true;
    group.push_file(fresh, true, &ctx);
    assert_eq!(group.status(), GroupStatus::Hashing);
}

#[test]
fn test_hardlink_cluster_counts_toward_promotion() {
    use dupeshred::shred::HardlinkCluster;

    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let group = ShredGroup::new_root(4096, ChecksumKind::Blake3);

    let mut head = test_file("/a", 4096, 1, &device);
    head.hardlinks = Some(HardlinkCluster {
        has_prefd: false,
        has_non_prefd: true,
        files: vec![test_file("/a2", 4096, 1, &device)],
    });
    group.push_file(head, true, &ctx);
    // one record, two members: still not enough for a duplicate *pair*
    // of distinct inodes, but membership count is 2
    assert_eq!(group.lock_inner().num_files, 2);
}

// --- sifting and the refinement tree ---

fn hashed(mut file: Box<ShredFile>, to: u64, content: &[u8]) -> Box<ShredFile> {
    let digest = ShredDigest::new_stream(0);
    digest.update(content);
    file.digest = Some(Arc::new(digest));
    let step = to - file.hash_offset;
    file.advance(step);
    file
}

#[test]
fn test_sift_creates_and_reuses_children() {
    use dupeshred::shred::sift;

    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let root = ShredGroup::new_root(1024, ChecksumKind::Blake3);

    root.push_file(test_file("/a", 1024, 1, &device), true, &ctx);
    root.push_file(test_file("/b", 1024, 2, &device), true, &ctx);
    root.push_file(test_file("/c", 1024, 3, &device), true, &ctx);
    assert_eq!(root.ref_count_value(), 3);

    let mut queued = Vec::new();
    while let Some(f) = device.lock_queue().files.pop_front() {
        queued.push(f);
    }
    assert_eq!(queued.len(), 3);

    // a and b agree on the first increment, c diverges
    let a = hashed(queued.remove(0), 1024, b"same");
    let b = hashed(queued.remove(0), 1024, b"same");
    let c = hashed(queued.remove(0), 1024, b"diff");

    assert!(sift(a, &ctx).is_none());
    assert_eq!(root.ref_count_value(), 2);
    assert_eq!(root.lock_inner().children.len(), 1);

    let twin_child = root.lock_inner().children.values().next().unwrap().clone();
    assert_eq!(twin_child.hash_offset, 1024);
    assert_eq!(twin_child.ref_count_value(), 2); // parent + file a

    assert!(sift(b, &ctx).is_none());
    assert_eq!(root.lock_inner().children.len(), 1, "b joins a's class");
    // both files fully hashed: the class is finishing, members held
    assert_eq!(twin_child.status(), GroupStatus::Finishing);
    assert_eq!(twin_child.ref_count_value(), 3);

    assert!(sift(c, &ctx).is_none());
    // root lost its last file and died; children were orphaned
    assert_eq!(twin_child.ref_count_value(), 2);
    assert!(twin_child.parent().is_none());
    assert_eq!(twin_child.lock_inner().held_files.len(), 2);
}

#[test]
fn test_sift_discards_ignored_files() {
    use dupeshred::shred::sift;

    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let root = ShredGroup::new_root(1024, ChecksumKind::Blake3);
    root.push_file(test_file("/a", 1024, 1, &device), true, &ctx);
    root.push_file(test_file("/b", 1024, 2, &device), true, &ctx);

    let mut a = device.lock_queue().files.pop_front().unwrap();
    a.state = FileState::Ignore;
    a.digest = Some(Arc::new(ShredDigest::new_stream(0)));
    assert!(sift(a, &ctx).is_none());
    assert_eq!(root.ref_count_value(), 1);
    assert!(root.lock_inner().children.is_empty());
}

#[test]
fn test_child_offset_exceeds_parent_offset() {
    use dupeshred::shred::sift;

    let ctx = test_ctx(ShredConfig::default());
    let device = test_device();
    let root = ShredGroup::new_root(1 << 20, ChecksumKind::Blake3);
    root.push_file(test_file("/a", 1 << 20, 1, &device), true, &ctx);
    root.push_file(test_file("/b", 1 << 20, 2, &device), true, &ctx);

    let a = device.lock_queue().files.pop_front().unwrap();
    let a = hashed(a, 16384, b"first increment");
    sift(a, &ctx);

    let child = root.lock_inner().children.values().next().unwrap().clone();
    assert!(child.hash_offset > root.hash_offset);
    assert_eq!(child.file_size, root.file_size);
}

// --- governor ---

#[test]
fn test_governor_admits_within_budget() {
    let mut cfg = ShredConfig::default();
    cfg.checksum_kind = ChecksumKind::Paranoid;
    let ctx = test_ctx(cfg);
    let device = test_device();
    ctx.governor.fund(1 << 30);

    let group = ShredGroup::new_root(4096, ChecksumKind::Paranoid);
    group.push_file(test_file("/a", 4096, 1, &device), true, &ctx);
    group.push_file(test_file("/b", 4096, 2, &device), true, &ctx);
    assert_eq!(group.status(), GroupStatus::StartHashing);

    let mut inner = group.lock_inner();
    assert!(ctx.governor.admit(&group, &mut inner, 0));
    assert_eq!(inner.status, GroupStatus::Hashing);
    drop(inner);
    // (ref_count 2)/2 + 1 = 2 buffers of one whole file each
    assert_eq!(group.mem_allocation_value(), 2 * 4096);
    assert_eq!(ctx.governor.available(), (1 << 30) - 2 * 4096);
    assert_eq!(ctx.governor.active_groups(), 1);

    // idempotent once hashing
    let mut inner = group.lock_inner();
    assert!(ctx.governor.admit(&group, &mut inner, 0));
    drop(inner);
    assert_eq!(ctx.governor.active_groups(), 1);
}

#[test]
fn test_governor_refuses_then_admits_by_threshold() {
    let mut cfg = ShredConfig::default();
    cfg.checksum_kind = ChecksumKind::Paranoid;
    let ctx = test_ctx(cfg);
    let device = test_device();
    ctx.governor.fund(16); // far too small for anything

    let first = ShredGroup::new_root(4096, ChecksumKind::Paranoid);
    first.push_file(test_file("/a", 4096, 1, &device), true, &ctx);
    first.push_file(test_file("/b", 4096, 2, &device), true, &ctx);
    let mut inner = first.lock_inner();
    // zero active groups: admitted despite the budget
    assert!(ctx.governor.admit(&first, &mut inner, 0));
    drop(inner);

    let second = ShredGroup::new_root(8192, ChecksumKind::Paranoid);
    second.push_file(test_file("/c", 8192, 3, &device), true, &ctx);
    second.push_file(test_file("/d", 8192, 4, &device), true, &ctx);
    let mut inner = second.lock_inner();
    assert!(!ctx.governor.admit(&second, &mut inner, 0));
    assert_eq!(inner.status, GroupStatus::StartHashing);
    drop(inner);

    // first group done: its allocation returns and unblocks the second
    let mut inner = first.lock_inner();
    ctx.governor.reclaim(&first, &mut inner);
    drop(inner);
    assert_eq!(ctx.governor.active_groups(), 0);

    let mut inner = second.lock_inner();
    assert!(ctx.governor.admit(&second, &mut inner, 0));
    drop(inner);
}

#[test]
fn test_governor_child_inherits_parent_allocation() {
    use dupeshred::shred::sift;

    let mut cfg = ShredConfig::default();
    cfg.checksum_kind = ChecksumKind::Paranoid;
    let ctx = test_ctx(cfg);
    let device = test_device();
    ctx.governor.fund(1 << 30);

    let root = ShredGroup::new_root(1 << 20, ChecksumKind::Paranoid);
    root.push_file(test_file("/a", 1 << 20, 1, &device), true, &ctx);
    root.push_file(test_file("/b", 1 << 20, 2, &device), true, &ctx);
    let mut inner = root.lock_inner();
    assert!(ctx.governor.admit(&root, &mut inner, 0));
    drop(inner);
    let root_alloc = root.mem_allocation_value();
    assert!(root_alloc > 0);

    // one file diverges into a child, which then asks for memory
    let mut a = device.lock_queue().files.pop_front().unwrap();
    let digest = ShredDigest::new_paranoid(0, 16384, false);
    digest.update(&vec![0u8; 16384]);
    a.digest = Some(Arc::new(digest));
    a.advance(16384);
    {
        let mut inner = root.lock_inner();
        inner.next_offset = 16384;
    }
    sift(a, &ctx);

    let child = root.lock_inner().children.values().next().unwrap().clone();
    child.push_file(
        {
            let mut f = test_file("/c", 1 << 20, 3, &device);
            f.advance(16384);
            f
        },
        false,
        &ctx,
    );
    let mut inner = child.lock_inner();
    assert!(ctx.governor.admit(&child, &mut inner, 0));
    drop(inner);
    assert!(child.mem_allocation_value() > 0);
    assert!(
        root.mem_allocation_value() < root_alloc,
        "child takes from the parent's loan before the bank"
    );
}
