//! Sifting: moving a freshly hashed file into the right child class.

use std::sync::Arc;

use super::digest::ChecksumKind;
use super::file::{FileState, ShredFile};
use super::group::ShredGroup;
use super::results::discard_file;
use super::session::ShredContext;

/// Re-home `file` — hashed up to its group's `next_offset` — into the
/// child class matching its digest, creating the class if this is the
/// first file to diverge there. New classes are announced to every
/// sibling digest still in flight, so running byte comparisons gain a
/// twin candidate.
///
/// Returns the file back when the worker that pushed it was waiting and
/// may continue hashing the same file without a seek.
pub fn sift(mut file: Box<ShredFile>, ctx: &Arc<ShredContext>) -> Option<Box<ShredFile>> {
    let current = file.group.clone().expect("sifted file belongs to a group");

    {
        let mut inner = current.lock_inner();
        if let Some(digest) = &file.digest {
            inner
                .in_progress_digests
                .retain(|d| !Arc::ptr_eq(d, digest));
        }
    }

    if file.state == FileState::Ignore {
        file.digest = None;
        discard_file(file, ctx);
        current.unref(ctx);
        return None;
    }

    let digest = file.digest.clone().expect("sifted file carries a digest");
    if current.kind == ChecksumKind::Paranoid
        && !(file.is_symlink && ctx.cfg.see_symlinks)
        && !file.has_ext_cksum
    {
        let inner = current.lock_inner();
        assert_eq!(
            digest.bytes_fed(),
            inner.next_offset - current.hash_offset,
            "byte-exact digest must cover exactly one increment"
        );
    }

    let child = {
        let mut inner = current.lock_inner();
        let key = digest.key();
        match inner.children.get(&key) {
            Some(child) => Arc::clone(child),
            None => {
                let child = ShredGroup::new_child(&mut file, &current, &inner, ctx);
                inner.children.insert(key, Arc::clone(&child));
                for pending in &inner.in_progress_digests {
                    pending.add_twin_candidate(&digest);
                }
                child
            }
        }
    };

    let result = child.push_file(file, false, ctx);

    // One fewer file pending re-home; may cascade into the parent chain.
    current.unref(ctx);
    result
}
