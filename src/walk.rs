//! Discovery: walk the search roots and build the candidate file table,
//! bundled by hardlink identity. This is the thin front the binary puts in
//! front of the scheduler; everything interesting happens after it.

use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::shred::file::{HardlinkCluster, ShredFile};
use crate::shred::session::ShredConfig;

/// One search root and whether it is tagged as an "original" location.
#[derive(Clone, Debug)]
pub struct SearchRoot {
    pub path: PathBuf,
    pub tagged: bool,
}

fn stat_candidate(
    path: PathBuf,
    path_index: usize,
    tagged: bool,
    cfg: &ShredConfig,
) -> Option<Box<ShredFile>> {
    let meta = match std::fs::symlink_metadata(&path) {
        Ok(m) => m,
        Err(e) => {
            warn!("cannot stat {}: {}", path.display(), e);
            return None;
        }
    };
    let is_symlink = meta.file_type().is_symlink();
    if is_symlink && !cfg.see_symlinks {
        return None;
    }
    if !is_symlink && !meta.file_type().is_file() {
        return None;
    }
    let mut file = Box::new(ShredFile::new(
        path,
        meta.dev(),
        meta.ino(),
        meta.len(),
        meta.mtime(),
    ));
    file.path_index = path_index;
    file.is_prefd = tagged;
    file.is_symlink = is_symlink;
    Some(file)
}

/// Walk every root and return the candidate table: one record per inode,
/// extra paths of the same inode bundled under the first as hardlinks.
pub fn discover(roots: &[SearchRoot], cfg: &ShredConfig) -> Result<Vec<Box<ShredFile>>> {
    let mut paths: Vec<(PathBuf, usize, bool)> = Vec::new();
    for (index, root) in roots.iter().enumerate() {
        let mut count = 0usize;
        for entry in WalkDir::new(&root.path) {
            match entry {
                Ok(entry) => {
                    paths.push((entry.into_path(), index, root.tagged));
                    count += 1;
                }
                Err(err) => {
                    warn!("error walking {}: {}", root.path.display(), err);
                }
            }
        }
        debug!("walked {} entries under {}", count, root.path.display());
    }

    let mut files: Vec<Box<ShredFile>> = paths
        .into_par_iter()
        .filter_map(|(path, index, tagged)| stat_candidate(path, index, tagged, cfg))
        .collect();

    // Bundle hardlinks: the first path seen for an inode becomes the
    // cluster head, later ones ride along and are never hashed twice.
    files.sort_by(|a, b| {
        a.dev
            .cmp(&b.dev)
            .then(a.inode.cmp(&b.inode))
            .then(a.path_index.cmp(&b.path_index))
            .then_with(|| a.path.cmp(&b.path))
    });
    let mut heads: HashMap<(u64, u64), usize> = HashMap::new();
    let mut table: Vec<Box<ShredFile>> = Vec::with_capacity(files.len());
    for file in files {
        match heads.get(&(file.dev, file.inode)) {
            Some(&head_idx) if !file.is_symlink => {
                let head = &mut table[head_idx];
                let cluster = head.hardlinks.get_or_insert_with(HardlinkCluster::default);
                cluster.has_prefd |= file.is_prefd;
                cluster.has_non_prefd |= !file.is_prefd;
                cluster.files.push(file);
            }
            _ => {
                heads.insert((file.dev, file.inode), table.len());
                table.push(file);
            }
        }
    }

    debug!("discovered {} candidate inodes", table.len());
    Ok(table)
}

/// Combine plain and tagged directories into one root list; tagged roots
/// mark "original" locations for the keep criteria. Defaults to the
/// current directory when nothing is given.
pub fn parse_roots(dirs: &[PathBuf], tagged: &[PathBuf]) -> Vec<SearchRoot> {
    let mut roots: Vec<SearchRoot> = dirs
        .iter()
        .map(|p| SearchRoot {
            path: p.clone(),
            tagged: false,
        })
        .collect();
    roots.extend(tagged.iter().map(|p| SearchRoot {
        path: p.clone(),
        tagged: true,
    }));
    if roots.is_empty() {
        roots.push(SearchRoot {
            path: Path::new(".").to_path_buf(),
            tagged: false,
        });
    }
    roots
}
