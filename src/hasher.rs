//! The hashing service.
//!
//! Workers hand increments over as two-step tasks: `start_increment` opens
//! the file and validates the request synchronously (so failures surface
//! before the caller commits), `finish_increment` queues the read on the
//! service's thread pool. The completion callback fires exactly once per
//! task — with the digest fed, or with the error. Read buffers are owned
//! per service thread and reused across tasks.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;

use crate::shred::digest::ShredDigest;
use crate::shred::file::ShredFile;
use crate::utils::config::HasherConsts;

/// A validated increment, ready to be queued.
pub struct HasherTask {
    file: Option<File>,
    path: PathBuf,
    offset: u64,
    length: u64,
    is_symlink: bool,
}

/// Completion callback: receives the file record back, the bytes fed to
/// the digest, and the outcome.
pub type HashDone = Box<dyn FnOnce(Box<ShredFile>, u64, Result<()>) + Send>;

struct HashJob {
    task: HasherTask,
    record: Box<ShredFile>,
    digest: Arc<ShredDigest>,
    done: HashDone,
}

pub struct Hasher {
    tx: Mutex<Option<Sender<HashJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hasher {
    /// Spawn the service. `read_buffer_mem` is the total budget for read
    /// buffers; each thread keeps one chunk-sized buffer within its share.
    pub fn new(threads: usize, use_buffered_read: bool, read_buffer_mem: u64) -> Arc<Self> {
        let (tx, rx) = unbounded::<HashJob>();
        let threads = threads.max(1);
        let chunk = (read_buffer_mem / threads as u64)
            .clamp(4096, HasherConsts::READ_CHUNK_SIZE as u64) as usize;
        debug!(
            "hasher: {} threads, buffered={}, {} byte chunks",
            threads, use_buffered_read, chunk
        );
        let handles = (0..threads)
            .map(|_| {
                let rx: Receiver<HashJob> = rx.clone();
                std::thread::spawn(move || {
                    let mut buf = vec![0u8; chunk];
                    while let Ok(job) = rx.recv() {
                        run_job(job, &mut buf, use_buffered_read);
                    }
                })
            })
            .collect();
        Arc::new(Hasher {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        })
    }

    /// Open and validate an increment. Fails synchronously when the file
    /// cannot be opened, letting the caller mark it ignored on the spot.
    pub fn start_increment(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
        is_symlink: bool,
        fadvise: bool,
    ) -> Result<HasherTask> {
        if is_symlink {
            return Ok(HasherTask {
                file: None,
                path: path.to_path_buf(),
                offset,
                length,
                is_symlink,
            });
        }
        let file =
            File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
        if fadvise {
            readahead_hint(&file, offset, length);
        }
        Ok(HasherTask {
            file: Some(file),
            path: path.to_path_buf(),
            offset,
            length,
            is_symlink,
        })
    }

    /// Queue the read. The callback fires exactly once, on a service
    /// thread — immediately with an error if the service is shut down.
    pub fn finish_increment(
        &self,
        task: HasherTask,
        record: Box<ShredFile>,
        digest: Arc<ShredDigest>,
        done: HashDone,
    ) {
        let job = HashJob {
            task,
            record,
            digest,
            done,
        };
        let tx = self.tx.lock().unwrap();
        match tx.as_ref().map(|tx| tx.send(job)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                let job = e.into_inner();
                (job.done)(job.record, 0, Err(anyhow::anyhow!("hasher shut down")));
            }
            None => unreachable!("finish_increment after shutdown"),
        }
    }

    /// Stop accepting work and join the service threads. Pending tasks
    /// complete first.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
        for handle in self.handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_job(job: HashJob, buf: &mut [u8], buffered: bool) {
    let HashJob {
        task,
        record,
        digest,
        done,
    } = job;
    let mut fed = 0u64;
    let res = hash_increment(&task, &digest, buf, &mut fed, buffered);
    done(record, fed, res);
}

fn hash_increment(
    task: &HasherTask,
    digest: &ShredDigest,
    buf: &mut [u8],
    fed: &mut u64,
    buffered: bool,
) -> Result<()> {
    if task.is_symlink {
        let target = std::fs::read_link(&task.path)
            .with_context(|| format!("read link {}", task.path.display()))?;
        let bytes = target.as_os_str().as_bytes();
        digest.update(bytes);
        *fed = bytes.len() as u64;
        return Ok(());
    }

    let file = task.file.as_ref().expect("regular file task has a handle");
    if buffered {
        hash_buffered(file, task, digest, buf, fed)
    } else {
        hash_positional(file, task, digest, buf, fed)
    }
}

/// Positional reads, no kernel-side buffering beyond readahead.
fn hash_positional(
    file: &File,
    task: &HasherTask,
    digest: &ShredDigest,
    buf: &mut [u8],
    fed: &mut u64,
) -> Result<()> {
    let mut offset = task.offset;
    let mut remaining = task.length;
    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        file.read_exact_at(&mut buf[..want], offset)
            .with_context(|| {
                format!(
                    "read {} bytes at {} from {}",
                    want,
                    offset,
                    task.path.display()
                )
            })?;
        digest.update(&buf[..want]);
        *fed += want as u64;
        offset += want as u64;
        remaining -= want as u64;
    }
    Ok(())
}

/// Buffered sequential reads; preferred on filesystems where pread is slow.
fn hash_buffered(
    file: &File,
    task: &HasherTask,
    digest: &ShredDigest,
    buf: &mut [u8],
    fed: &mut u64,
) -> Result<()> {
    let mut file = file;
    file.seek(SeekFrom::Start(task.offset))?;
    let mut reader = BufReader::with_capacity(HasherConsts::READ_CHUNK_SIZE, file);
    let mut remaining = task.length;
    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            bail!(
                "short read: {} of {} bytes left in {}",
                remaining,
                task.length,
                task.path.display()
            );
        }
        digest.update(&buf[..n]);
        *fed += n as u64;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn readahead_hint(file: &File, offset: u64, length: u64) {
    use std::os::fd::AsRawFd;
    // SAFETY: valid fd, advisory call; errors are ignored.
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            length as libc::off_t,
            libc::POSIX_FADV_WILLNEED,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn readahead_hint(_file: &File, _offset: u64, _length: u64) {}
