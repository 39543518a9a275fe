//! Progressive digest handles.
//!
//! A digest accumulates one file's bytes across hashing generations. Three
//! kinds exist: a streaming blake3 hash, a byte-exact ("paranoid") buffer
//! whose equality is a memcmp of the increment, and an externally supplied
//! checksum read from the sidecar cache. Two digests compare equal iff they
//! are the same kind, carry the same seed and were fed identical bytes.

use std::sync::{Arc, Mutex};

/// Which digest flavor a session runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Streaming blake3; equality via the 32-byte finalized hash.
    Blake3,
    /// Byte-exact comparison; the "digest" buffers the increment.
    Paranoid,
}

/// A sibling class digest fed into a running byte comparison so the
/// comparison can fail fast before the increment finishes reading.
struct TwinCandidate {
    data: Arc<Vec<u8>>,
    /// Bytes matched so far; candidate is discarded on first mismatch.
    matched: usize,
}

enum DigestInner {
    Stream {
        hasher: blake3::Hasher,
        bytes_fed: u64,
    },
    Paranoid {
        /// Bytes of the current increment. Arc so sealed prototypes can be
        /// handed to siblings as twin candidates without copying.
        data: Arc<Vec<u8>>,
        /// Optional streaming shadow of everything fed, for hex output and
        /// cheap hashtable keys.
        shadow: Option<blake3::Hasher>,
        candidates: Vec<TwinCandidate>,
        /// A candidate that matched the full increment.
        twin: Option<Arc<Vec<u8>>>,
    },
    Ext {
        hex: Arc<str>,
    },
}

/// Opaque progressive hash value. Shared between the owning file record,
/// the hasher thread feeding it, and the group's in-progress list, hence
/// the internal lock.
pub struct ShredDigest {
    kind: ChecksumKind,
    seed: u64,
    inner: Mutex<DigestInner>,
}

fn keyed_hasher(seed: u64) -> blake3::Hasher {
    if seed == 0 {
        blake3::Hasher::new()
    } else {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&seed.to_le_bytes());
        blake3::Hasher::new_keyed(&key)
    }
}

impl ShredDigest {
    pub fn new_stream(seed: u64) -> Self {
        ShredDigest {
            kind: ChecksumKind::Blake3,
            seed,
            inner: Mutex::new(DigestInner::Stream {
                hasher: keyed_hasher(seed),
                bytes_fed: 0,
            }),
        }
    }

    pub fn new_paranoid(seed: u64, size_hint: u64, shadow: bool) -> Self {
        ShredDigest {
            kind: ChecksumKind::Paranoid,
            seed,
            inner: Mutex::new(DigestInner::Paranoid {
                data: Arc::new(Vec::with_capacity(size_hint.min(isize::MAX as u64) as usize)),
                shadow: shadow.then(|| keyed_hasher(seed)),
                candidates: Vec::new(),
                twin: None,
            }),
        }
    }

    /// Wrap a checksum string read from the sidecar cache.
    pub fn new_ext(hex: &str) -> Self {
        ShredDigest {
            kind: ChecksumKind::Blake3,
            seed: 0,
            inner: Mutex::new(DigestInner::Ext { hex: hex.into() }),
        }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    /// True for sidecar-sourced checksums, which never take byte updates.
    pub fn is_external(&self) -> bool {
        matches!(&*self.inner.lock().unwrap(), DigestInner::Ext { .. })
    }

    /// Feed the next bytes of the file. For paranoid digests this also
    /// advances every live twin comparison and drops mismatching
    /// candidates.
    pub fn update(&self, buf: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            DigestInner::Stream { hasher, bytes_fed } => {
                hasher.update(buf);
                *bytes_fed += buf.len() as u64;
            }
            DigestInner::Paranoid {
                data,
                shadow,
                candidates,
                twin,
            } => {
                let off = data.len();
                Arc::make_mut(data).extend_from_slice(buf);
                if let Some(sh) = shadow {
                    sh.update(buf);
                }
                candidates.retain_mut(|cand| {
                    if cand.matched >= cand.data.len() {
                        // fully matched on an earlier update; twin already recorded
                        return false;
                    }
                    debug_assert_eq!(cand.matched, off);
                    let end = (off + buf.len()).min(cand.data.len());
                    if cand.data[off..end] != buf[..end - off] {
                        return false;
                    }
                    cand.matched = end;
                    if cand.matched == cand.data.len() {
                        *twin = Some(Arc::clone(&cand.data));
                    }
                    true
                });
            }
            DigestInner::Ext { .. } => {
                debug_assert!(false, "external checksums take no byte updates");
            }
        }
    }

    /// Total bytes fed so far.
    pub fn bytes_fed(&self) -> u64 {
        match &*self.inner.lock().unwrap() {
            DigestInner::Stream { bytes_fed, .. } => *bytes_fed,
            DigestInner::Paranoid { data, .. } => data.len() as u64,
            DigestInner::Ext { hex } => hex.len() as u64,
        }
    }

    /// Copy for the next generation: a file entering a hashing group picks
    /// up the group's prototype stream state and extends it independently.
    pub fn fork(&self) -> ShredDigest {
        let inner = self.inner.lock().unwrap();
        let forked = match &*inner {
            DigestInner::Stream { hasher, bytes_fed } => DigestInner::Stream {
                hasher: hasher.clone(),
                bytes_fed: *bytes_fed,
            },
            DigestInner::Paranoid { data, shadow, .. } => DigestInner::Paranoid {
                data: Arc::clone(data),
                shadow: shadow.clone(),
                candidates: Vec::new(),
                twin: None,
            },
            DigestInner::Ext { hex } => DigestInner::Ext { hex: Arc::clone(hex) },
        };
        ShredDigest {
            kind: self.kind,
            seed: self.seed,
            inner: Mutex::new(forked),
        }
    }

    /// Register a sealed sibling digest as a twin candidate for the running
    /// byte comparison. No-op for non-paranoid kinds.
    pub fn add_twin_candidate(&self, other: &ShredDigest) {
        let snapshot = {
            match &*other.inner.lock().unwrap() {
                DigestInner::Paranoid { data, .. } => Arc::clone(data),
                _ => return,
            }
        };
        let mut inner = self.inner.lock().unwrap();
        if let DigestInner::Paranoid {
            data,
            candidates,
            twin,
            ..
        } = &mut *inner
        {
            let fed = data.len();
            let prefix = fed.min(snapshot.len());
            if data[..prefix] != snapshot[..prefix] {
                return;
            }
            if prefix == snapshot.len() {
                *twin = Some(Arc::clone(&snapshot));
            }
            candidates.push(TwinCandidate {
                data: snapshot,
                matched: prefix,
            });
        }
    }

    /// True when at least one sibling candidate is still in play.
    pub fn has_twin_candidate(&self) -> bool {
        match &*self.inner.lock().unwrap() {
            DigestInner::Paranoid {
                candidates, twin, ..
            } => twin.is_some() || !candidates.is_empty(),
            _ => false,
        }
    }

    /// Content key for group-child lookup. Cheap to hash; equality is full
    /// content equality (memcmp for the paranoid kind).
    pub fn key(&self) -> DigestKey {
        match &*self.inner.lock().unwrap() {
            DigestInner::Stream { hasher, .. } => {
                DigestKey::Stream(*hasher.finalize().as_bytes(), self.seed)
            }
            DigestInner::Paranoid { data, shadow, .. } => {
                let fp = match shadow {
                    Some(sh) => *sh.finalize().as_bytes(),
                    None => *blake3::hash(data).as_bytes(),
                };
                DigestKey::Bytes {
                    fingerprint: fp,
                    data: Arc::clone(data),
                }
            }
            DigestInner::Ext { hex } => DigestKey::Ext(Arc::clone(hex)),
        }
    }

    /// Hex rendering for sidecar write-back and report output.
    pub fn hexdigest(&self) -> String {
        match &*self.inner.lock().unwrap() {
            DigestInner::Stream { hasher, .. } => hasher.finalize().to_hex().to_string(),
            DigestInner::Paranoid { data, shadow, .. } => match shadow {
                Some(sh) => sh.finalize().to_hex().to_string(),
                None => blake3::hash(data).to_hex().to_string(),
            },
            DigestInner::Ext { hex } => hex.to_string(),
        }
    }
}

impl PartialEq for ShredDigest {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.seed == other.seed && self.key() == other.key()
    }
}

impl std::fmt::Debug for ShredDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShredDigest")
            .field("kind", &self.kind)
            .field("bytes_fed", &self.bytes_fed())
            .finish()
    }
}

/// Hashable content key of a digest. Paranoid keys hash by fingerprint but
/// compare by the full buffer, so fingerprint collisions cannot merge
/// distinct classes.
#[derive(Clone, Debug)]
pub enum DigestKey {
    Stream([u8; 32], u64),
    Bytes {
        fingerprint: [u8; 32],
        data: Arc<Vec<u8>>,
    },
    Ext(Arc<str>),
}

impl PartialEq for DigestKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DigestKey::Stream(a, sa), DigestKey::Stream(b, sb)) => a == b && sa == sb,
            (DigestKey::Bytes { data: a, .. }, DigestKey::Bytes { data: b, .. }) => a == b,
            (DigestKey::Ext(a), DigestKey::Ext(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DigestKey {}

impl std::hash::Hash for DigestKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            DigestKey::Stream(bytes, seed) => {
                state.write_u8(0);
                state.write(bytes);
                state.write_u64(*seed);
            }
            DigestKey::Bytes { fingerprint, .. } => {
                state.write_u8(1);
                state.write(fingerprint);
            }
            DigestKey::Ext(hex) => {
                state.write_u8(2);
                state.write(hex.as_bytes());
            }
        }
    }
}
