//! Kernel source, identity, and batch grouping.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// One kernel's source text plus everything that affects its binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSource {
    pub code: String,
    pub build_options: String,
    pub entry_point: String,
}

impl KernelSource {
    /// Content hash over code, options, and entry point. Two sources
    /// with equal hash are treated as the same kernel.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(self.code.as_bytes());
        h.update([0]);
        h.update(self.build_options.as_bytes());
        h.update([0]);
        h.update(self.entry_point.as_bytes());
        h.finalize().into()
    }
}

/// Cache-assigned kernel identity: entry point plus a monotonic index.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct KernelId(pub String);

impl KernelId {
    pub fn new(entry_point: &str, idx: u64) -> Self {
        Self(format!("{entry_point}_{idx}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pending submission awaiting compilation.
#[derive(Clone, Debug)]
pub struct KernelCode {
    pub source: Arc<KernelSource>,
    pub id: KernelId,
    pub dump_custom: bool,
    pub hash: [u8; 32],
}

impl KernelCode {
    pub fn new(source: Arc<KernelSource>, id: KernelId, dump_custom: bool) -> Self {
        let hash = source.content_hash();
        Self { source, id, dump_custom, hash }
    }
}

/// A group of kernels compiled in one driver invocation.
///
/// Buckets separate incompatible build options; within a bucket batches
/// are bounded by the cache's kernels-per-batch limit.
#[derive(Clone, Debug)]
pub struct BatchProgram {
    pub bucket_id: u32,
    pub batch_id: u32,
    pub hash: [u8; 32],
    pub sources: Vec<Arc<KernelSource>>,
    pub options: String,
    pub entry_point_to_id: BTreeMap<String, KernelId>,
    pub dump_custom: bool,
}

impl BatchProgram {
    pub fn new(bucket_id: u32, batch_id: u32, options: String) -> Self {
        Self {
            bucket_id,
            batch_id,
            hash: [0; 32],
            sources: Vec::new(),
            options,
            entry_point_to_id: BTreeMap::new(),
            dump_custom: false,
        }
    }

    /// Adds one kernel and folds its hash into the batch hash.
    ///
    /// # Panics
    ///
    /// Panics if the batch already holds a kernel with the same entry
    /// point; compiled binaries are mapped back to ids by entry point.
    pub fn push(&mut self, code: &KernelCode) {
        self.sources.push(code.source.clone());
        let prev = self
            .entry_point_to_id
            .insert(code.source.entry_point.clone(), code.id.clone());
        assert!(
            prev.is_none(),
            "duplicate entry point `{}` in one batch",
            code.source.entry_point
        );
        self.dump_custom |= code.dump_custom;
        let mut h = Sha256::new();
        h.update(self.hash);
        h.update(code.hash);
        self.hash = h.finalize().into();
    }

    pub fn kernel_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_entry_point(&self, entry_point: &str) -> bool {
        self.entry_point_to_id.contains_key(entry_point)
    }
}

/// An opaque compiled kernel handle served by the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledKernel {
    pub entry_point: String,
    pub binary: Arc<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(code: &str, opts: &str, entry: &str) -> Arc<KernelSource> {
        Arc::new(KernelSource {
            code: code.into(),
            build_options: opts.into(),
            entry_point: entry.into(),
        })
    }

    #[test]
    fn hash_covers_all_fields() {
        let a = src("k", "-O2", "main").content_hash();
        assert_eq!(a, src("k", "-O2", "main").content_hash());
        assert_ne!(a, src("k2", "-O2", "main").content_hash());
        assert_ne!(a, src("k", "-O3", "main").content_hash());
        assert_ne!(a, src("k", "-O2", "other").content_hash());
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        // "ab" + "c" must not hash like "a" + "bc".
        let a = src("ab", "c", "e").content_hash();
        let b = src("a", "bc", "e").content_hash();
        assert_ne!(a, b);
    }

    #[test]
    fn batch_hash_tracks_members() {
        let c1 = KernelCode::new(src("x", "", "e1"), KernelId::new("e1", 0), false);
        let c2 = KernelCode::new(src("y", "", "e2"), KernelId::new("e2", 1), true);
        let mut b1 = BatchProgram::new(0, 0, String::new());
        b1.push(&c1);
        let one = b1.hash;
        b1.push(&c2);
        assert_ne!(b1.hash, one);
        assert!(b1.dump_custom);
        assert_eq!(b1.kernel_count(), 2);
        assert_eq!(b1.entry_point_to_id["e2"], KernelId::new("e2", 1));
    }
}
