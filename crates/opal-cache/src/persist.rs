//! Binary persistence for compiled kernels.
//!
//! Stream layout, all integers little-endian:
//! magic `OPKC`, format version u32, entry count u32, then per entry:
//! id (u32 length + bytes), entry point (u32 length + bytes), 32-byte
//! content hash, binary blob (u64 length + bytes).

use std::io::{Read, Write};
use std::sync::Arc;

use crate::cache::KernelsCache;
use crate::error::CacheError;
use crate::kernel::{CompiledKernel, KernelId};

const MAGIC: [u8; 4] = *b"OPKC";
const VERSION: u32 = 1;

/// Sanity bound on string and blob lengths while loading.
const MAX_FIELD_LEN: u64 = 1 << 26;

fn write_str(w: &mut impl Write, s: &str) -> Result<(), CacheError> {
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_u32(r: &mut impl Read) -> Result<u32, CacheError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, CacheError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> Result<String, CacheError> {
    let len = read_u32(r)? as u64;
    if len > MAX_FIELD_LEN {
        return Err(CacheError::CorruptStore(format!("string length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| CacheError::CorruptStore(e.to_string()))
}

impl KernelsCache {
    /// Writes every compiled kernel to the stream, sorted by id so the
    /// output is stable for a given cache state.
    pub fn save(&self, w: &mut impl Write) -> Result<(), CacheError> {
        let entries = self.compiled_entries();
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(entries.len() as u32).to_le_bytes())?;
        for (id, kernel, hash) in entries {
            write_str(w, id.as_str())?;
            write_str(w, &kernel.entry_point)?;
            w.write_all(&hash)?;
            w.write_all(&(kernel.binary.len() as u64).to_le_bytes())?;
            w.write_all(&kernel.binary)?;
        }
        Ok(())
    }

    /// Restores compiled kernels from a stream produced by
    /// [`save`](Self::save), replacing the current kernel map.
    pub fn load(&mut self, r: &mut impl Read) -> Result<(), CacheError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CacheError::CorruptStore("bad magic".into()));
        }
        let version = read_u32(r)?;
        if version != VERSION {
            return Err(CacheError::CorruptStore(format!(
                "unsupported version {version}"
            )));
        }
        self.reset();
        let count = read_u32(r)?;
        for _ in 0..count {
            let id = KernelId(read_str(r)?);
            let entry_point = read_str(r)?;
            let mut hash = [0u8; 32];
            r.read_exact(&mut hash)?;
            let len = read_u64(r)?;
            if len > MAX_FIELD_LEN {
                return Err(CacheError::CorruptStore(format!("blob length {len}")));
            }
            let mut binary = vec![0u8; len as usize];
            r.read_exact(&mut binary)?;
            self.restore_entry(
                id,
                CompiledKernel {
                    entry_point,
                    binary: Arc::new(binary),
                },
                hash,
            );
        }
        // Saved ids were minted with indices below the entry count, so
        // starting above it keeps new ids collision-free.
        self.bump_kernel_idx(u64::from(count));
        log::info!("loaded {count} compiled kernel(s) from store");
        Ok(())
    }
}
