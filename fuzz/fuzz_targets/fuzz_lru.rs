#![no_main]

use libfuzzer_sys::fuzz_target;
use opal_cache::LruCache;

// Drives the byte-bounded LRU with an arbitrary op stream and checks
// that bookkeeping stays consistent after every step.
fuzz_target!(|data: &[u8]| {
    let mut chunks = data.chunks_exact(3);
    let capacity = chunks
        .next()
        .map(|c| usize::from(c[0]) + 1)
        .unwrap_or(1);
    let mut cache: LruCache<u8, u8> = LruCache::new(capacity);

    for op in chunks {
        let key = op[1];
        match op[0] % 4 {
            0 | 1 => {
                let bytes = usize::from(op[2]);
                let evicted = cache.add(key, op[2], bytes);
                for k in &evicted {
                    assert!(cache.peek(k).is_none());
                }
            }
            2 => {
                let hit = cache.get(&key).is_some();
                if hit {
                    assert_eq!(cache.get_all_keys().first(), Some(&key));
                }
            }
            _ => {
                cache.has(&key);
            }
        }

        let keys = cache.get_all_keys();
        assert_eq!(keys.len(), cache.count());
        // Over capacity is only legal while a single oversized entry remains.
        assert!(cache.size_bytes() <= capacity || cache.count() == 1);
    }
});
