#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use opal_cache::{CompiledKernel, CompilerDriver, DriverError, KernelSource, KernelsCache};

#[derive(Debug)]
struct NullDriver;

impl CompilerDriver for NullDriver {
    fn build(
        &self,
        _options: &str,
        _sources: &[Arc<KernelSource>],
    ) -> Result<Vec<CompiledKernel>, DriverError> {
        Ok(Vec::new())
    }
}

fuzz_target!(|data: &[u8]| {
    // Loading an arbitrary kernel store must fail cleanly, never panic.
    let mut cache = KernelsCache::new(Arc::new(NullDriver));
    let _ = cache.load(&mut &data[..]);
});
