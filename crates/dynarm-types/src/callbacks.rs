/// The subset of the embedding callback table the optimizer needs for
/// constant-memory-read folding: whether an address is
/// backed by read-only memory, and the value found there. Defined here
/// rather than in `dynarm-runtime` so `dynarm-opt` can depend on the
/// vocabulary without depending on the whole runtime crate.
pub trait MemoryProbe {
    fn is_read_only_memory(&self, vaddr: u64) -> bool;
    fn memory_read_8(&self, vaddr: u64) -> u8;
    fn memory_read_16(&self, vaddr: u64) -> u16;
    fn memory_read_32(&self, vaddr: u64) -> u32;
    fn memory_read_64(&self, vaddr: u64) -> u64;
}
