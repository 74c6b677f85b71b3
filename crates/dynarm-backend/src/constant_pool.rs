//! Deduplicating constant pool: a sub-region of the emitted-code
//! allocation holding each distinct 128-bit constant once, keyed by its
//! (low, high) halves.

use std::collections::HashMap;

use thiserror::Error;

const ALIGN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("constant pool exhausted ({capacity} bytes)")]
pub struct PoolFull {
    pub capacity: usize,
}

/// Writes constants into a caller-owned memory window and hands back their
/// absolute addresses. The window lives inside the executable region so
/// emitted loads can reach it; the pool itself never allocates.
pub struct ConstantPool {
    base: *mut u8,
    base_addr: u64,
    capacity: usize,
    cursor: usize,
    entries: HashMap<(u64, u64), u64>,
}

// The raw base pointer refers to the dispatcher-owned code region, whose
// single-writer discipline the pool inherits.
unsafe impl Send for ConstantPool {}

impl ConstantPool {
    /// # Safety
    /// `base` must point to `capacity` writable bytes that outlive the
    /// pool, mapped at address `base_addr` as seen by emitted code.
    pub unsafe fn new(base: *mut u8, base_addr: u64, capacity: usize) -> Self {
        ConstantPool {
            base,
            base_addr,
            capacity,
            cursor: 0,
            entries: HashMap::new(),
        }
    }

    /// The address of a 128-bit constant, emitting it on first use and
    /// reusing the existing slot on every later one.
    pub fn constant(&mut self, lower: u64, upper: u64) -> Result<u64, PoolFull> {
        if let Some(&addr) = self.entries.get(&(lower, upper)) {
            return Ok(addr);
        }
        if self.cursor + ALIGN > self.capacity {
            return Err(PoolFull {
                capacity: self.capacity,
            });
        }
        let addr = self.base_addr + self.cursor as u64;
        unsafe {
            let dst = self.base.add(self.cursor);
            dst.cast::<u64>().write_unaligned(lower);
            dst.add(8).cast::<u64>().write_unaligned(upper);
        }
        self.entries.insert((lower, upper), addr);
        self.cursor += ALIGN;
        Ok(addr)
    }

    pub fn bytes_used(&self) -> usize {
        self.cursor
    }

    /// Forget every constant; used when the emitted-code region is
    /// evacuated wholesale.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_over(buf: &mut Vec<u8>) -> ConstantPool {
        unsafe { ConstantPool::new(buf.as_mut_ptr(), buf.as_ptr() as u64, buf.len()) }
    }

    #[test]
    fn the_same_constant_twice_reuses_one_slot() {
        let mut buf = vec![0u8; 256];
        let mut pool = pool_over(&mut buf);
        let a = pool.constant(0x1122_3344, 0).unwrap();
        let b = pool.constant(0x1122_3344, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.bytes_used(), 16);
    }

    #[test]
    fn distinct_halves_are_distinct_constants() {
        let mut buf = vec![0u8; 256];
        let mut pool = pool_over(&mut buf);
        let a = pool.constant(1, 0).unwrap();
        let b = pool.constant(1, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.bytes_used(), 32);
    }

    #[test]
    fn constants_land_in_the_backing_memory() {
        let mut buf = vec![0u8; 64];
        let mut pool = pool_over(&mut buf);
        pool.constant(0xDEAD_BEEF_0BAD_F00D, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(
            u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            0xDEAD_BEEF_0BAD_F00D
        );
        assert_eq!(
            u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            0x0123_4567_89AB_CDEF
        );
    }

    #[test]
    fn exhaustion_is_reported_not_silent() {
        let mut buf = vec![0u8; 16];
        let mut pool = pool_over(&mut buf);
        pool.constant(1, 0).unwrap();
        assert!(pool.constant(2, 0).is_err());
    }
}
