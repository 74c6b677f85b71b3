//! The process-global exclusive monitor: one
//! claim slot per processor, each holding a claimed (granule-aligned)
//! address and a snapshot of the value observed by the exclusive read.
//! The commit itself is delegated to the embedder's
//! `memory_write_exclusive_*` callback, which compares the snapshot
//! against current memory and commits with a host compare-and-swap; the
//! monitor arbitrates only who is allowed to attempt it.

use std::sync::Mutex;

/// Exclusive reservations cover an aligned 16-byte granule, matching the
/// architectural minimum.
pub const RESERVATION_GRANULE_MASK: u64 = !0xF;

#[derive(Debug, Clone, Copy)]
struct Claim {
    address: u64,
    snapshot: u64,
}

pub struct ExclusiveMonitor {
    slots: Vec<Mutex<Option<Claim>>>,
}

impl ExclusiveMonitor {
    pub fn new(processor_count: usize) -> ExclusiveMonitor {
        ExclusiveMonitor {
            slots: (0..processor_count).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.slots.len()
    }

    /// An exclusive load: reads the current value through `read` and
    /// records the claim. A claim by one processor never blocks another
    /// processor's reads.
    pub fn read_and_claim(&self, processor_id: usize, vaddr: u64, read: impl FnOnce() -> u64) -> u64 {
        let value = read();
        *self.slots[processor_id].lock().unwrap() = Some(Claim {
            address: vaddr & RESERVATION_GRANULE_MASK,
            snapshot: value,
        });
        value
    }

    /// An exclusive store: succeeds only when this processor holds a claim
    /// for the granule and the embedder's compare-and-swap against the
    /// snapshot commits. Returns the ARM status value: 0 on success, 1 on
    /// failure. The claim is consumed either way.
    pub fn do_exclusive_write(
        &self,
        processor_id: usize,
        vaddr: u64,
        write: impl FnOnce(u64) -> bool,
    ) -> u32 {
        let mut slot = self.slots[processor_id].lock().unwrap();
        let Some(claim) = slot.take() else {
            return 1;
        };
        if claim.address != vaddr & RESERVATION_GRANULE_MASK {
            return 1;
        }
        if write(claim.snapshot) {
            0
        } else {
            1
        }
    }

    pub fn clear_exclusive(&self, processor_id: usize) {
        *self.slots[processor_id].lock().unwrap() = None;
    }

    /// Drop every processor's claim, as on cache invalidation or reset.
    pub fn clear_all(&self) {
        for slot in &self.slots {
            *slot.lock().unwrap() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn cas(mem: &AtomicU64) -> impl Fn(u64, u64) -> bool + '_ {
        move |expected, new| {
            mem.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }
    }

    #[test]
    fn uninterrupted_read_write_pair_succeeds() {
        let mem = AtomicU64::new(5);
        let monitor = ExclusiveMonitor::new(2);
        let observed = monitor.read_and_claim(0, 0x1000, || mem.load(Ordering::SeqCst));
        assert_eq!(observed, 5);
        let status = monitor.do_exclusive_write(0, 0x1000, |snapshot| cas(&mem)(snapshot, 9));
        assert_eq!(status, 0);
        assert_eq!(mem.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn an_intervening_write_fails_the_commit() {
        let mem = AtomicU64::new(5);
        let monitor = ExclusiveMonitor::new(2);
        monitor.read_and_claim(0, 0x1000, || mem.load(Ordering::SeqCst));
        // Another processor writes the location between the pair.
        mem.store(6, Ordering::SeqCst);
        let status = monitor.do_exclusive_write(0, 0x1000, |snapshot| cas(&mem)(snapshot, 9));
        assert_eq!(status, 1);
        assert_eq!(mem.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn at_most_one_of_two_processors_commits() {
        let mem = AtomicU64::new(0);
        let monitor = ExclusiveMonitor::new(2);
        monitor.read_and_claim(0, 0x2000, || mem.load(Ordering::SeqCst));
        monitor.read_and_claim(1, 0x2000, || mem.load(Ordering::SeqCst));
        let first = monitor.do_exclusive_write(0, 0x2000, |snapshot| cas(&mem)(snapshot, 1));
        let second = monitor.do_exclusive_write(1, 0x2000, |snapshot| cas(&mem)(snapshot, 2));
        assert_eq!((first, second), (0, 1));
        assert_eq!(mem.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_store_without_a_claim_fails() {
        let monitor = ExclusiveMonitor::new(1);
        assert_eq!(monitor.do_exclusive_write(0, 0x3000, |_| true), 1);
    }

    #[test]
    fn clear_exclusive_invalidates_the_local_claim() {
        let monitor = ExclusiveMonitor::new(1);
        monitor.read_and_claim(0, 0x4000, || 7);
        monitor.clear_exclusive(0);
        assert_eq!(monitor.do_exclusive_write(0, 0x4000, |_| true), 1);
    }

    #[test]
    fn a_claim_to_a_different_granule_does_not_authorize_the_store() {
        let monitor = ExclusiveMonitor::new(1);
        monitor.read_and_claim(0, 0x5000, || 7);
        assert_eq!(monitor.do_exclusive_write(0, 0x6000, |_| true), 1);
    }
}
