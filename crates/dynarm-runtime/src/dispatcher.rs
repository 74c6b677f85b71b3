//! The dispatcher: owns the code region, the stubs, the block
//! cache and its patch bookkeeping, the fast-dispatch table, and the run
//! loop. Translation and emission are supplied by the embedding through
//! [`CompileEnv`], keeping this crate free of per-architecture decode
//! knowledge.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use dynarm_backend::{
    abi::{FastDispatchEntry, GuestState, EMPTY_LOCATION, FAST_DISPATCH_MASK,
        FAST_DISPATCH_TABLE_SIZE},
    emit_stubs, ConstantPool, EmitError, EmittedBlock, RuntimeCallbacks, StubAddrs,
};
use dynarm_ir::Location;
use thiserror::Error;

use crate::{
    cache::{fallback_addr, write_patch, BlockCache, BlockDescriptor, PatchSiteAbs},
    fastmem,
    region::{CodeRegion, SAFETY_MARGIN},
    HaltReason,
};

/// Room kept for the deduplicating constant pool, below the evacuation
/// floor so it survives cache clears structurally (its contents are reset
/// with the cache).
const POOL_CAPACITY: usize = 64 << 10;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to map the emitted-code region: {0}")]
    Region(#[from] std::io::Error),
    #[error("the emitted-code region is too small for the runtime stubs")]
    RegionTooSmall,
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// A freshly compiled block handed back by the environment: the emitted
/// artifact plus the guest byte range it was translated from.
pub struct CompiledBlock {
    pub emitted: EmittedBlock,
    pub pc_range: (u64, u64),
}

/// What the dispatcher needs from the embedding on a cache miss and
/// around the run loop.
pub trait CompileEnv {
    type Loc: Location;

    fn location_from_state(&self, state: &GuestState, single_step: bool) -> Self::Loc;

    /// Translate → optimize → emit one block at `base_rip`. When
    /// `fastmem_disabled` is set the block must avoid the signal-handler
    /// fast path (used after a fastmem failure forced a recompile).
    fn compile(
        &mut self,
        loc: Self::Loc,
        base_rip: u64,
        pool: &mut ConstantPool,
        stubs: &StubAddrs,
        fastmem_disabled: bool,
    ) -> Result<CompiledBlock, EmitError>;

    fn get_ticks_remaining(&mut self) -> u64;
    fn add_ticks(&mut self, ticks: u64);
}

type EnterFn = unsafe extern "C" fn(*mut GuestState, *const u8);

pub struct Dispatcher {
    region: CodeRegion,
    pool: ConstantPool,
    stubs: StubAddrs,
    cache: BlockCache,
    fast_dispatch: Box<[FastDispatchEntry]>,
    state: Box<GuestState>,
    enter: EnterFn,
    signal_fastmem: bool,
    recompile_on_fastmem_failure: bool,
    /// Locations compiled without fastmem after a fault.
    fastmem_disabled_locs: HashSet<u64>,
}

impl Dispatcher {
    pub fn new(
        region_size: usize,
        callbacks: &RuntimeCallbacks,
        signal_fastmem: bool,
        recompile_on_fastmem_failure: bool,
    ) -> Result<Dispatcher, RuntimeError> {
        let mut region = CodeRegion::new(region_size)?;
        let blob = emit_stubs(region.base_addr(), callbacks)?;
        region
            .append(&blob.bytes)
            .ok_or(RuntimeError::RegionTooSmall)?;
        let stubs = blob.addrs(region.base_addr());
        let pool_base = region
            .reserve(POOL_CAPACITY)
            .ok_or(RuntimeError::RegionTooSmall)?;
        region.set_floor();
        let pool = unsafe {
            ConstantPool::new(
                (region.base_addr() as *mut u8).add((pool_base - region.base_addr()) as usize),
                pool_base,
                POOL_CAPACITY,
            )
        };
        let fast_dispatch =
            vec![FastDispatchEntry::empty(); FAST_DISPATCH_TABLE_SIZE].into_boxed_slice();
        let mut state = GuestState::new();
        state.fast_dispatch_base = fast_dispatch.as_ptr() as u64;
        let enter: EnterFn = unsafe { std::mem::transmute(stubs.enter as usize) };
        if signal_fastmem {
            fastmem::ensure_installed();
        }
        Ok(Dispatcher {
            region,
            pool,
            stubs,
            cache: BlockCache::new(),
            fast_dispatch,
            state,
            enter,
            signal_fastmem,
            recompile_on_fastmem_failure,
            fastmem_disabled_locs: HashSet::new(),
        })
    }

    pub fn state(&self) -> &GuestState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GuestState {
        &mut self.state
    }

    pub fn stubs(&self) -> &StubAddrs {
        &self.stubs
    }

    /// Lock-free halt request, readable from any thread.
    pub fn halt(&self, reason: HaltReason) {
        self.state
            .halt_reason
            .fetch_or(reason.bits(), Ordering::SeqCst);
    }

    /// The run loop: refresh the tick budget, enter guest code,
    /// report consumed ticks, and stop once a halt reason is posted.
    pub fn run<E: CompileEnv>(&mut self, env: &mut E) -> Result<HaltReason, RuntimeError> {
        loop {
            let ticks = env.get_ticks_remaining();
            self.state.cycles_to_run = ticks as i64;
            self.state.cycles_remaining = ticks as i64;
            let loc = env.location_from_state(&self.state, false);
            let entry = self.get_or_compile(env, loc)?;
            unsafe {
                (self.enter)(&mut *self.state, entry as *const u8);
            }
            let consumed = self.state.cycles_to_run - self.state.cycles_remaining;
            if consumed > 0 {
                env.add_ticks(consumed as u64);
            }
            let halt = self.state.halt_reason.swap(0, Ordering::SeqCst);
            if halt != 0 {
                return Ok(HaltReason::from_bits_truncate(halt));
            }
        }
    }

    /// Single-step: the halt flag is set before entry so
    /// the first returning terminator stops execution; blocks compiled
    /// for a single-step location return to the dispatcher at every exit.
    pub fn step<E: CompileEnv>(&mut self, env: &mut E) -> Result<HaltReason, RuntimeError> {
        self.halt(HaltReason::STEP);
        self.state.cycles_to_run = 1;
        self.state.cycles_remaining = 1;
        let loc = env.location_from_state(&self.state, true);
        let entry = self.get_or_compile(env, loc)?;
        unsafe {
            (self.enter)(&mut *self.state, entry as *const u8);
        }
        let consumed = self.state.cycles_to_run - self.state.cycles_remaining;
        if consumed > 0 {
            env.add_ticks(consumed as u64);
        }
        let halt = self.state.halt_reason.swap(0, Ordering::SeqCst);
        Ok(HaltReason::from_bits_truncate(halt))
    }

    fn get_or_compile<E: CompileEnv>(
        &mut self,
        env: &mut E,
        loc: E::Loc,
    ) -> Result<u64, RuntimeError> {
        if self.signal_fastmem && self.recompile_on_fastmem_failure {
            let failed = fastmem::take_failed_locations_in(
                self.region.base_addr(),
                self.region.end_addr(),
            );
            for loc_hash in failed {
                self.fastmem_disabled_locs.insert(loc_hash);
                self.invalidate_block(loc_hash);
            }
        }
        let hash = loc.unique_hash();
        if let Some(desc) = self.cache.get(hash) {
            return Ok(desc.entrypoint);
        }
        if self.region.remaining() < SAFETY_MARGIN {
            // Silent full evacuation; never user-visible.
            self.clear_cache();
        }
        let base_rip = self.region.next_addr();
        let fastmem_disabled = self.fastmem_disabled_locs.contains(&hash);
        let compiled = env.compile(loc, base_rip, &mut self.pool, &self.stubs, fastmem_disabled)?;
        Ok(self.insert_block(hash, loc.is_single_step(), base_rip, compiled))
    }

    fn insert_block(
        &mut self,
        hash: u64,
        single_step: bool,
        base_rip: u64,
        compiled: CompiledBlock,
    ) -> u64 {
        let entry = self
            .region
            .append(&compiled.emitted.bytes)
            .expect("the safety margin guarantees room for one block");
        debug_assert_eq!(entry, base_rip);
        // Outgoing patch sites: bind to the target if it is already
        // compiled, otherwise to the trampoline form.
        for site in &compiled.emitted.patch_sites {
            let addr = base_rip + site.offset as u64;
            let abs = PatchSiteAbs {
                addr,
                kind: site.kind,
                fallback: fallback_addr(addr, site.kind, site.fallback, self.stubs.exit),
                owner: hash,
            };
            let target = self.cache.get(site.target_hash).map(|d| d.entrypoint);
            write_patch(&self.region, &abs, target);
            self.cache.add_patch_site(site.target_hash, abs);
        }
        self.cache.insert(
            hash,
            BlockDescriptor {
                entrypoint: entry,
                byte_len: compiled.emitted.bytes.len() as u32,
            },
            compiled.pc_range,
        );
        // Incoming sites recorded before this block existed now resolve.
        for site in self.cache.sites_for(hash).to_vec() {
            write_patch(&self.region, &site, Some(entry));
        }
        if !single_step {
            let slot = (hash & FAST_DISPATCH_MASK) as usize;
            self.fast_dispatch[slot] = FastDispatchEntry {
                location: hash,
                code_ptr: entry,
            };
        }
        for site in &compiled.emitted.fastmem_sites {
            fastmem::register_site(
                base_rip + site.fault_offset as u64,
                base_rip + site.fallback_offset as u64,
                hash,
            );
        }
        entry
    }

    /// Remove one block: un-patch every incoming link, drop its cache
    /// records, and forget its fault sites.
    fn invalidate_block(&mut self, hash: u64) {
        let Some(desc) = self.cache.remove(hash) else {
            return;
        };
        for site in self.cache.sites_for(hash).to_vec() {
            write_patch(&self.region, &site, None);
        }
        let slot = (hash & FAST_DISPATCH_MASK) as usize;
        if self.fast_dispatch[slot].location == hash {
            self.fast_dispatch[slot] = FastDispatchEntry::empty();
        }
        if self.signal_fastmem {
            fastmem::remove_sites_in_range(
                desc.entrypoint,
                desc.entrypoint + desc.byte_len as u64,
            );
        }
    }

    /// Range-based invalidation: find the blocks
    /// whose guest bytes intersect the range, un-patch their incoming
    /// links, and reset the hint structures.
    pub fn invalidate_range(&mut self, start: u64, length: u64) {
        for hash in self.cache.blocks_overlapping(start, start.wrapping_add(length)) {
            self.invalidate_block(hash);
        }
        self.reset_hints();
    }

    /// Full evacuation: everything above the region floor is discarded.
    pub fn clear_cache(&mut self) {
        if self.signal_fastmem {
            fastmem::remove_sites_in_range(self.region.base_addr(), self.region.end_addr());
        }
        self.cache.clear();
        self.pool.reset();
        self.region.reset_to_floor();
        self.reset_hints();
    }

    fn reset_hints(&mut self) {
        self.state.reset_rsb();
        for entry in self.fast_dispatch.iter_mut() {
            *entry = FastDispatchEntry::empty();
        }
        debug_assert_eq!(EMPTY_LOCATION, u64::MAX);
    }

    pub fn cached_block_count(&self) -> usize {
        self.cache.len()
    }

    pub fn region_range(&self) -> (u64, u64) {
        (self.region.base_addr(), self.region.end_addr())
    }

    /// The emitted bytes of a compiled block, for the debug disassembly
    /// surface.
    pub fn block_bytes(&self, loc_hash: u64) -> Option<&[u8]> {
        let desc = self.cache.get(loc_hash)?;
        let offset = (desc.entrypoint - self.region.base_addr()) as usize;
        let base = self.region.base_addr() as *const u8;
        Some(unsafe { std::slice::from_raw_parts(base.add(offset), desc.byte_len as usize) })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // The process-wide fault registry must not outlive this region's
        // mapping; a recycled address range would otherwise be redirected
        // into freed memory.
        if self.signal_fastmem {
            fastmem::remove_sites_in_range(self.region.base_addr(), self.region.end_addr());
        }
    }
}
