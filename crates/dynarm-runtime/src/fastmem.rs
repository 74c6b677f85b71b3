//! The process-wide signal-handler registry for signal-based fastmem:
//! one registry for the whole process (lazy-initialized, internally
//! synchronized — never multiplexed per instance), a SIGSEGV/SIGBUS
//! handler running on an alternate stack, and chain-through to the
//! previously installed disposition for faults that are not ours.
//!
//! A fault whose RIP is a registered fastmem access is redirected to that
//! access's fallback sequence, which replays the access through the
//! embedder callback and rejoins the mainline. The faulting block's
//! location is also recorded so a dispatcher configured with
//! `recompile_on_fastmem_failure` can recompile it without the fastmem
//! path.

use std::collections::BTreeMap;
use std::mem::MaybeUninit;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy)]
struct SiteInfo {
    fallback: u64,
    location_hash: u64,
}

struct Registry {
    /// Fault address → redirect info.
    sites: BTreeMap<u64, SiteInfo>,
    /// `(fault address, location hash)` of fastmem paths that have
    /// faulted; the fault address attributes the failure to the owning
    /// instance's code region.
    failed_locations: Vec<(u64, u64)>,
    old_segv: libc::sigaction,
    old_bus: libc::sigaction,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| {
        let (old_segv, old_bus) = unsafe { install_handler() };
        Mutex::new(Registry {
            sites: BTreeMap::new(),
            failed_locations: Vec::new(),
            old_segv,
            old_bus,
        })
    })
}

/// Ensure the process-wide handler is installed; idempotent.
pub fn ensure_installed() {
    let _ = registry();
}

pub fn register_site(fault_addr: u64, fallback_addr: u64, location_hash: u64) {
    registry().lock().unwrap().sites.insert(
        fault_addr,
        SiteInfo {
            fallback: fallback_addr,
            location_hash,
        },
    );
}

/// Drop every registered site inside `[start, end)`; used when blocks are
/// invalidated or the region is evacuated.
pub fn remove_sites_in_range(start: u64, end: u64) {
    let mut reg = registry().lock().unwrap();
    let doomed: Vec<u64> = reg.sites.range(start..end).map(|(&k, _)| k).collect();
    for k in doomed {
        reg.sites.remove(&k);
    }
}

/// Locations that have faulted inside `[start, end)` since the last
/// call; consumed by the owning dispatcher's recompile-on-failure path.
/// Failures belonging to other code regions stay queued for theirs.
pub fn take_failed_locations_in(start: u64, end: u64) -> Vec<u64> {
    let mut reg = registry().lock().unwrap();
    let mut taken = Vec::new();
    reg.failed_locations.retain(|&(fault, loc)| {
        if fault >= start && fault < end {
            taken.push(loc);
            false
        } else {
            true
        }
    });
    taken
}

unsafe fn install_handler() -> (libc::sigaction, libc::sigaction) {
    // The guest stack pointer is unrelated to the host one, but emitted
    // code still runs on the host stack; a dedicated signal stack keeps
    // the handler viable even if a fault hits with little room left.
    const STACK_SIZE: usize = 1 << 21;
    let stack_mem = libc::malloc(STACK_SIZE);
    let stack = libc::stack_t {
        ss_sp: stack_mem,
        ss_flags: 0,
        ss_size: STACK_SIZE,
    };
    libc::sigaltstack(&stack, std::ptr::null_mut());

    let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
    let handler_fn: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) = handler;
    action.sa_sigaction = handler_fn as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESTART;
    libc::sigemptyset(&mut action.sa_mask);
    let mut old_segv: libc::sigaction = MaybeUninit::zeroed().assume_init();
    let mut old_bus: libc::sigaction = MaybeUninit::zeroed().assume_init();
    libc::sigaction(libc::SIGSEGV, &action, &mut old_segv);
    libc::sigaction(libc::SIGBUS, &action, &mut old_bus);
    (old_segv, old_bus)
}

extern "C" fn handler(sig: libc::c_int, info: *mut libc::siginfo_t, raw_context: *mut libc::c_void) {
    unsafe {
        let context = &mut *(raw_context as *mut libc::ucontext_t);
        let rip = &mut context.uc_mcontext.gregs[libc::REG_RIP as usize];
        if let Some(reg) = REGISTRY.get() {
            // The handler takes the same mutex as registration; the
            // embedding contract keeps invalidation off the running
            // thread, so the lock is never held by the code that faulted.
            let mut reg = reg.lock().unwrap();
            let fault = *rip as u64;
            if let Some(site) = reg.sites.get(&fault).copied() {
                reg.failed_locations.push((fault, site.location_hash));
                *rip = site.fallback as i64;
                return;
            }
            // Not ours: restore the original disposition and let the
            // fault re-deliver.
            let old = if sig == libc::SIGSEGV {
                &reg.old_segv
            } else {
                &reg.old_bus
            };
            if old.sa_flags & libc::SA_SIGINFO != 0 {
                let chained: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                    std::mem::transmute(old.sa_sigaction);
                drop(reg);
                chained(sig, info, raw_context);
                return;
            }
            match old.sa_sigaction {
                libc::SIG_DFL => {
                    libc::signal(sig, libc::SIG_DFL);
                }
                libc::SIG_IGN => {}
                other => {
                    let chained: extern "C" fn(libc::c_int) = std::mem::transmute(other);
                    drop(reg);
                    chained(sig);
                }
            }
        }
    }
}
