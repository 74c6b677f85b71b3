//! Emission-level tests that inspect the produced artifacts (bytes, patch
//! sites, fastmem sites) without executing anything.

use dynarm_backend::{
    abi::RuntimeCallbacks, emit_a32, ConstantPool, EmitArgs, EmitConfig, FastmemMode,
    PageTableConfig, PatchFallback, PatchKind, StubAddrs,
};
use dynarm_ir::{IrEmitter, Opcode, Terminator, Value};
use dynarm_opt::UnsafeOptimization;
use dynarm_types::{A32LocationDescriptor, A32Reg, Cond, Fpcr};

fn dummy_callbacks() -> RuntimeCallbacks {
    RuntimeCallbacks {
        ctx: 0x1000,
        memory_read: [0x2000, 0x2010, 0x2020, 0x2030],
        memory_write: [0x2040, 0x2050, 0x2060, 0x2070],
        exclusive_read: [0x2080, 0x2090, 0x20A0, 0x20B0],
        exclusive_write: [0x20C0, 0x20D0, 0x20E0, 0x20F0],
        clear_exclusive: 0x2100,
        zero_memory_block: 0x2110,
        call_svc: 0x2120,
        exception_raised: 0x2130,
        data_cache_operation: 0x2140,
        instruction_cache_operation: 0x2150,
        get_cntpct: 0x2160,
        coproc_get_one_word: 0x2170,
        coproc_set_one_word: 0x2180,
        interpreter_fallback: 0x2190,
    }
}

fn dummy_stubs() -> StubAddrs {
    StubAddrs {
        enter: 0x8000,
        exit: 0x8040,
        read: [0x8100, 0x8140, 0x8180, 0x81C0],
        write: [0x8200, 0x8240, 0x8280, 0x82C0],
    }
}

fn config(fastmem: FastmemMode) -> EmitConfig {
    EmitConfig {
        enable_cycle_counting: true,
        unsafe_optimizations: UnsafeOptimization::default(),
        fastmem,
        fpcr: Fpcr(0),
    }
}

fn emit(
    block: &dynarm_ir::Block<A32LocationDescriptor>,
    pool_buf: &mut [u8],
    fastmem: FastmemMode,
) -> dynarm_backend::EmittedBlock {
    let mut pool =
        unsafe { ConstantPool::new(pool_buf.as_mut_ptr(), pool_buf.as_ptr() as u64, pool_buf.len()) };
    emit_a32(
        block,
        EmitArgs {
            base_rip: 0x10_0000,
            stubs: dummy_stubs(),
            callbacks: &dummy_callbacks(),
            pool: &mut pool,
            config: config(fastmem),
        },
    )
    .expect("emission succeeds")
}

fn loc(pc: u32) -> A32LocationDescriptor {
    A32LocationDescriptor::new(pc, false, false, 0, 0)
}

#[test]
fn a_linked_block_carries_one_conditional_patch_site() {
    let mut em = IrEmitter::new(loc(0x100));
    em.emit_void(
        Opcode::A32SetRegister,
        vec![Value::ImmA32Reg(A32Reg::R0), Value::ImmU32(7)],
    );
    em.advance_cycles(1);
    em.set_terminator(Terminator::LinkBlock(loc(0x104)));
    let block = em.finish();

    let mut buf = vec![0u8; 4096];
    let emitted = emit(&block, &mut buf, FastmemMode::None);
    assert!(!emitted.bytes.is_empty());
    assert_eq!(emitted.patch_sites.len(), 1);
    let site = &emitted.patch_sites[0];
    assert_eq!(site.kind, PatchKind::Jg);
    assert_eq!(site.target_hash, loc(0x104).unique_hash());
    assert_eq!(site.fallback, PatchFallback::NextInstruction);
    // The placeholder bytes are inside the emitted buffer.
    assert!(site.offset + site.kind.len() <= emitted.bytes.len());
}

#[test]
fn emission_is_deterministic_for_the_same_base_address() {
    let build = || {
        let mut em = IrEmitter::new(loc(0x200));
        let a = em.emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(A32Reg::R1)]);
        let sum = em.add32(a, Value::ImmU32(3));
        em.emit_void(
            Opcode::A32SetRegister,
            vec![Value::ImmA32Reg(A32Reg::R2), sum],
        );
        em.advance_cycles(1);
        em.set_terminator(Terminator::LinkBlock(loc(0x204)));
        em.finish()
    };
    let mut buf1 = vec![0u8; 4096];
    let mut buf2 = vec![0u8; 4096];
    let first = emit(&build(), &mut buf1, FastmemMode::None);
    let second = emit(&build(), &mut buf2, FastmemMode::None);
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn a_conditional_block_emits_both_exit_paths() {
    let mut em = IrEmitter::new(loc(0x300));
    assert!(em.set_block_condition(Cond::Eq, loc(0x304)));
    em.emit_void(
        Opcode::A32SetRegister,
        vec![Value::ImmA32Reg(A32Reg::R0), Value::ImmU32(1)],
    );
    em.advance_cycles(1);
    em.extend_condition_failed(loc(0x304), 1);
    em.set_terminator(Terminator::LinkBlock(loc(0x304)));
    let block = em.finish();

    let mut buf = vec![0u8; 4096];
    let emitted = emit(&block, &mut buf, FastmemMode::None);
    // One patch site for the taken path, one for the condition-failed
    // path.
    assert_eq!(emitted.patch_sites.len(), 2);
}

#[test]
fn page_table_loads_defer_a_callback_fallback() {
    let mut em = IrEmitter::new(loc(0x400));
    let addr = em.emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(A32Reg::R1)]);
    let data = em.read_memory32(addr);
    em.emit_void(
        Opcode::A32SetRegister,
        vec![Value::ImmA32Reg(A32Reg::R0), data],
    );
    em.advance_cycles(1);
    em.set_terminator(Terminator::LinkBlock(loc(0x404)));
    let block = em.finish();

    let mut buf = vec![0u8; 4096];
    let pt = FastmemMode::PageTable(PageTableConfig {
        address_space_bits: 32,
        absolute_offset: false,
        silently_mirror: false,
        detect_misaligned_mask: 0,
        only_detect_on_page_boundary: false,
    });
    let emitted = emit(&block, &mut buf, pt);
    // No signal-handler registration in page-table mode.
    assert!(emitted.fastmem_sites.is_empty());
    assert!(!emitted.bytes.is_empty());
}

#[test]
fn signal_fastmem_records_the_faultable_access() {
    let mut em = IrEmitter::new(loc(0x500));
    let addr = em.emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(A32Reg::R1)]);
    let data = em.read_memory32(addr);
    em.emit_void(
        Opcode::A32SetRegister,
        vec![Value::ImmA32Reg(A32Reg::R0), data],
    );
    em.advance_cycles(1);
    em.set_terminator(Terminator::LinkBlock(loc(0x504)));
    let block = em.finish();

    let mut buf = vec![0u8; 4096];
    let emitted = emit(&block, &mut buf, FastmemMode::SignalHandler);
    assert_eq!(emitted.fastmem_sites.len(), 1);
    let site = &emitted.fastmem_sites[0];
    assert!(site.fault_offset < site.fallback_offset);
    assert!(site.fallback_offset < emitted.bytes.len());
}

#[test]
fn rsb_pushes_record_a_mov_rcx_patch_site() {
    let mut em = IrEmitter::new(loc(0x600));
    em.push_rsb(loc(0x604).unique_hash());
    em.advance_cycles(1);
    em.set_terminator(Terminator::LinkBlock(loc(0x608)));
    let block = em.finish();

    let mut buf = vec![0u8; 4096];
    let emitted = emit(&block, &mut buf, FastmemMode::None);
    assert!(emitted
        .patch_sites
        .iter()
        .any(|s| s.kind == PatchKind::MovRcx && s.fallback == PatchFallback::ExitStub));
}
