//! The A64 CPU instance. Mirrors the A32 surface with the wider register
//! file, the ID-register constants folded at translation time, and the
//! hookable data/instruction cache-maintenance traffic.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dynarm_backend::{
    abi::GuestState, emit_a64, ConstantPool, EmitArgs, EmitConfig, EmitError, FastmemMode,
    PageTableConfig, RuntimeCallbacks, StubAddrs,
};
use dynarm_frontend::{
    a64::{translate_a64, A64TranslateOptions},
    translate::{MemoryReadCode, TranslateOptions},
};
use dynarm_opt::{OptConfig, Optimization, UnsafeOptimization};
use dynarm_runtime::{CompileEnv, CompiledBlock, Dispatcher, ExclusiveMonitor, HaltReason};
use dynarm_types::{A64LocationDescriptor, ExceptionKind, Fpcr, MemoryProbe};

use crate::{
    callbacks::A64Callbacks,
    config::{A64Config, ConfigError},
    disasm, mxcsr_for_fpcr, HaltHandle,
};

struct Holder {
    callbacks: Box<dyn A64Callbacks>,
    monitor: Arc<ExclusiveMonitor>,
    processor_id: usize,
}

pub struct A64Cpu {
    // Field order is drop order: emitted code goes before the callbacks
    // it points into.
    dispatcher: Dispatcher,
    env: Env,
    monitor: Arc<ExclusiveMonitor>,
    is_executing: AtomicBool,
    _holder: Box<Holder>,
}

struct Env {
    holder: *mut Holder,
    runtime_callbacks: RuntimeCallbacks,
    translate_options: A64TranslateOptions,
    opt_config: OptConfig,
    fastmem_mode: FastmemMode,
    enable_cycle_counting: bool,
    unsafe_optimizations: UnsafeOptimization,
}

struct CallbackAdapter<'a>(RefCell<&'a mut Box<dyn A64Callbacks>>);

impl MemoryReadCode for CallbackAdapter<'_> {
    fn memory_read_code(&self, vaddr: u64) -> u32 {
        self.0.borrow_mut().memory_read_code(vaddr)
    }
}

impl MemoryProbe for CallbackAdapter<'_> {
    fn is_read_only_memory(&self, vaddr: u64) -> bool {
        self.0.borrow_mut().is_read_only_memory(vaddr)
    }
    fn memory_read_8(&self, vaddr: u64) -> u8 {
        self.0.borrow_mut().memory_read_8(vaddr)
    }
    fn memory_read_16(&self, vaddr: u64) -> u16 {
        self.0.borrow_mut().memory_read_16(vaddr)
    }
    fn memory_read_32(&self, vaddr: u64) -> u32 {
        self.0.borrow_mut().memory_read_32(vaddr)
    }
    fn memory_read_64(&self, vaddr: u64) -> u64 {
        self.0.borrow_mut().memory_read_64(vaddr)
    }
}

impl CompileEnv for Env {
    type Loc = A64LocationDescriptor;

    fn location_from_state(&self, state: &GuestState, single_step: bool) -> Self::Loc {
        A64LocationDescriptor::new(state.pc, state.fpcr_codegen, single_step)
    }

    fn compile(
        &mut self,
        loc: Self::Loc,
        base_rip: u64,
        pool: &mut ConstantPool,
        stubs: &StubAddrs,
        _fastmem_disabled: bool,
    ) -> Result<CompiledBlock, EmitError> {
        let holder = unsafe { &mut *self.holder };
        let adapter = CallbackAdapter(RefCell::new(&mut holder.callbacks));
        let (mut block, _stop) = translate_a64(loc, &adapter, &self.translate_options);
        dynarm_opt::run_a64(&mut block, &self.opt_config, &adapter)
            .unwrap_or_else(|e| panic!("IR verification failed for {loc:?}: {e}"));
        let emitted = emit_a64(
            &block,
            EmitArgs {
                base_rip,
                stubs: *stubs,
                callbacks: &self.runtime_callbacks,
                pool,
                config: EmitConfig {
                    enable_cycle_counting: self.enable_cycle_counting,
                    unsafe_optimizations: self.unsafe_optimizations,
                    fastmem: self.fastmem_mode,
                    fpcr: Fpcr(loc.fpcr_bits() << 22),
                },
            },
        )?;
        Ok(CompiledBlock {
            emitted,
            pc_range: (loc.pc(), block.guest_code_end),
        })
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        unsafe { &mut *self.holder }.callbacks.get_ticks_remaining()
    }

    fn add_ticks(&mut self, ticks: u64) {
        unsafe { &mut *self.holder }.callbacks.add_ticks(ticks);
    }
}

impl A64Cpu {
    pub fn new(config: A64Config) -> Result<A64Cpu, ConfigError> {
        if let Some(pt) = &config.page_table {
            if !(13..=48).contains(&pt.address_space_bits) {
                return Err(ConfigError::PageTableAddressSpace(pt.address_space_bits));
            }
        }
        let monitor = config
            .global_monitor
            .unwrap_or_else(|| Arc::new(ExclusiveMonitor::new(config.processor_id + 1)));
        if config.processor_id >= monitor.processor_count() {
            return Err(ConfigError::ProcessorId {
                id: config.processor_id,
                count: monitor.processor_count(),
            });
        }
        let mut holder = Box::new(Holder {
            callbacks: config.callbacks,
            monitor: monitor.clone(),
            processor_id: config.processor_id,
        });
        let runtime_callbacks = shims::table(&mut *holder);
        let mut dispatcher =
            Dispatcher::new(config.code_cache_size, &runtime_callbacks, false, false)?;
        let state = dispatcher.state_mut();
        state.mem_base = config.page_table.map(|pt| pt.pointer as u64).unwrap_or(0);
        state.guest_mxcsr = mxcsr_for_fpcr(Fpcr(0));
        let fastmem_mode = match &config.page_table {
            Some(pt) => FastmemMode::PageTable(PageTableConfig {
                address_space_bits: pt.address_space_bits,
                absolute_offset: pt.absolute_offset_page_table,
                silently_mirror: pt.silently_mirror_page_table,
                detect_misaligned_mask: pt.detect_misaligned_access_via_page_table,
                only_detect_on_page_boundary: pt
                    .only_detect_misalignment_via_page_table_on_page_boundary,
            }),
            None => FastmemMode::None,
        };
        let env = Env {
            holder: &mut *holder,
            runtime_callbacks,
            translate_options: A64TranslateOptions {
                base: TranslateOptions {
                    max_block_size: config.max_block_size,
                    single_step: false,
                    define_unpredictable_behaviour: config.define_unpredictable_behaviour,
                    hook_hint_instructions: config.hook_hint_instructions,
                },
                dczid_el0: config.dczid_el0,
                ctr_el0: config.ctr_el0,
                cntfrq_el0: config.cntfrq_el0,
                tpidr_el0: config.tpidr_el0,
                tpidrro_el0: config.tpidrro_el0,
            },
            opt_config: OptConfig {
                optimizations: config.optimizations & Optimization::all_safe_optimizations(),
                unsafe_optimizations: if config.enable_unsafe_optimizations {
                    config.unsafe_optimizations
                } else {
                    UnsafeOptimization::empty()
                },
                hook_data_cache_operations: config.hook_data_cache_operations,
            },
            fastmem_mode,
            enable_cycle_counting: config.enable_cycle_counting,
            unsafe_optimizations: if config.enable_unsafe_optimizations {
                config.unsafe_optimizations
            } else {
                UnsafeOptimization::empty()
            },
        };
        Ok(A64Cpu {
            dispatcher,
            env,
            monitor,
            is_executing: AtomicBool::new(false),
            _holder: holder,
        })
    }

    pub fn run(&mut self) -> HaltReason {
        self.is_executing.store(true, Ordering::SeqCst);
        let reason = self
            .dispatcher
            .run(&mut self.env)
            .unwrap_or_else(|e| panic!("block compilation failed: {e}"));
        self.is_executing.store(false, Ordering::SeqCst);
        reason
    }

    pub fn step(&mut self) -> HaltReason {
        self.is_executing.store(true, Ordering::SeqCst);
        let reason = self
            .dispatcher
            .step(&mut self.env)
            .unwrap_or_else(|e| panic!("block compilation failed: {e}"));
        self.is_executing.store(false, Ordering::SeqCst);
        reason
    }

    pub fn is_executing(&self) -> bool {
        self.is_executing.load(Ordering::SeqCst)
    }

    pub fn halt(&self) {
        self.dispatcher.halt(HaltReason::USER_DEFINED);
    }

    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle::new(&self.dispatcher.state().halt_reason)
    }

    pub fn exceptional_exit(&self) {
        let pid = unsafe { &*self.env.holder }.processor_id;
        self.monitor.clear_exclusive(pid);
        self.dispatcher.halt(HaltReason::UNRECOVERABLE_EXCEPTION);
    }

    /// X0..X30; reads of index 31 observe the zero register.
    pub fn x(&self, index: usize) -> u64 {
        assert!(index < 32);
        if index == 31 {
            0
        } else {
            self.dispatcher.state().regs[index]
        }
    }

    pub fn set_x(&mut self, index: usize, value: u64) {
        assert!(index < 31);
        self.dispatcher.state_mut().regs[index] = value;
    }

    pub fn sp(&self) -> u64 {
        self.dispatcher.state().sp
    }

    pub fn set_sp(&mut self, value: u64) {
        self.dispatcher.state_mut().sp = value;
    }

    pub fn pc(&self) -> u64 {
        self.dispatcher.state().pc
    }

    pub fn set_pc(&mut self, value: u64) {
        self.dispatcher.state_mut().pc = value;
    }

    pub fn vector(&self, index: usize) -> u128 {
        assert!(index < 32);
        self.dispatcher.state().vec[index]
    }

    pub fn set_vector(&mut self, index: usize, value: u128) {
        assert!(index < 32);
        self.dispatcher.state_mut().vec[index] = value;
    }

    /// PSTATE.NZCV in ARM layout (bits 31..28).
    pub fn pstate(&self) -> u32 {
        self.dispatcher.state().cpsr_nzcv
    }

    pub fn set_pstate(&mut self, value: u32) {
        self.dispatcher.state_mut().cpsr_nzcv = value & 0xF000_0000;
    }

    pub fn fpcr(&self) -> u32 {
        self.dispatcher.state().fpcr
    }

    pub fn set_fpcr(&mut self, value: u32) {
        let state = self.dispatcher.state_mut();
        state.fpcr = value;
        state.fpcr_codegen = Fpcr(value).codegen_bits() >> 22;
        state.guest_mxcsr = mxcsr_for_fpcr(Fpcr(value));
    }

    pub fn fpsr(&self) -> u32 {
        self.dispatcher.state().fpsr
    }

    pub fn set_fpsr(&mut self, value: u32) {
        self.dispatcher.state_mut().fpsr = value;
    }

    pub fn clear_exclusive_state(&mut self) {
        let pid = unsafe { &*self.env.holder }.processor_id;
        self.monitor.clear_exclusive(pid);
    }

    pub fn clear_cache(&mut self) {
        self.dispatcher.clear_cache();
    }

    pub fn invalidate_cache_range(&mut self, start: u64, length: u64) {
        self.dispatcher.invalidate_range(start, length);
    }

    pub fn disassemble(&self, pc: u64) -> Option<String> {
        let loc = self
            .env
            .location_from_state(self.dispatcher.state(), false)
            .with_pc(pc);
        let bytes = self.dispatcher.block_bytes(loc.unique_hash())?;
        Some(disasm::dump(bytes))
    }
}

mod shims {
    use super::*;

    pub(super) fn table(holder: &mut Holder) -> RuntimeCallbacks {
        let ctx = holder as *mut Holder as usize;
        RuntimeCallbacks {
            ctx,
            memory_read: [
                read8 as unsafe extern "C" fn(usize, u64) -> u8 as usize,
                read16 as unsafe extern "C" fn(usize, u64) -> u16 as usize,
                read32 as unsafe extern "C" fn(usize, u64) -> u32 as usize,
                read64 as unsafe extern "C" fn(usize, u64) -> u64 as usize,
            ],
            memory_write: [
                write8 as unsafe extern "C" fn(usize, u64, u64) as usize,
                write16 as unsafe extern "C" fn(usize, u64, u64) as usize,
                write32 as unsafe extern "C" fn(usize, u64, u64) as usize,
                write64 as unsafe extern "C" fn(usize, u64, u64) as usize,
            ],
            exclusive_read: [
                excl_read8 as unsafe extern "C" fn(usize, u64) -> u64 as usize,
                excl_read16 as unsafe extern "C" fn(usize, u64) -> u64 as usize,
                excl_read32 as unsafe extern "C" fn(usize, u64) -> u64 as usize,
                excl_read64 as unsafe extern "C" fn(usize, u64) -> u64 as usize,
            ],
            exclusive_write: [
                excl_write8 as unsafe extern "C" fn(usize, u64, u64) -> u32 as usize,
                excl_write16 as unsafe extern "C" fn(usize, u64, u64) -> u32 as usize,
                excl_write32 as unsafe extern "C" fn(usize, u64, u64) -> u32 as usize,
                excl_write64 as unsafe extern "C" fn(usize, u64, u64) -> u32 as usize,
            ],
            clear_exclusive: clear_exclusive as unsafe extern "C" fn(usize) as usize,
            zero_memory_block: zero_memory_block as unsafe extern "C" fn(usize, u64, u64) as usize,
            call_svc: call_svc as unsafe extern "C" fn(usize, u64) as usize,
            exception_raised: exception_raised as unsafe extern "C" fn(usize, u64, u64) as usize,
            data_cache_operation: data_cache_op as unsafe extern "C" fn(usize, u64, u64) as usize,
            instruction_cache_operation: instruction_cache_op
                as unsafe extern "C" fn(usize, u64, u64) as usize,
            get_cntpct: get_cntpct as unsafe extern "C" fn(usize) -> u64 as usize,
            coproc_get_one_word: coproc_get as unsafe extern "C" fn(usize, u64) -> u32 as usize,
            coproc_set_one_word: coproc_set as unsafe extern "C" fn(usize, u64, u64) as usize,
            interpreter_fallback: interpreter_fallback
                as unsafe extern "C" fn(usize, u64, u64) as usize,
        }
    }

    unsafe fn holder<'a>(ctx: usize) -> &'a mut Holder {
        &mut *(ctx as *mut Holder)
    }

    unsafe extern "C" fn read8(ctx: usize, vaddr: u64) -> u8 {
        holder(ctx).callbacks.memory_read_8(vaddr)
    }
    unsafe extern "C" fn read16(ctx: usize, vaddr: u64) -> u16 {
        holder(ctx).callbacks.memory_read_16(vaddr)
    }
    unsafe extern "C" fn read32(ctx: usize, vaddr: u64) -> u32 {
        holder(ctx).callbacks.memory_read_32(vaddr)
    }
    unsafe extern "C" fn read64(ctx: usize, vaddr: u64) -> u64 {
        holder(ctx).callbacks.memory_read_64(vaddr)
    }

    unsafe extern "C" fn write8(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_8(vaddr, value as u8);
    }
    unsafe extern "C" fn write16(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_16(vaddr, value as u16);
    }
    unsafe extern "C" fn write32(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_32(vaddr, value as u32);
    }
    unsafe extern "C" fn write64(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_64(vaddr, value);
    }

    unsafe extern "C" fn excl_read8(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_8(vaddr) as u64
        })
    }
    unsafe extern "C" fn excl_read16(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_16(vaddr) as u64
        })
    }
    unsafe extern "C" fn excl_read32(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_32(vaddr) as u64
        })
    }
    unsafe extern "C" fn excl_read64(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || h.callbacks.memory_read_64(vaddr))
    }

    unsafe extern "C" fn excl_write8(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_8(vaddr, value as u8, snapshot as u8)
        })
    }
    unsafe extern "C" fn excl_write16(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_16(vaddr, value as u16, snapshot as u16)
        })
    }
    unsafe extern "C" fn excl_write32(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_32(vaddr, value as u32, snapshot as u32)
        })
    }
    unsafe extern "C" fn excl_write64(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks.memory_write_exclusive_64(vaddr, value, snapshot)
        })
    }

    unsafe extern "C" fn clear_exclusive(ctx: usize) {
        let h = holder(ctx);
        h.monitor.clear_exclusive(h.processor_id);
    }

    unsafe extern "C" fn zero_memory_block(ctx: usize, vaddr: u64, count: u64) {
        let h = holder(ctx);
        // `DC ZVA` zeroes the aligned block containing the address.
        let base = if count.is_power_of_two() {
            vaddr & !(count - 1)
        } else {
            vaddr
        };
        let mut i = 0u64;
        while i + 8 <= count {
            h.callbacks.memory_write_64(base.wrapping_add(i), 0);
            i += 8;
        }
        while i < count {
            h.callbacks.memory_write_8(base.wrapping_add(i), 0);
            i += 1;
        }
    }

    unsafe extern "C" fn call_svc(ctx: usize, swi: u64) {
        holder(ctx).callbacks.call_svc(swi as u32);
    }

    unsafe extern "C" fn exception_raised(ctx: usize, pc: u64, kind: u64) {
        let kind = ExceptionKind::from_bits(kind as u32)
            .unwrap_or(ExceptionKind::UndefinedInstruction);
        holder(ctx).callbacks.exception_raised(pc, kind);
    }

    unsafe extern "C" fn data_cache_op(ctx: usize, op: u64, vaddr: u64) {
        holder(ctx)
            .callbacks
            .data_cache_operation_raised(op as u32, vaddr);
    }

    unsafe extern "C" fn instruction_cache_op(ctx: usize, op: u64, vaddr: u64) {
        holder(ctx)
            .callbacks
            .instruction_cache_operation_raised(op as u32, vaddr);
    }

    unsafe extern "C" fn get_cntpct(ctx: usize) -> u64 {
        holder(ctx).callbacks.get_cntpct()
    }

    unsafe extern "C" fn coproc_get(_ctx: usize, _packed: u64) -> u32 {
        // Coprocessors are an A32 concept; A64 system registers go
        // through MRS handling in the translator.
        0
    }

    unsafe extern "C" fn coproc_set(_ctx: usize, _packed: u64, _value: u64) {}

    unsafe extern "C" fn interpreter_fallback(ctx: usize, pc: u64, num: u64) {
        holder(ctx).callbacks.interpreter_fallback(pc, num as usize);
    }
}
