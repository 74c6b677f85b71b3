//! The A32/Thumb CPU instance: construction wires the embedder's callback
//! table into C-ABI shims the emitted code calls, compilation runs
//! translate → optimize → emit on every cache miss, and the register
//! surface reads and writes the guest state struct directly while the
//! dispatcher is idle.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dynarm_backend::{
    abi::GuestState, emit_a32, ConstantPool, EmitArgs, EmitConfig, EmitError, FastmemMode,
    PageTableConfig, RuntimeCallbacks, StubAddrs,
};
use dynarm_frontend::{
    a32::translate_a32,
    coprocessor::CoprocessorTable,
    translate::{MemoryReadCode, TranslateOptions},
};
use dynarm_opt::{OptConfig, Optimization, UnsafeOptimization};
use dynarm_runtime::{
    CompileEnv, CompiledBlock, Dispatcher, ExclusiveMonitor, HaltReason,
};
use dynarm_types::{A32LocationDescriptor, ExceptionKind, Fpcr, MemoryProbe};

use crate::{
    callbacks::A32Callbacks,
    config::{A32Config, ConfigError},
    disasm,
    mxcsr_for_fpcr, HaltHandle,
};

struct Holder {
    callbacks: Box<dyn A32Callbacks>,
    monitor: Arc<ExclusiveMonitor>,
    processor_id: usize,
    coprocessors: CoprocessorTable,
}

pub struct A32Cpu {
    // Field order is drop order: emitted code and its signal-handler
    // registrations go away before the callbacks they point into.
    dispatcher: Dispatcher,
    env: Env,
    monitor: Arc<ExclusiveMonitor>,
    is_executing: AtomicBool,
    _holder: Box<Holder>,
}

struct Env {
    holder: *mut Holder,
    runtime_callbacks: RuntimeCallbacks,
    translate_options: TranslateOptions,
    opt_config: OptConfig,
    fastmem_mode: FastmemMode,
    enable_cycle_counting: bool,
    unsafe_optimizations: UnsafeOptimization,
}

/// Presents the `&mut`-style callback table as the `&self` interfaces the
/// translator (code fetch) and optimizer (read-only-memory probe) expect.
struct CallbackAdapter<'a>(RefCell<&'a mut Box<dyn A32Callbacks>>);

impl MemoryReadCode for CallbackAdapter<'_> {
    fn memory_read_code(&self, vaddr: u64) -> u32 {
        self.0.borrow_mut().memory_read_code(vaddr as u32)
    }
}

impl MemoryProbe for CallbackAdapter<'_> {
    fn is_read_only_memory(&self, vaddr: u64) -> bool {
        self.0.borrow_mut().is_read_only_memory(vaddr as u32)
    }
    fn memory_read_8(&self, vaddr: u64) -> u8 {
        self.0.borrow_mut().memory_read_8(vaddr as u32)
    }
    fn memory_read_16(&self, vaddr: u64) -> u16 {
        self.0.borrow_mut().memory_read_16(vaddr as u32)
    }
    fn memory_read_32(&self, vaddr: u64) -> u32 {
        self.0.borrow_mut().memory_read_32(vaddr as u32)
    }
    fn memory_read_64(&self, vaddr: u64) -> u64 {
        self.0.borrow_mut().memory_read_64(vaddr as u32)
    }
}

impl CompileEnv for Env {
    type Loc = A32LocationDescriptor;

    fn location_from_state(&self, state: &GuestState, single_step: bool) -> Self::Loc {
        A32LocationDescriptor::from_packed(state.regs[15] as u32, state.location_packed)
            .with_single_step(single_step)
    }

    fn compile(
        &mut self,
        loc: Self::Loc,
        base_rip: u64,
        pool: &mut ConstantPool,
        stubs: &StubAddrs,
        fastmem_disabled: bool,
    ) -> Result<CompiledBlock, EmitError> {
        let holder = unsafe { &mut *self.holder };
        let coprocessors = &holder.coprocessors;
        let adapter = CallbackAdapter(RefCell::new(&mut holder.callbacks));
        let (mut block, _stop) =
            translate_a32(loc, &adapter, &self.translate_options, coprocessors);
        // A verification failure is a translator bug.
        dynarm_opt::run_a32(&mut block, &self.opt_config, &adapter)
            .unwrap_or_else(|e| panic!("IR verification failed for {loc:?}: {e}"));
        let fastmem = if fastmem_disabled {
            FastmemMode::None
        } else {
            self.fastmem_mode
        };
        let emitted = emit_a32(
            &block,
            EmitArgs {
                base_rip,
                stubs: *stubs,
                callbacks: &self.runtime_callbacks,
                pool,
                config: EmitConfig {
                    enable_cycle_counting: self.enable_cycle_counting,
                    unsafe_optimizations: self.unsafe_optimizations,
                    fastmem,
                    fpcr: Fpcr(loc.fpcr_bits() << 22),
                },
            },
        )?;
        Ok(CompiledBlock {
            emitted,
            pc_range: (loc.pc() as u64, block.guest_code_end),
        })
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        unsafe { &mut *self.holder }.callbacks.get_ticks_remaining()
    }

    fn add_ticks(&mut self, ticks: u64) {
        unsafe { &mut *self.holder }.callbacks.add_ticks(ticks);
    }
}

impl A32Cpu {
    pub fn new(config: A32Config) -> Result<A32Cpu, ConfigError> {
        if config.page_table.is_some() && config.fastmem_pointer.is_some() {
            return Err(ConfigError::ConflictingFastmem);
        }
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
            coprocessors: config.coprocessors,
        });
        let runtime_callbacks = shims::table(&mut *holder);
        let signal_fastmem = config.fastmem_pointer.is_some();
        let mut dispatcher = Dispatcher::new(
            config.code_cache_size,
            &runtime_callbacks,
            signal_fastmem,
            config.recompile_on_fastmem_failure,
        )?;
        let state = dispatcher.state_mut();
        state.mem_base = config
            .page_table
            .map(|pt| pt.pointer as u64)
            .or(config.fastmem_pointer)
            .unwrap_or(0);
        state.guest_mxcsr = mxcsr_for_fpcr(Fpcr(0));
        let fastmem_mode = match (&config.page_table, config.fastmem_pointer) {
            (Some(pt), _) => FastmemMode::PageTable(PageTableConfig {
                address_space_bits: pt.address_space_bits,
                absolute_offset: pt.absolute_offset_page_table,
                silently_mirror: pt.silently_mirror_page_table,
                detect_misaligned_mask: pt.detect_misaligned_access_via_page_table,
                only_detect_on_page_boundary: pt
                    .only_detect_misalignment_via_page_table_on_page_boundary,
            }),
            (None, Some(_)) => FastmemMode::SignalHandler,
            (None, None) => FastmemMode::None,
        };
        let env = Env {
            holder: &mut *holder,
            runtime_callbacks,
            translate_options: TranslateOptions {
                max_block_size: config.max_block_size,
                single_step: false,
                define_unpredictable_behaviour: config.define_unpredictable_behaviour,
                hook_hint_instructions: config.hook_hint_instructions,
            },
            opt_config: OptConfig {
                optimizations: config.optimizations & Optimization::all_safe_optimizations(),
                unsafe_optimizations: if config.enable_unsafe_optimizations {
                    config.unsafe_optimizations
                } else {
                    UnsafeOptimization::empty()
                },
                hook_data_cache_operations: false,
            },
            fastmem_mode,
            enable_cycle_counting: config.enable_cycle_counting,
            unsafe_optimizations: if config.enable_unsafe_optimizations {
                config.unsafe_optimizations
            } else {
                UnsafeOptimization::empty()
            },
        };
        Ok(A32Cpu {
            dispatcher,
            env,
            monitor,
            is_executing: AtomicBool::new(false),
            _holder: holder,
        })
    }

    /// Run until a halt reason is posted.
    pub fn run(&mut self) -> HaltReason {
        self.is_executing.store(true, Ordering::SeqCst);
        let reason = self
            .dispatcher
            .run(&mut self.env)
            .unwrap_or_else(|e| panic!("block compilation failed: {e}"));
        self.is_executing.store(false, Ordering::SeqCst);
        reason
    }

    /// Execute a single guest instruction.
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

    /// Request a stop from any thread; emitted code observes it at the
    /// next halt-checking terminator.
    pub fn halt(&self) {
        self.dispatcher.halt(HaltReason::USER_DEFINED);
    }

    /// A handle an embedder's callbacks can use to halt execution from
    /// within a callback or from another thread. Valid for the lifetime
    /// of this CPU instance.
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle::new(&self.dispatcher.state().halt_reason)
    }

    /// Abort the current run from inside a callback after an
    /// unrecoverable guest condition; also drops the exclusive claim.
    pub fn exceptional_exit(&self) {
        self.monitor.clear_exclusive(self.env_processor_id());
        self.dispatcher.halt(HaltReason::UNRECOVERABLE_EXCEPTION);
    }

    fn env_processor_id(&self) -> usize {
        unsafe { &*self.env.holder }.processor_id
    }

    pub fn reg(&self, index: usize) -> u32 {
        assert!(index < 16);
        self.dispatcher.state().regs[index] as u32
    }

    pub fn set_reg(&mut self, index: usize, value: u32) {
        assert!(index < 16);
        self.dispatcher.state_mut().regs[index] = value as u64;
    }

    pub fn regs(&self) -> [u32; 16] {
        std::array::from_fn(|i| self.reg(i))
    }

    pub fn pc(&self) -> u32 {
        self.reg(15)
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.set_reg(15, pc);
    }

    /// One 32-bit lane of the extension register file (S0..S63).
    pub fn ext_reg(&self, index: usize) -> u32 {
        assert!(index < 64);
        let lane = self.dispatcher.state().vec[index / 4];
        (lane >> (32 * (index % 4))) as u32
    }

    pub fn set_ext_reg(&mut self, index: usize, value: u32) {
        assert!(index < 64);
        let lane = &mut self.dispatcher.state_mut().vec[index / 4];
        let shift = 32 * (index % 4);
        *lane = (*lane & !(0xFFFF_FFFFu128 << shift)) | ((value as u128) << shift);
    }

    pub fn cpsr(&self) -> u32 {
        let state = self.dispatcher.state();
        state.cpsr_nzcv | state.cpsr_other
    }

    /// CPSR writes re-derive the packed location word, so the next
    /// dispatch sees the new T/E/IT mode bits as part of block identity.
    pub fn set_cpsr(&mut self, value: u32) {
        let fpcr_bits = Fpcr(self.fpcr()).codegen_bits() >> 22;
        let state = self.dispatcher.state_mut();
        state.cpsr_nzcv = value & 0xF000_0000;
        state.cpsr_other = value & 0x0FFF_FFFF;
        let thumb = value & (1 << 5) != 0;
        let big_endian = value & (1 << 9) != 0;
        // ITSTATE: CPSR[15:10] is IT[7:2], CPSR[26:25] is IT[1:0].
        let it = (((value >> 10) & 0x3F) << 2) | ((value >> 25) & 0x3);
        state.location_packed =
            A32LocationDescriptor::new(0, thumb, big_endian, it as u8, fpcr_bits).packed_bits();
    }

    pub fn fpcr(&self) -> u32 {
        self.dispatcher.state().fpcr
    }

    pub fn set_fpcr(&mut self, value: u32) {
        let cpsr = self.cpsr();
        let state = self.dispatcher.state_mut();
        state.fpcr = value;
        state.fpcr_codegen = Fpcr(value).codegen_bits() >> 22;
        state.guest_mxcsr = mxcsr_for_fpcr(Fpcr(value));
        // The packed location word carries FPCR bits; rebuild it.
        self.set_cpsr(cpsr);
    }

    pub fn fpsr(&self) -> u32 {
        self.dispatcher.state().fpsr
    }

    pub fn set_fpsr(&mut self, value: u32) {
        self.dispatcher.state_mut().fpsr = value;
    }

    pub fn clear_exclusive_state(&mut self) {
        self.monitor.clear_exclusive(self.env_processor_id());
    }

    pub fn clear_cache(&mut self) {
        self.dispatcher.clear_cache();
    }

    pub fn invalidate_cache_range(&mut self, start: u32, length: u32) {
        self.dispatcher
            .invalidate_range(start as u64, length as u64);
    }

    /// Debug-only textual dump of the emitted host code for the block
    /// starting at `pc` under the current mode bits.
    pub fn disassemble(&self, pc: u32) -> Option<String> {
        let loc = self
            .env
            .location_from_state(self.dispatcher.state(), false)
            .with_pc(pc);
        let bytes = self.dispatcher.block_bytes(loc.unique_hash())?;
        Some(disasm::dump(bytes))
    }
}

/// The C-ABI shims emitted code calls. Each receives the holder pointer as
/// its context argument; widths wider than the architectural value are
/// truncated on entry.
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
            data_cache_operation: cache_op as unsafe extern "C" fn(usize, u64, u64) as usize,
            instruction_cache_operation: cache_op as unsafe extern "C" fn(usize, u64, u64) as usize,
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
        holder(ctx).callbacks.memory_read_8(vaddr as u32)
    }
    unsafe extern "C" fn read16(ctx: usize, vaddr: u64) -> u16 {
        holder(ctx).callbacks.memory_read_16(vaddr as u32)
    }
    unsafe extern "C" fn read32(ctx: usize, vaddr: u64) -> u32 {
        holder(ctx).callbacks.memory_read_32(vaddr as u32)
    }
    unsafe extern "C" fn read64(ctx: usize, vaddr: u64) -> u64 {
        holder(ctx).callbacks.memory_read_64(vaddr as u32)
    }

    unsafe extern "C" fn write8(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_8(vaddr as u32, value as u8);
    }
    unsafe extern "C" fn write16(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx)
            .callbacks
            .memory_write_16(vaddr as u32, value as u16);
    }
    unsafe extern "C" fn write32(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx)
            .callbacks
            .memory_write_32(vaddr as u32, value as u32);
    }
    unsafe extern "C" fn write64(ctx: usize, vaddr: u64, value: u64) {
        holder(ctx).callbacks.memory_write_64(vaddr as u32, value);
    }

    unsafe extern "C" fn excl_read8(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_8(vaddr as u32) as u64
        })
    }
    unsafe extern "C" fn excl_read16(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_16(vaddr as u32) as u64
        })
    }
    unsafe extern "C" fn excl_read32(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_32(vaddr as u32) as u64
        })
    }
    unsafe extern "C" fn excl_read64(ctx: usize, vaddr: u64) -> u64 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.read_and_claim(h.processor_id, vaddr, || {
            h.callbacks.memory_read_64(vaddr as u32)
        })
    }

    unsafe extern "C" fn excl_write8(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_8(vaddr as u32, value as u8, snapshot as u8)
        })
    }
    unsafe extern "C" fn excl_write16(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_16(vaddr as u32, value as u16, snapshot as u16)
        })
    }
    unsafe extern "C" fn excl_write32(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_32(vaddr as u32, value as u32, snapshot as u32)
        })
    }
    unsafe extern "C" fn excl_write64(ctx: usize, vaddr: u64, value: u64) -> u32 {
        let h = holder(ctx);
        let monitor = h.monitor.clone();
        monitor.do_exclusive_write(h.processor_id, vaddr, |snapshot| {
            h.callbacks
                .memory_write_exclusive_64(vaddr as u32, value, snapshot)
        })
    }

    unsafe extern "C" fn clear_exclusive(ctx: usize) {
        let h = holder(ctx);
        h.monitor.clear_exclusive(h.processor_id);
    }

    unsafe extern "C" fn zero_memory_block(ctx: usize, vaddr: u64, count: u64) {
        let h = holder(ctx);
        let base = if count.is_power_of_two() {
            (vaddr & !(count - 1)) as u32
        } else {
            vaddr as u32
        };
        let mut i = 0u32;
        while i + 8 <= count as u32 {
            h.callbacks.memory_write_64(base.wrapping_add(i), 0);
            i += 8;
        }
        while i < count as u32 {
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
        holder(ctx).callbacks.exception_raised(pc as u32, kind);
    }

    unsafe extern "C" fn cache_op(_ctx: usize, _op: u64, _vaddr: u64) {
        // The A32 callback table carries no cache-maintenance entries
        //; nothing in the A32 decode set emits these ops.
    }

    unsafe extern "C" fn get_cntpct(_ctx: usize) -> u64 {
        0
    }

    unsafe extern "C" fn coproc_get(ctx: usize, packed: u64) -> u32 {
        let h = holder(ctx);
        let cp = (packed & 0xF) as usize;
        let crn = ((packed >> 4) & 0xF) as u8;
        let opc1 = ((packed >> 8) & 0xF) as u8;
        let crm = ((packed >> 12) & 0xF) as u8;
        let opc2 = ((packed >> 16) & 0xF) as u8;
        match h.coprocessors[cp].as_mut() {
            Some(coproc) => coproc.get_one_word(crn, opc1, crm, opc2),
            None => 0,
        }
    }

    unsafe extern "C" fn coproc_set(ctx: usize, packed: u64, value: u64) {
        let h = holder(ctx);
        let cp = (packed & 0xF) as usize;
        let crn = ((packed >> 4) & 0xF) as u8;
        let opc1 = ((packed >> 8) & 0xF) as u8;
        let crm = ((packed >> 12) & 0xF) as u8;
        let opc2 = ((packed >> 16) & 0xF) as u8;
        if let Some(coproc) = h.coprocessors[cp].as_mut() {
            coproc.set_one_word(crn, opc1, crm, opc2, value as u32);
        }
    }

    unsafe extern "C" fn interpreter_fallback(ctx: usize, pc: u64, num: u64) {
        holder(ctx)
            .callbacks
            .interpreter_fallback(pc as u32, num as usize);
    }
}
