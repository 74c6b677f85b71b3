//! The code emitter: walks an optimized IR block and produces host
//! machine code, patch-site records for the block linker, and fastmem
//! fault-site records for the signal handler. Per-opcode lowering lives in
//! the submodules; this module owns the walk, the prelude (block-condition
//! check), the terminator epilogues, and label/offset resolution.

pub mod data_processing;
pub mod floating_point;
pub mod memory;
pub mod state;
pub mod terminal;
pub mod vector;

use dynarm_ir::{Block, InstId, Location, Opcode, Terminator, Value};
use dynarm_opt::UnsafeOptimization;
use dynarm_types::{A32LocationDescriptor, A64LocationDescriptor, Fpcr};
use iced_x86::code_asm::{dword_ptr, qword_ptr, CodeAssembler, CodeLabel};

use crate::{
    abi::{self, RuntimeCallbacks, OFF_CYCLES_REMAINING},
    constant_pool::ConstantPool,
    hostloc::{gpr32, gpr64, SCRATCH0, SCRATCH1, STATE},
    regalloc::RegAlloc,
    stubs::StubAddrs,
    EmitError,
};

/// Kinds of patchable site, mirroring the three per-target lists the
/// block cache keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// 6-byte `jg rel32`: taken when cycles remain, rewritten to the
    /// target's entrypoint once compiled.
    Jg,
    /// 5-byte `jmp rel32`.
    Jmp,
    /// 10-byte `mov rcx, imm64` materializing a code pointer.
    MovRcx,
}

impl PatchKind {
    pub const fn len(self) -> usize {
        match self {
            PatchKind::Jg => 6,
            PatchKind::Jmp => 5,
            PatchKind::MovRcx => 10,
        }
    }
}

/// What an unpatched site branches to (or materializes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFallback {
    /// Branch to the site's own fall-through; a no-op branch.
    NextInstruction,
    /// The dispatcher reentry stub.
    ExitStub,
}

#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    pub offset: usize,
    pub kind: PatchKind,
    pub target_hash: u64,
    pub fallback: PatchFallback,
}

/// A fastmem access: the faulting instruction and the deferred fallback
/// the signal handler redirects to.
#[derive(Debug, Clone, Copy)]
pub struct FastmemSite {
    pub fault_offset: usize,
    pub fallback_offset: usize,
}

#[derive(Debug)]
pub struct EmittedBlock {
    pub bytes: Vec<u8>,
    pub patch_sites: Vec<PatchSite>,
    pub fastmem_sites: Vec<FastmemSite>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageTableConfig {
    pub address_space_bits: u32,
    /// Stored page bases are pre-biased so the full guest address is added
    /// (rather than the masked page offset).
    pub absolute_offset: bool,
    /// Out-of-range addresses wrap instead of falling back.
    pub silently_mirror: bool,
    /// Bitmask of access sizes (bit 0 = 8-bit, ... bit 3 = 64-bit) whose
    /// misalignment must be policed via the fallback path.
    pub detect_misaligned_mask: u32,
    pub only_detect_on_page_boundary: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum FastmemMode {
    /// Every access goes through the embedder's callbacks.
    None,
    /// Inline page-table walk with callback fallback.
    PageTable(PageTableConfig),
    /// Direct host access off the 4 GiB window, recovered via SIGSEGV.
    SignalHandler,
}

#[derive(Debug, Clone, Copy)]
pub struct EmitConfig {
    pub enable_cycle_counting: bool,
    pub unsafe_optimizations: UnsafeOptimization,
    pub fastmem: FastmemMode,
    pub fpcr: Fpcr,
}

pub struct EmitArgs<'a> {
    pub base_rip: u64,
    pub stubs: StubAddrs,
    pub callbacks: &'a RuntimeCallbacks,
    pub pool: &'a mut ConstantPool,
    pub config: EmitConfig,
}

/// Per-architecture glue the shared emitter parameterizes over: how a
/// static location is written back to the guest state, and how the
/// current location's hash is recomputed at run time for the RSB and
/// fast-dispatch epilogues. Hash sequences leave the hash in RAX and may
/// clobber RCX.
pub trait TargetArch {
    type Loc: Location;
    fn write_location(a: &mut CodeAssembler, loc: Self::Loc) -> Result<(), EmitError>;
    fn emit_location_hash(a: &mut CodeAssembler) -> Result<(), EmitError>;
}

pub struct A32Target;

impl TargetArch for A32Target {
    type Loc = A32LocationDescriptor;

    fn write_location(a: &mut CodeAssembler, loc: Self::Loc) -> Result<(), EmitError> {
        a.mov(
            dword_ptr(gpr64(STATE) + abi::off_reg(15)),
            loc.pc() as i32,
        )?;
        // The single-step bit is dispatcher-private, not architectural
        // state; storing it would make every later dispatch resolve to
        // single-step block identities.
        let packed = loc.with_single_step(false).packed_bits();
        a.mov(
            dword_ptr(gpr64(STATE) + abi::OFF_LOCATION_PACKED),
            packed as i32,
        )?;
        Ok(())
    }

    fn emit_location_hash(a: &mut CodeAssembler) -> Result<(), EmitError> {
        a.mov(gpr32(SCRATCH0), dword_ptr(gpr64(STATE) + abi::off_reg(15)))?;
        a.mov(
            gpr32(SCRATCH1),
            dword_ptr(gpr64(STATE) + abi::OFF_LOCATION_PACKED),
        )?;
        a.shl(gpr64(SCRATCH1), 32)?;
        a.or(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
        Ok(())
    }
}

pub struct A64Target;

impl TargetArch for A64Target {
    type Loc = A64LocationDescriptor;

    fn write_location(a: &mut CodeAssembler, loc: Self::Loc) -> Result<(), EmitError> {
        a.mov(gpr64(SCRATCH0), loc.pc())?;
        a.mov(qword_ptr(gpr64(STATE) + abi::OFF_PC), gpr64(SCRATCH0))?;
        Ok(())
    }

    fn emit_location_hash(a: &mut CodeAssembler) -> Result<(), EmitError> {
        a.mov(gpr64(SCRATCH0), qword_ptr(gpr64(STATE) + abi::OFF_PC))?;
        a.mov(gpr64(SCRATCH1), A64LocationDescriptor::PC_MASK)?;
        a.and(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
        a.mov(
            gpr32(SCRATCH1),
            dword_ptr(gpr64(STATE) + abi::OFF_FPCR_CODEGEN),
        )?;
        a.and(gpr32(SCRATCH1), 0x7F)?;
        a.shl(gpr64(SCRATCH1), 56)?;
        a.or(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
        Ok(())
    }
}

pub(crate) struct PendingPatch {
    pub label: CodeLabel,
    pub kind: PatchKind,
    pub target_hash: u64,
    pub fallback: PatchFallback,
}

pub(crate) struct PendingFastmem {
    pub fault: CodeLabel,
    pub fallback: CodeLabel,
}

/// What a deferred fallback stores: where the fast path branched from and
/// everything needed to replay the access through the callback thunks.
pub(crate) enum Deferred {
    Load {
        entry: CodeLabel,
        resume: CodeLabel,
        addr_reg: u8,
        dst_reg: u8,
        bits: u32,
    },
    Store {
        entry: CodeLabel,
        resume: CodeLabel,
        addr_reg: u8,
        value_reg: u8,
        bits: u32,
    },
}

pub struct EmitContext<'a, T: TargetArch> {
    pub a: CodeAssembler,
    pub ra: RegAlloc,
    pub block: &'a Block<T::Loc>,
    pub stubs: StubAddrs,
    pub callbacks: &'a RuntimeCallbacks,
    pub pool: &'a mut ConstantPool,
    pub config: EmitConfig,
    pub(crate) patches: Vec<PendingPatch>,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) fastmem: Vec<PendingFastmem>,
}

impl<'a, T: TargetArch> EmitContext<'a, T> {
    /// Emit a fixed-size patchable site at the current position and record
    /// it for the block linker. The placeholder bytes are rewritten by the
    /// runtime before the block becomes reachable.
    pub(crate) fn emit_patch_site(
        &mut self,
        kind: PatchKind,
        target_hash: u64,
        fallback: PatchFallback,
    ) -> Result<(), EmitError> {
        let mut label = self.a.create_label();
        self.a.set_label(&mut label)?;
        match kind {
            PatchKind::Jg => self.a.db(&[0x0F, 0x8F, 0, 0, 0, 0])?,
            PatchKind::Jmp => self.a.db(&[0xE9, 0, 0, 0, 0])?,
            PatchKind::MovRcx => self.a.db(&[0x48, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0])?,
        }
        self.patches.push(PendingPatch {
            label,
            kind,
            target_hash,
            fallback,
        });
        Ok(())
    }
}

pub fn emit_a32(
    block: &Block<A32LocationDescriptor>,
    args: EmitArgs<'_>,
) -> Result<EmittedBlock, EmitError> {
    emit_block::<A32Target>(block, args)
}

pub fn emit_a64(
    block: &Block<A64LocationDescriptor>,
    args: EmitArgs<'_>,
) -> Result<EmittedBlock, EmitError> {
    emit_block::<A64Target>(block, args)
}

fn emit_block<T: TargetArch>(
    block: &Block<T::Loc>,
    args: EmitArgs<'_>,
) -> Result<EmittedBlock, EmitError> {
    let single_step = block.location.is_single_step();
    let mut ctx = EmitContext::<T> {
        a: CodeAssembler::new(64)?,
        ra: RegAlloc::new(block),
        block,
        stubs: args.stubs,
        callbacks: args.callbacks,
        pool: args.pool,
        config: args.config,
        patches: Vec::new(),
        deferred: Vec::new(),
        fastmem: Vec::new(),
    };

    // Prelude: a conditional block branches to its condition-failed exit
    // before any instruction runs.
    let mut cond_fail = None;
    if let Some(cond) = block.condition {
        let label = ctx.a.create_label();
        ctx.a.mov(
            gpr32(SCRATCH0),
            dword_ptr(gpr64(STATE) + abi::OFF_CPSR_NZCV),
        )?;
        terminal::jump_if_cond_false_on_eax(&mut ctx.a, cond, label)?;
        cond_fail = Some(label);
    }

    for i in 0..block.insts().len() {
        let id = InstId(i as u32);
        ctx.ra
            .spill_flags(&mut ctx.a, &|x| block.inst(x).opcode)?;
        if ctx.ra.is_defined(id) {
            // A flag-extraction consumer already materialized by
            // `spill_flags`.
            continue;
        }
        if block.inst(id).opcode == Opcode::Nop {
            continue;
        }
        emit_inst(&mut ctx, id)?;
        ctx.ra.end_of_inst();
    }
    ctx.ra
        .spill_flags(&mut ctx.a, &|x| block.inst(x).opcode)?;

    let term = block
        .terminator()
        .expect("the optimizer verified a terminator exists");
    if ctx.config.enable_cycle_counting {
        ctx.a.sub(
            qword_ptr(gpr64(STATE) + OFF_CYCLES_REMAINING),
            block.cycle_count as i32,
        )?;
    }
    terminal::emit_terminal(&mut ctx, term, single_step)?;
    ctx.ra.end_of_inst();
    ctx.ra.assert_empty();

    if let Some(mut label) = cond_fail {
        ctx.a.set_label(&mut label)?;
        if ctx.config.enable_cycle_counting {
            ctx.a.sub(
                qword_ptr(gpr64(STATE) + OFF_CYCLES_REMAINING),
                block.condition_failed_cycle_count as i32,
            )?;
        }
        let fail_loc = block
            .condition_failed_location
            .expect("conditional blocks always carry a fail location");
        terminal::emit_link_block(&mut ctx, fail_loc, single_step)?;
    }

    memory::emit_deferred(&mut ctx)?;

    let EmitContext {
        mut a,
        patches,
        deferred: _,
        fastmem,
        ..
    } = ctx;
    let result = a.assemble_options(
        args.base_rip,
        iced_x86::BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS,
    )?;
    let offset_of = |label: &CodeLabel| -> usize {
        (result
            .label_ip(label)
            .expect("all recorded labels were placed")
            - args.base_rip) as usize
    };
    let patch_sites = patches
        .iter()
        .map(|p| PatchSite {
            offset: offset_of(&p.label),
            kind: p.kind,
            target_hash: p.target_hash,
            fallback: p.fallback,
        })
        .collect();
    let fastmem_sites = fastmem
        .iter()
        .map(|f| FastmemSite {
            fault_offset: offset_of(&f.fault),
            fallback_offset: offset_of(&f.fallback),
        })
        .collect();
    Ok(EmittedBlock {
        bytes: result.inner.code_buffer,
        patch_sites,
        fastmem_sites,
    })
}

/// Flag-extraction consumers of `producer` that read the host flags it
/// leaves behind (`GetNZFromOp` recomputes from the value instead and is
/// deliberately absent).
pub(crate) fn flag_consumers<L: Location>(block: &Block<L>, producer: InstId) -> Vec<InstId> {
    block
        .insts()
        .iter()
        .enumerate()
        .filter(|(_, inst)| {
            matches!(
                inst.opcode,
                Opcode::GetCarryFromOp | Opcode::GetOverflowFromOp | Opcode::GetNZCVFromOp
            ) && inst.args.first() == Some(&Value::Ref(producer))
        })
        .map(|(i, _)| InstId(i as u32))
        .collect()
}

fn emit_inst<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    use Opcode::*;
    match ctx.block.inst(id).opcode {
        Add32 | Add64 | Sub32 | Sub64 | AddWithCarry32 | AddWithCarry64 | SubWithCarry32
        | SubWithCarry64 | Mul32 | Mul64 | And32 | And64 | Or32 | Or64 | Eor32 | Eor64 | Not32
        | Not64 | LogicalShiftLeft32 | LogicalShiftLeft64 | LogicalShiftRight32
        | LogicalShiftRight64 | ArithShiftRight32 | ArithShiftRight64 | RotateRight32
        | RotateRight64 | ZeroExtendToWord | ZeroExtendToLong | SignExtendToWord
        | SignExtendToLong | LeastSignificantByte | LeastSignificantHalf | LeastSignificantWord
        | MostSignificantBit | IsZero32 | IsZero64 | GetNZFromOp | NzcvFromPackedFlags
        | TestCondition | ConditionalSelect32 | ConditionalSelect64 => {
            data_processing::emit(ctx, id)
        }

        GetCarryFromOp | GetOverflowFromOp | GetNZCVFromOp => {
            unreachable!("flag consumers are materialized when their producer's flags spill")
        }

        FPAdd32 | FPAdd64 | FPSub32 | FPSub64 | FPMul32 | FPMul64 | FPDiv32 | FPDiv64
        | FPToFixedS32 | FPToFixedS64 | FPToFixedU32 | FPToFixedU64 => {
            floating_point::emit(ctx, id)
        }

        VectorAdd8 | VectorAdd16 | VectorAdd32 | VectorAdd64 | VectorAnd | VectorOr
        | VectorEor => vector::emit(ctx, id),

        ReadMemory8 | ReadMemory16 | ReadMemory32 | ReadMemory64 | WriteMemory8
        | WriteMemory16 | WriteMemory32 | WriteMemory64 | ExclusiveReadMemory8
        | ExclusiveReadMemory16 | ExclusiveReadMemory32 | ExclusiveReadMemory64
        | ExclusiveWriteMemory8 | ExclusiveWriteMemory16 | ExclusiveWriteMemory32
        | ExclusiveWriteMemory64 | ClearExclusive | ZeroMemoryBlock => memory::emit(ctx, id),

        Nop => Ok(()),

        _ => state::emit(ctx, id),
    }
}

