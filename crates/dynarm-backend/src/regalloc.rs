//! Linear-scan register allocation over straight-line blocks.
//!
//! Values live in exactly one of: a GPR, an XMM register, or a 16-byte
//! spill slot in the guest state struct. The emitter drives allocation
//! through the `use_*`/`scratch_*`/`define_*` calls while walking the
//! block; liveness is the remaining-use count, exact by construction, so
//! a value's register frees itself the moment its last use is consumed.
//! Eviction is least-recently-used among unpinned registers.
//!
//! Host flags are a location too: a flag-producing instruction leaves its
//! NZCV in the host flags register, and `spill_flags` materializes every
//! pending flag-extraction consumer before the next flag-clobbering
//! instruction runs.

use std::collections::HashMap;

use dynarm_ir::{Block, InstId, Location, Opcode, Value};
use iced_x86::code_asm::{qword_ptr, CodeAssembler};

use crate::{
    abi::{self, off_spill, SPILL_COUNT},
    constant_pool::ConstantPool,
    hostloc::{
        self, gpr32, gpr64, gpr8, xmm, HostLoc, GPR_ALLOCATION_ORDER, MEM_BASE, RAX, RCX, RSP,
        SCRATCH0, SCRATCH1, STATE, XMM_ALLOCATION_ORDER, XMM_SCRATCH0, XMM_SCRATCH1,
    },
    EmitError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegSlot {
    Free,
    Reserved,
    Value(InstId),
    Transient,
}

/// What the host flags currently hold.
#[derive(Debug, Clone)]
enum FlagsState {
    Free,
    Live {
        producer: InstId,
        /// `true` for subtract-family producers, whose x86 carry is the
        /// complement of the ARM carry.
        sub_family: bool,
        pending: Vec<InstId>,
    },
}

/// Host-ABI integer argument registers, in order.
const ABI_ARGS: [u8; 6] = [
    hostloc::RDI,
    hostloc::RSI,
    hostloc::RDX,
    hostloc::RCX,
    hostloc::R8,
    hostloc::R9,
];

pub enum CallArg {
    Imm64(u64),
    Imm32(u32),
    Value(Value),
}

pub struct RegAlloc {
    locs: HashMap<InstId, HostLoc>,
    remaining_uses: Vec<u32>,
    gprs: [RegSlot; 16],
    xmms: [RegSlot; 16],
    gpr_lru: [u64; 16],
    xmm_lru: [u64; 16],
    tick: u64,
    spill_used: [bool; SPILL_COUNT],
    pinned_gprs: Vec<u8>,
    pinned_xmms: Vec<u8>,
    transient_gprs: Vec<u8>,
    transient_xmms: Vec<u8>,
    dying: Vec<InstId>,
    flags: FlagsState,
}

impl RegAlloc {
    pub fn new<L: Location>(block: &Block<L>) -> Self {
        let mut gprs = [RegSlot::Free; 16];
        for reserved in [RAX, RCX, RSP, MEM_BASE, STATE] {
            gprs[reserved as usize] = RegSlot::Reserved;
        }
        let mut xmms = [RegSlot::Free; 16];
        xmms[XMM_SCRATCH0 as usize] = RegSlot::Reserved;
        xmms[XMM_SCRATCH1 as usize] = RegSlot::Reserved;
        RegAlloc {
            locs: HashMap::new(),
            remaining_uses: block.insts().iter().map(|i| i.use_count()).collect(),
            gprs,
            xmms,
            gpr_lru: [0; 16],
            xmm_lru: [0; 16],
            tick: 0,
            spill_used: [false; SPILL_COUNT],
            pinned_gprs: Vec::new(),
            pinned_xmms: Vec::new(),
            transient_gprs: Vec::new(),
            transient_xmms: Vec::new(),
            dying: Vec::new(),
            flags: FlagsState::Free,
        }
    }

    pub fn is_defined(&self, inst: InstId) -> bool {
        self.locs.contains_key(&inst)
    }

    fn touch_gpr(&mut self, reg: u8) {
        self.tick += 1;
        self.gpr_lru[reg as usize] = self.tick;
    }

    fn touch_xmm(&mut self, reg: u8) {
        self.tick += 1;
        self.xmm_lru[reg as usize] = self.tick;
    }

    fn consume_use(&mut self, id: InstId) {
        let n = &mut self.remaining_uses[id.0 as usize];
        debug_assert!(*n > 0, "use of {id:?} beyond its use count");
        *n -= 1;
        if *n == 0 {
            self.dying.push(id);
        }
    }

    fn free_spill_slot(&mut self) -> Result<u8, EmitError> {
        self.spill_used
            .iter()
            .position(|used| !used)
            .map(|slot| slot as u8)
            .ok_or(EmitError::OutOfSpillSlots)
    }

    /// A free GPR, evicting the least-recently-used unpinned value if none
    /// is free. The returned register is left `Free` for the caller to
    /// claim.
    fn alloc_gpr(&mut self, a: &mut CodeAssembler) -> Result<u8, EmitError> {
        if let Some(&reg) = GPR_ALLOCATION_ORDER
            .iter()
            .find(|&&r| self.gprs[r as usize] == RegSlot::Free)
        {
            return Ok(reg);
        }
        let victim = GPR_ALLOCATION_ORDER
            .iter()
            .copied()
            .filter(|r| {
                matches!(self.gprs[*r as usize], RegSlot::Value(_))
                    && !self.pinned_gprs.contains(r)
            })
            .min_by_key(|r| self.gpr_lru[*r as usize])
            .expect("an unpinned allocatable register always exists");
        let RegSlot::Value(id) = self.gprs[victim as usize] else {
            unreachable!()
        };
        let slot = self.free_spill_slot()?;
        a.mov(qword_ptr(gpr64(STATE) + off_spill(slot as usize)), gpr64(victim))?;
        self.spill_used[slot as usize] = true;
        self.locs.insert(id, HostLoc::Spill(slot));
        self.gprs[victim as usize] = RegSlot::Free;
        Ok(victim)
    }

    fn alloc_xmm(&mut self, a: &mut CodeAssembler) -> Result<u8, EmitError> {
        if let Some(&reg) = XMM_ALLOCATION_ORDER
            .iter()
            .find(|&&r| self.xmms[r as usize] == RegSlot::Free)
        {
            return Ok(reg);
        }
        let victim = XMM_ALLOCATION_ORDER
            .iter()
            .copied()
            .filter(|r| {
                matches!(self.xmms[*r as usize], RegSlot::Value(_))
                    && !self.pinned_xmms.contains(r)
            })
            .min_by_key(|r| self.xmm_lru[*r as usize])
            .expect("an unpinned allocatable vector register always exists");
        let RegSlot::Value(id) = self.xmms[victim as usize] else {
            unreachable!()
        };
        let slot = self.free_spill_slot()?;
        a.movups(
            iced_x86::code_asm::xmmword_ptr(gpr64(STATE) + off_spill(slot as usize)),
            xmm(victim),
        )?;
        self.spill_used[slot as usize] = true;
        self.locs.insert(id, HostLoc::Spill(slot));
        self.xmms[victim as usize] = RegSlot::Free;
        Ok(victim)
    }

    /// A scratch register clobbered by the current IR instruction.
    pub fn scratch_gpr(&mut self, a: &mut CodeAssembler) -> Result<u8, EmitError> {
        let reg = self.alloc_gpr(a)?;
        self.gprs[reg as usize] = RegSlot::Transient;
        self.transient_gprs.push(reg);
        self.pinned_gprs.push(reg);
        self.touch_gpr(reg);
        Ok(reg)
    }

    pub fn scratch_xmm(&mut self, a: &mut CodeAssembler) -> Result<u8, EmitError> {
        let reg = self.alloc_xmm(a)?;
        self.xmms[reg as usize] = RegSlot::Transient;
        self.transient_xmms.push(reg);
        self.pinned_xmms.push(reg);
        self.touch_xmm(reg);
        Ok(reg)
    }

    fn load_imm_gpr(&mut self, a: &mut CodeAssembler, reg: u8, v: Value) -> Result<(), EmitError> {
        let bits = v
            .immediate_bits()
            .expect("only integer immediates are materialized in GPRs");
        debug_assert!(bits <= u64::MAX as u128);
        let bits = bits as u64;
        if bits > u32::MAX as u64 {
            a.mov(gpr64(reg), bits)?;
        } else {
            // A 32-bit destination zero-extends, keeping the invariant
            // that GPR-resident values are zero-extended to 64 bits.
            a.mov(gpr32(reg), bits as u32)?;
        }
        Ok(())
    }

    fn ensure_in_gpr(&mut self, a: &mut CodeAssembler, id: InstId) -> Result<u8, EmitError> {
        match self.locs.get(&id).copied() {
            Some(HostLoc::Gpr(reg)) => Ok(reg),
            Some(HostLoc::Spill(slot)) => {
                let reg = self.alloc_gpr(a)?;
                a.mov(gpr64(reg), qword_ptr(gpr64(STATE) + off_spill(slot as usize)))?;
                self.spill_used[slot as usize] = false;
                self.gprs[reg as usize] = RegSlot::Value(id);
                self.locs.insert(id, HostLoc::Gpr(reg));
                Ok(reg)
            }
            Some(HostLoc::Xmm(_)) => {
                panic!("integer value {id:?} unexpectedly lives in a vector register")
            }
            None => panic!("use of {id:?} before it was defined"),
        }
    }

    fn ensure_in_xmm(&mut self, a: &mut CodeAssembler, id: InstId) -> Result<u8, EmitError> {
        match self.locs.get(&id).copied() {
            Some(HostLoc::Xmm(reg)) => Ok(reg),
            Some(HostLoc::Spill(slot)) => {
                let reg = self.alloc_xmm(a)?;
                a.movups(
                    xmm(reg),
                    iced_x86::code_asm::xmmword_ptr(gpr64(STATE) + off_spill(slot as usize)),
                )?;
                self.spill_used[slot as usize] = false;
                self.xmms[reg as usize] = RegSlot::Value(id);
                self.locs.insert(id, HostLoc::Xmm(reg));
                Ok(reg)
            }
            Some(HostLoc::Gpr(_)) => {
                panic!("vector value {id:?} unexpectedly lives in a GPR")
            }
            None => panic!("use of {id:?} before it was defined"),
        }
    }

    /// The value in a GPR, read-only for the duration of this instruction.
    /// Immediates are materialized into a transient register.
    pub fn use_gpr(&mut self, a: &mut CodeAssembler, v: Value) -> Result<u8, EmitError> {
        match v {
            Value::Ref(id) => {
                let reg = self.ensure_in_gpr(a, id)?;
                self.pinned_gprs.push(reg);
                self.touch_gpr(reg);
                self.consume_use(id);
                Ok(reg)
            }
            imm => {
                let reg = self.scratch_gpr(a)?;
                self.load_imm_gpr(a, reg, imm)?;
                Ok(reg)
            }
        }
    }

    /// The value in a GPR the caller may clobber: if the value has later
    /// uses it is first copied aside, otherwise its own register is handed
    /// over.
    pub fn use_scratch_gpr(&mut self, a: &mut CodeAssembler, v: Value) -> Result<u8, EmitError> {
        match v {
            Value::Ref(id) => {
                let reg = self.ensure_in_gpr(a, id)?;
                self.consume_use(id);
                if self.remaining_uses[id.0 as usize] == 0 {
                    // Hand over the register; the value is gone after this
                    // instruction anyway.
                    self.locs.remove(&id);
                    self.dying.retain(|d| *d != id);
                    self.gprs[reg as usize] = RegSlot::Transient;
                    self.transient_gprs.push(reg);
                    self.pinned_gprs.push(reg);
                    self.touch_gpr(reg);
                    Ok(reg)
                } else {
                    self.pinned_gprs.push(reg);
                    let copy = self.scratch_gpr(a)?;
                    a.mov(gpr64(copy), gpr64(reg))?;
                    Ok(copy)
                }
            }
            imm => {
                let reg = self.scratch_gpr(a)?;
                self.load_imm_gpr(a, reg, imm)?;
                Ok(reg)
            }
        }
    }

    pub fn use_xmm(
        &mut self,
        a: &mut CodeAssembler,
        pool: &mut ConstantPool,
        v: Value,
    ) -> Result<u8, EmitError> {
        match v {
            Value::Ref(id) => {
                let reg = self.ensure_in_xmm(a, id)?;
                self.pinned_xmms.push(reg);
                self.touch_xmm(reg);
                self.consume_use(id);
                Ok(reg)
            }
            Value::ImmU128(bits) => {
                let reg = self.scratch_xmm(a)?;
                let addr = pool.constant(bits as u64, (bits >> 64) as u64)?;
                a.mov(gpr64(SCRATCH0), addr)?;
                a.movups(xmm(reg), iced_x86::code_asm::xmmword_ptr(gpr64(SCRATCH0)))?;
                Ok(reg)
            }
            other => panic!("cannot place {other:?} in a vector register"),
        }
    }

    pub fn use_scratch_xmm(
        &mut self,
        a: &mut CodeAssembler,
        pool: &mut ConstantPool,
        v: Value,
    ) -> Result<u8, EmitError> {
        match v {
            Value::Ref(id) => {
                let reg = self.ensure_in_xmm(a, id)?;
                self.consume_use(id);
                if self.remaining_uses[id.0 as usize] == 0 {
                    self.locs.remove(&id);
                    self.dying.retain(|d| *d != id);
                    self.xmms[reg as usize] = RegSlot::Transient;
                    self.transient_xmms.push(reg);
                    self.pinned_xmms.push(reg);
                    self.touch_xmm(reg);
                    Ok(reg)
                } else {
                    self.pinned_xmms.push(reg);
                    let copy = self.scratch_xmm(a)?;
                    a.movaps(xmm(copy), xmm(reg))?;
                    Ok(copy)
                }
            }
            imm => self.use_xmm(a, pool, imm),
        }
    }

    /// Declare where the result of `inst` lives. The register may be one
    /// handed out by `scratch_*`/`use_scratch_*` during this instruction.
    pub fn define_gpr(&mut self, inst: InstId, reg: u8) {
        self.transient_gprs.retain(|r| *r != reg);
        self.gprs[reg as usize] = RegSlot::Value(inst);
        self.locs.insert(inst, HostLoc::Gpr(reg));
        self.touch_gpr(reg);
        if self.remaining_uses[inst.0 as usize] == 0 {
            self.dying.push(inst);
        }
    }

    pub fn define_xmm(&mut self, inst: InstId, reg: u8) {
        self.transient_xmms.retain(|r| *r != reg);
        self.xmms[reg as usize] = RegSlot::Value(inst);
        self.locs.insert(inst, HostLoc::Xmm(reg));
        self.touch_xmm(reg);
        if self.remaining_uses[inst.0 as usize] == 0 {
            self.dying.push(inst);
        }
    }

    /// Close out one IR instruction: transient registers return to the
    /// pool and values whose last use was consumed release their homes.
    pub fn end_of_inst(&mut self) {
        for reg in self.transient_gprs.drain(..) {
            if self.gprs[reg as usize] == RegSlot::Transient {
                self.gprs[reg as usize] = RegSlot::Free;
            }
        }
        for reg in self.transient_xmms.drain(..) {
            if self.xmms[reg as usize] == RegSlot::Transient {
                self.xmms[reg as usize] = RegSlot::Free;
            }
        }
        for id in std::mem::take(&mut self.dying) {
            if let Some(loc) = self.locs.remove(&id) {
                match loc {
                    HostLoc::Gpr(r) => {
                        if self.gprs[r as usize] == RegSlot::Value(id) {
                            self.gprs[r as usize] = RegSlot::Free;
                        }
                    }
                    HostLoc::Xmm(r) => {
                        if self.xmms[r as usize] == RegSlot::Value(id) {
                            self.xmms[r as usize] = RegSlot::Free;
                        }
                    }
                    HostLoc::Spill(s) => self.spill_used[s as usize] = false,
                }
            }
        }
        self.pinned_gprs.clear();
        self.pinned_xmms.clear();
    }

    /// Mark the host flags as holding the NZCV of the instruction just
    /// emitted, with `pending` the flag-extraction consumers still to be
    /// materialized.
    pub fn set_flags_live(&mut self, producer: InstId, sub_family: bool, pending: Vec<InstId>) {
        debug_assert!(matches!(self.flags, FlagsState::Free), "flags already live");
        if !pending.is_empty() {
            self.flags = FlagsState::Live {
                producer,
                sub_family,
                pending,
            };
        }
    }

    /// Materialize every pending flag consumer to a GPR, freeing the host
    /// flags for the next instruction that writes them. Must run before
    /// any flag-clobbering emission while
    /// flags are live; spill/fill `mov`s are safe because they leave the
    /// flags untouched.
    pub fn spill_flags(
        &mut self,
        a: &mut CodeAssembler,
        block_opcodes: &dyn Fn(InstId) -> Opcode,
    ) -> Result<(), EmitError> {
        let FlagsState::Live {
            producer,
            sub_family,
            pending,
        } = std::mem::replace(&mut self.flags, FlagsState::Free)
        else {
            return Ok(());
        };
        if sub_family {
            // x86 subtraction leaves a borrow; ARM's carry is its
            // complement.
            a.cmc()?;
        }
        for inst in pending {
            // The consumer's edge to its producer is consumed here, where
            // the flags it reads are realized.
            self.consume_use(producer);
            match block_opcodes(inst) {
                Opcode::GetCarryFromOp => {
                    let reg = self.alloc_gpr(a)?;
                    a.setc(gpr8(reg))?;
                    a.movzx(gpr32(reg), gpr8(reg))?;
                    self.define_gpr(inst, reg);
                }
                Opcode::GetOverflowFromOp => {
                    let reg = self.alloc_gpr(a)?;
                    a.seto(gpr8(reg))?;
                    a.movzx(gpr32(reg), gpr8(reg))?;
                    self.define_gpr(inst, reg);
                }
                Opcode::GetNZCVFromOp => {
                    let reg = self.alloc_gpr(a)?;
                    // rflags → ARM NZCV packing: SF(7)→N(31), ZF(6)→Z(30),
                    // CF(0)→C(29), OF(11)→V(28).
                    a.pushfq()?;
                    a.pop(gpr64(SCRATCH0))?;
                    a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
                    a.shr(gpr32(SCRATCH1), 7)?;
                    a.and(gpr32(SCRATCH1), 1)?;
                    a.shl(gpr32(SCRATCH1), 31)?;
                    a.mov(gpr32(reg), gpr32(SCRATCH1))?;
                    a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
                    a.shr(gpr32(SCRATCH1), 6)?;
                    a.and(gpr32(SCRATCH1), 1)?;
                    a.shl(gpr32(SCRATCH1), 30)?;
                    a.or(gpr32(reg), gpr32(SCRATCH1))?;
                    a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
                    a.and(gpr32(SCRATCH1), 1)?;
                    a.shl(gpr32(SCRATCH1), 29)?;
                    a.or(gpr32(reg), gpr32(SCRATCH1))?;
                    a.shr(gpr32(SCRATCH0), 11)?;
                    a.and(gpr32(SCRATCH0), 1)?;
                    a.shl(gpr32(SCRATCH0), 28)?;
                    a.or(gpr32(reg), gpr32(SCRATCH0))?;
                    self.define_gpr(inst, reg);
                }
                other => unreachable!("{other:?} is not a flag-extraction opcode"),
            }
        }
        Ok(())
    }

    /// An ABI-compliant call to a host function: spills
    /// every live value out of caller-saved registers, marshals the
    /// arguments, switches to the host's MXCSR for the duration of the
    /// call, and leaves the return value in RAX for `take_call_result`.
    pub fn host_call(
        &mut self,
        a: &mut CodeAssembler,
        fn_addr: usize,
        args: &[CallArg],
    ) -> Result<(), EmitError> {
        debug_assert!(args.len() <= ABI_ARGS.len());
        debug_assert!(
            self.transient_gprs.is_empty() && self.transient_xmms.is_empty(),
            "host_call with live transient registers"
        );
        // Evacuate caller-saved homes: after this, every live value is in
        // a spill slot or a callee-saved GPR, so argument marshalling
        // cannot clobber another pending argument.
        for reg in GPR_ALLOCATION_ORDER {
            if let RegSlot::Value(id) = self.gprs[reg as usize] {
                if hostloc::is_caller_saved_gpr(reg) {
                    let slot = self.free_spill_slot()?;
                    a.mov(qword_ptr(gpr64(STATE) + off_spill(slot as usize)), gpr64(reg))?;
                    self.spill_used[slot as usize] = true;
                    self.locs.insert(id, HostLoc::Spill(slot));
                    self.gprs[reg as usize] = RegSlot::Free;
                }
            }
        }
        for reg in XMM_ALLOCATION_ORDER {
            if let RegSlot::Value(id) = self.xmms[reg as usize] {
                let slot = self.free_spill_slot()?;
                a.movups(
                    iced_x86::code_asm::xmmword_ptr(gpr64(STATE) + off_spill(slot as usize)),
                    xmm(reg),
                )?;
                self.spill_used[slot as usize] = true;
                self.locs.insert(id, HostLoc::Spill(slot));
                self.xmms[reg as usize] = RegSlot::Free;
            }
        }
        for (i, arg) in args.iter().enumerate() {
            let dst = ABI_ARGS[i];
            match arg {
                CallArg::Imm64(v) => {
                    a.mov(gpr64(dst), *v)?;
                }
                CallArg::Imm32(v) => {
                    a.mov(gpr32(dst), *v)?;
                }
                CallArg::Value(Value::Ref(id)) => {
                    match self.locs.get(id).copied() {
                        Some(HostLoc::Spill(slot)) => {
                            a.mov(
                                gpr64(dst),
                                qword_ptr(gpr64(STATE) + off_spill(slot as usize)),
                            )?;
                        }
                        Some(HostLoc::Gpr(src)) => {
                            a.mov(gpr64(dst), gpr64(src))?;
                        }
                        Some(HostLoc::Xmm(_)) | None => {
                            panic!("host-call argument {id:?} has no integer home")
                        }
                    }
                    self.consume_use(*id);
                }
                CallArg::Value(imm) => {
                    let bits = imm
                        .immediate_bits()
                        .expect("host-call immediates are integers") as u64;
                    if bits > u32::MAX as u64 {
                        a.mov(gpr64(dst), bits)?;
                    } else {
                        a.mov(gpr32(dst), bits as u32)?;
                    }
                }
            }
        }
        // Host code runs under the host's FP environment.
        a.ldmxcsr(iced_x86::code_asm::dword_ptr(
            gpr64(STATE) + abi::OFF_SAVE_HOST_MXCSR,
        ))?;
        a.mov(gpr64(RAX), fn_addr as u64)?;
        a.call(gpr64(RAX))?;
        a.ldmxcsr(iced_x86::code_asm::dword_ptr(
            gpr64(STATE) + abi::OFF_GUEST_MXCSR,
        ))?;
        Ok(())
    }

    /// Bind the RAX return value of the preceding `host_call` to `inst`.
    pub fn take_call_result(
        &mut self,
        a: &mut CodeAssembler,
        inst: InstId,
    ) -> Result<u8, EmitError> {
        let reg = self.alloc_gpr(a)?;
        a.mov(gpr64(reg), gpr64(RAX))?;
        self.define_gpr(inst, reg);
        Ok(reg)
    }

    /// Post-block invariant: every value's liveness ended inside the
    /// block, so nothing may still occupy a register or spill slot.
    pub fn assert_empty(&self) {
        debug_assert!(
            self.locs.is_empty(),
            "values outlive the block: {:?}",
            self.locs
        );
        debug_assert!(self.spill_used.iter().all(|u| !u));
    }

    /// The spec's `GetArgumentInfo`: argument descriptors for one
    /// instruction. With `Value` carrying its immediate-ness intrinsically
    /// this is a lookup, not a computation.
    pub fn argument_info<L: Location>(block: &Block<L>, inst: InstId) -> Vec<Value> {
        block.inst(inst).args.clone()
    }
}
