/// A32/Thumb general-purpose register, R0..R15 (R13=SP, R14=LR, R15=PC by
/// convention but addressed uniformly here; the translator special-cases
/// writes to R15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum A32Reg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl A32Reg {
    pub const COUNT: usize = 16;

    pub const fn from_index(i: u8) -> A32Reg {
        match i {
            0 => A32Reg::R0,
            1 => A32Reg::R1,
            2 => A32Reg::R2,
            3 => A32Reg::R3,
            4 => A32Reg::R4,
            5 => A32Reg::R5,
            6 => A32Reg::R6,
            7 => A32Reg::R7,
            8 => A32Reg::R8,
            9 => A32Reg::R9,
            10 => A32Reg::R10,
            11 => A32Reg::R11,
            12 => A32Reg::R12,
            13 => A32Reg::Sp,
            14 => A32Reg::Lr,
            15 => A32Reg::Pc,
            _ => panic!("A32 register index out of range"),
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A32 extension register file, addressed as 64 single-precision lanes
/// (S0..S63) or paired up as double-precision (D0..D31); A32 has no true
/// vector registers, so the IR always deals in these lane indices directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct A32ExtReg {
    /// Index of the 32-bit lane within the 2048-bit extension register file.
    pub single_index: u8,
}

impl A32ExtReg {
    pub const COUNT: usize = 64;

    pub const fn single(index: u8) -> A32ExtReg {
        debug_assert!((index as usize) < Self::COUNT);
        A32ExtReg {
            single_index: index,
        }
    }

    pub const fn double(index: u8) -> A32ExtReg {
        debug_assert!((index as usize) * 2 < Self::COUNT);
        A32ExtReg {
            single_index: index * 2,
        }
    }
}

/// A64 general-purpose register, X0..X30 plus XZR (the wired-zero register,
/// never a location the allocator materializes) and SP (banked separately
/// from X31 in the architecture, modeled the same way here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum A64Reg {
    X(u8),
    Xzr,
    Sp,
}

impl A64Reg {
    pub const fn from_index(i: u8) -> A64Reg {
        if i == 31 {
            A64Reg::Xzr
        } else {
            debug_assert!(i < 31);
            A64Reg::X(i)
        }
    }
}

/// A64 vector register, V0..V31, 128 bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct A64Vec(pub u8);

impl A64Vec {
    pub const COUNT: usize = 32;
}
