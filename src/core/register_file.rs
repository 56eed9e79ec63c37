//! Physical registers and register occupancy tracking.
//!
//! This module defines the target's general-purpose register names, a bit set over them, and the
//! RegisterFile the colorer uses to track which variable currently owns which register while it
//! walks a block. Allocation is "lowest free register at or above a floor", matching how argument
//! and call-clobbered registers are handled by the calling convention.

use crate::ir::VarId;
use std::fmt;

/// Number of architectural core registers (r0..r12, sp, lr, pc).
pub const NUM_CORE_REGISTERS: usize = 16;

/// A physical core register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);
    pub const R4: Reg = Reg(4);
    pub const R5: Reg = Reg(5);
    pub const R6: Reg = Reg(6);
    pub const R7: Reg = Reg(7);
    pub const R8: Reg = Reg(8);
    pub const R9: Reg = Reg(9);
    pub const R10: Reg = Reg(10);
    pub const R11: Reg = Reg(11);
    pub const R12: Reg = Reg(12);
    pub const SP: Reg = Reg(13);
    pub const LR: Reg = Reg(14);
    pub const PC: Reg = Reg(15);

    /// Register with the given number, if it exists.
    pub const fn from_index(index: usize) -> Option<Reg> {
        if index < NUM_CORE_REGISTERS {
            Some(Reg(index as u8))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Assembler spelling of the register.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; NUM_CORE_REGISTERS] = [
            "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp",
            "lr", "pc",
        ];
        NAMES[self.index()]
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set for tracking register sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegBitSet {
    bits: u16,
}

impl RegBitSet {
    /// Create empty register set.
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Registers r0..r{count-1}.
    pub fn first_n(count: usize) -> Self {
        let count = count.min(NUM_CORE_REGISTERS);
        Self {
            bits: ((1u32 << count) - 1) as u16,
        }
    }

    pub fn from_regs<I: IntoIterator<Item = Reg>>(regs: I) -> Self {
        let mut set = Self::new();
        for reg in regs {
            set.set(reg);
        }
        set
    }

    pub fn contains(&self, reg: Reg) -> bool {
        self.bits & (1 << reg.0) != 0
    }

    pub fn set(&mut self, reg: Reg) {
        self.bits |= 1 << reg.0;
    }

    pub fn clear(&mut self, reg: Reg) {
        self.bits &= !(1 << reg.0);
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        self.bits |= other.bits;
    }

    /// Remove every register of another set.
    pub fn subtract(&mut self, other: &RegBitSet) {
        self.bits &= !other.bits;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Lowest register in the set that is numbered `floor` or higher.
    pub fn first_at_or_above(&self, floor: Reg) -> Option<Reg> {
        let masked = self.bits & !((1u32 << floor.0) - 1) as u16;
        if masked == 0 {
            None
        } else {
            Some(Reg(masked.trailing_zeros() as u8))
        }
    }

    /// Registers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Reg> + '_ {
        let bits = self.bits;
        (0..NUM_CORE_REGISTERS as u8)
            .filter(move |i| bits & (1 << i) != 0)
            .map(Reg)
    }

    pub fn clear_all(&mut self) {
        self.bits = 0;
    }
}

/// RegisterFile tracks which variable owns each allocatable register.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Registers available for allocation.
    allocatable: RegBitSet,
    /// Currently occupied registers.
    used: RegBitSet,
    /// Owner of each occupied register.
    owners: [Option<VarId>; NUM_CORE_REGISTERS],
}

impl RegisterFile {
    /// Register file whose allocatable set is r0..r{num_registers-1}.
    pub fn new(num_registers: usize) -> Self {
        Self {
            allocatable: RegBitSet::first_n(num_registers),
            used: RegBitSet::new(),
            owners: [None; NUM_CORE_REGISTERS],
        }
    }

    pub fn is_free(&self, reg: Reg) -> bool {
        self.allocatable.contains(reg) && !self.used.contains(reg)
    }

    pub fn owner(&self, reg: Reg) -> Option<VarId> {
        self.owners[reg.index()]
    }

    pub fn used(&self) -> RegBitSet {
        self.used
    }

    /// Mark `reg` as owned by `var`. Returns false if it was already occupied.
    pub fn assign(&mut self, reg: Reg, var: VarId) -> bool {
        if self.used.contains(reg) {
            return false;
        }
        self.used.set(reg);
        self.owners[reg.index()] = Some(var);
        true
    }

    /// Take the lowest free register numbered `floor` or higher.
    pub fn allocate_from(&mut self, floor: Reg, var: VarId) -> Option<Reg> {
        let mut free = self.allocatable;
        free.subtract(&self.used);
        let reg = free.first_at_or_above(floor)?;
        self.assign(reg, var);
        Some(reg)
    }

    pub fn free(&mut self, reg: Reg) {
        self.used.clear(reg);
        self.owners[reg.index()] = None;
    }

    /// Forget every assignment, e.g. across a call that clobbers all registers.
    pub fn clear_all(&mut self) {
        self.used.clear_all();
        self.owners = [None; NUM_CORE_REGISTERS];
    }
}
