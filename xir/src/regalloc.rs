//! Live-range analysis and target-register assignment (§4.2.7).
//!
//! The reference this would normally be grounded on (`livevar.c`'s
//! `live_range_calculate`) reads `it` before ever assigning it a
//! starting value, mixes up a `struct live_range *current[]` array of
//! pointers with direct field access (`current[reg].end`), and tracks
//! fields (`offset`, `length`, `writeback`) that don't exist on the
//! `struct live_range` it's declared against in `xiropt.h` (`def`,
//! `def_offset`, `range_end`, `use_length`, `visible_length`). None of
//! this compiles as written, so (as with the flagged `livevar.c` bug
//! elsewhere) it's treated as specification-only: this module follows
//! the prose in `xiropt.h`'s doc comment and `regalloc.c`'s "3
//! categories of target register" comment instead of porting the C.

use arrayvec::ArrayVec;

use crate::ir::{BasicBlock, OpId};
use crate::opcode::OpMode;

/// One value's live range within a block (`xiropt.h`'s `struct
/// live_range`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    /// The register this range tracks.
    pub register: u32,
    /// The op that defined this value.
    pub def: OpId,
    /// `def`'s position, counted in ops from the start of the range
    /// the caller analyzed.
    pub def_offset: i32,
    /// The last op that read this value.
    pub last_use: OpId,
    /// Distance from `def_offset` to `last_use`'s position.
    pub use_length: i32,
    /// How long (in ops, from `def_offset`) the value stays externally
    /// observable: `-1` if still live when the analyzed range ends,
    /// `0` if it's never visible (overwritten before any exception
    /// could expose it), otherwise a value `>= use_length` giving the
    /// point by which it's provably dead.
    pub visible_length: i32,
}

struct OpenRange {
    register: u32,
    def: OpId,
    def_offset: i32,
    last_use: OpId,
    use_length: i32,
}

/// Walk `start..=end` (or to the end of the chain if `end` is `None`)
/// computing a live range for every value defined or read, in the
/// order closed.
///
/// A register's range closes (and a new one opens) on every write:
/// if no op with an exception edge has executed since the range
/// opened, the old value was never visible outside the block, so
/// `visible_length` is `0`; otherwise it may have been exposed up to
/// its last real use, so `visible_length` is `use_length`. Whatever's
/// still open when the walk ends gets `visible_length = -1` (live at
/// exit, must be written back unconditionally).
pub fn compute_live_ranges(bb: &BasicBlock, start: OpId, end: Option<OpId>) -> Vec<LiveRange> {
    // Sized to cover both source registers and the temporaries
    // `promote::promote_source_registers` rewrites them into, since
    // this runs after that pass in the intended pipeline.
    let mut open: Vec<Option<OpenRange>> = (0..=crate::MAX_TEMP_REGISTER).map(|_| None).collect();
    let mut closed = Vec::new();
    let mut last_exc: i32 = -1;

    let mut position: i32 = 0;
    let mut cur = Some(start);
    while let Some(id) = cur {
        let op = bb.op(id);
        if op.exc.is_some() {
            last_exc = position;
        }
        let mode = op.opcode.info().mode;

        for (slot, reads, writes) in [
            (0usize, mode.contains(OpMode::READS_OP1), mode.contains(OpMode::WRITES_OP1)),
            (1usize, mode.contains(OpMode::READS_OP2), mode.contains(OpMode::WRITES_OP2)),
        ] {
            let Some(r) = bb.op(id).operand[slot].register() else { continue };

            if reads {
                match &mut open[r as usize] {
                    Some(range) => {
                        range.last_use = id;
                        range.use_length = position - range.def_offset;
                    }
                    None => {
                        open[r as usize] = Some(OpenRange { register: r, def: id, def_offset: position, last_use: id, use_length: 0 });
                    }
                }
            }

            if writes {
                if let Some(prev) = open[r as usize].take() {
                    // If nothing with an exception edge ran since this
                    // value was defined, it was never externally
                    // visible, so it's dead the moment it's
                    // overwritten. Otherwise a handler may have
                    // observed it through the home register file up to
                    // the last such point, so the range needs to stay
                    // coherent (and a writeback emitted) at least that
                    // long, even past its last real use.
                    let visible_length = if last_exc > prev.def_offset { prev.use_length.max(last_exc - prev.def_offset) } else { 0 };
                    closed.push(LiveRange {
                        register: prev.register,
                        def: prev.def,
                        def_offset: prev.def_offset,
                        last_use: prev.last_use,
                        use_length: prev.use_length,
                        visible_length,
                    });
                }
                open[r as usize] = Some(OpenRange { register: r, def: id, def_offset: position, last_use: id, use_length: 0 });
            }
        }

        if Some(id) == end {
            break;
        }
        cur = bb.op(id).next;
        position += 1;
    }

    for range in open.into_iter().flatten() {
        closed.push(LiveRange {
            register: range.register,
            def: range.def,
            def_offset: range.def_offset,
            last_use: range.last_use,
            use_length: range.use_length,
            visible_length: -1,
        });
    }
    closed.sort_by_key(|r| r.def_offset);
    closed
}

/// The 3 categories of target register a range can be assigned to
/// (`regalloc.c`'s header comment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    /// A fixed call-argument register: assigned first to ranges that
    /// feed a call argument at their definition point.
    Argument,
    /// Caller-saved: cheap, but clobbered across a call.
    Volatile,
    /// Callee-saved: always safe to hold a value across a call, at
    /// the cost of one spill/reload pair in the prologue/epilogue.
    NonVolatile,
}

/// Every pool a real target's register file has ever needed here: x86-64
/// tops out at 4 non-volatile general-purpose registers.
const MAX_CLASS_REGISTERS: usize = 8;

/// A target's available registers, grouped by class, in preference
/// order within each class. Each pool is small and fixed at target-setup
/// time, so it's an [`ArrayVec`] rather than a heap-allocated `Vec`.
#[derive(Debug, Clone)]
pub struct RegisterSet {
    /// Fixed argument registers, in argument-position order.
    pub argument: ArrayVec<u32, MAX_CLASS_REGISTERS>,
    /// Volatile (caller-saved) general-purpose registers.
    pub volatile: ArrayVec<u32, MAX_CLASS_REGISTERS>,
    /// Non-volatile (callee-saved) general-purpose registers.
    pub non_volatile: ArrayVec<u32, MAX_CLASS_REGISTERS>,
}

/// x86 (32-bit): `EAX`/`EDX` argument, `ECX` volatile, `ESI`/`EDI`/
/// `EBX` non-volatile. `ESP`/`EBP` are always reserved.
pub fn x86_32_register_set() -> RegisterSet {
    use crate::target::x86::{REG_EAX, REG_EBX, REG_ECX, REG_EDI, REG_EDX, REG_ESI};
    RegisterSet {
        argument: ArrayVec::from_iter([REG_EAX, REG_EDX]),
        volatile: ArrayVec::from_iter([REG_ECX]),
        non_volatile: ArrayVec::from_iter([REG_ESI, REG_EDI, REG_EBX]),
    }
}

/// x86-64: `EDI`/`ESI` argument, `EBX`+`R8..R11` volatile, `R12..R15`
/// non-volatile. `RSP`/`RBP` are always reserved.
///
/// `xir`'s register operands are plain `u32`s; this crate doesn't
/// encode a separate x86-64 target, so `R8..R15` are numbered `8..16`
/// following the native encoding the reference's comment assumes.
pub fn x86_64_register_set() -> RegisterSet {
    use crate::target::x86::{REG_EBX, REG_EDI, REG_ESI};
    RegisterSet {
        argument: ArrayVec::from_iter([REG_EDI, REG_ESI]),
        volatile: ArrayVec::from_iter([REG_EBX, 8, 9, 10, 11]),
        non_volatile: ArrayVec::from_iter([12, 13, 14, 15]),
    }
}

/// One range's assigned target register, or `None` if every register
/// in its class (and the classes it's allowed to fall back to) was
/// already busy for its whole live interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// The range being assigned.
    pub register: u32,
    /// The def/use interval, carried through from the [`LiveRange`].
    pub def_offset: i32,
    /// The target register assigned, if any.
    pub target: Option<u32>,
    /// Which class it was drawn from.
    pub class: Option<RegisterClass>,
}

struct PoolEntry {
    reg: u32,
    busy_until: i32,
}

fn assign_from_pool(pool: &mut [PoolEntry], range: &LiveRange) -> Option<u32> {
    let end = if range.visible_length < 0 { i32::MAX } else { range.def_offset + range.use_length };
    for entry in pool.iter_mut() {
        if entry.busy_until < range.def_offset {
            entry.busy_until = end;
            return Some(entry.reg);
        }
    }
    None
}

/// Assign a target register to each range, linear-scan style: a range
/// whose `def` is a call-argument slot prefers an argument register,
/// a range whose interval doesn't outlive the next call (`is_volatile`
/// returns `true`) prefers a volatile register, and everything else
/// goes to non-volatile. Each class falls back to the next when its
/// own pool is exhausted, since an argument or volatile register still
/// holds the value correctly once the call that wanted it there has
/// happened.
pub fn assign_registers(ranges: &[LiveRange], regs: &RegisterSet, is_argument: impl Fn(&LiveRange) -> bool, is_volatile: impl Fn(&LiveRange) -> bool) -> Vec<Assignment> {
    let mut argument_pool: Vec<PoolEntry> = regs.argument.iter().map(|&reg| PoolEntry { reg, busy_until: -1 }).collect();
    let mut volatile_pool: Vec<PoolEntry> = regs.volatile.iter().map(|&reg| PoolEntry { reg, busy_until: -1 }).collect();
    let mut non_volatile_pool: Vec<PoolEntry> = regs.non_volatile.iter().map(|&reg| PoolEntry { reg, busy_until: -1 }).collect();

    ranges
        .iter()
        .map(|range| {
            if is_argument(range) {
                if let Some(target) = assign_from_pool(&mut argument_pool, range) {
                    return Assignment { register: range.register, def_offset: range.def_offset, target: Some(target), class: Some(RegisterClass::Argument) };
                }
            }
            if is_argument(range) || is_volatile(range) {
                if let Some(target) = assign_from_pool(&mut volatile_pool, range) {
                    return Assignment { register: range.register, def_offset: range.def_offset, target: Some(target), class: Some(RegisterClass::Volatile) };
                }
            }
            if let Some(target) = assign_from_pool(&mut non_volatile_pool, range) {
                return Assignment { register: range.register, def_offset: range.def_offset, target: Some(target), class: Some(RegisterClass::NonVolatile) };
            }
            Assignment { register: range.register, def_offset: range.def_offset, target: None, class: None }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BasicBlock;
    use crate::opcode::Opcode;
    use crate::operand::Operand;

    #[test]
    fn read_then_write_closes_range_as_coherent_without_exception() {
        let mut bb = BasicBlock::new();
        let mov = bb.append_op2(Opcode::Mov, Operand::SourceReg(4), Operand::SourceReg(4));
        bb.append_op0(Opcode::Nop);
        let ranges = compute_live_ranges(&bb, mov, None);
        let reg4: Vec<_> = ranges.iter().filter(|r| r.register == 4).collect();
        assert_eq!(reg4.len(), 2);
        assert_eq!(reg4[0].visible_length, 0);
        assert_eq!(reg4[1].visible_length, -1);
    }

    #[test]
    fn exception_after_def_forces_visible_range_past_overwrite() {
        let mut bb = BasicBlock::new();
        let def = bb.append_op2(Opcode::Mov, Operand::IntImm(1), Operand::SourceReg(5));
        let raising = bb.append_op2(Opcode::LoadL, Operand::SourceReg(2), Operand::SourceReg(6));
        bb.op_mut(raising).exc = Some(def);
        bb.append_op2(Opcode::Mov, Operand::IntImm(0), Operand::SourceReg(5));
        bb.append_op0(Opcode::Nop);

        let ranges = compute_live_ranges(&bb, def, None);
        let reg5_first = ranges.iter().find(|r| r.register == 5 && r.def == def).unwrap();
        assert!(reg5_first.visible_length > reg5_first.use_length);
    }

    #[test]
    fn no_exception_since_def_is_dead_on_overwrite() {
        let mut bb = BasicBlock::new();
        let def = bb.append_op2(Opcode::Mov, Operand::IntImm(1), Operand::SourceReg(5));
        bb.append_op2(Opcode::Mov, Operand::IntImm(0), Operand::SourceReg(5));
        bb.append_op0(Opcode::Nop);

        let ranges = compute_live_ranges(&bb, def, None);
        let reg5_first = ranges.iter().find(|r| r.register == 5 && r.def == def).unwrap();
        assert_eq!(reg5_first.visible_length, 0);
    }

    #[test]
    fn still_open_at_end_is_live_at_exit() {
        let mut bb = BasicBlock::new();
        let mov = bb.append_op2(Opcode::Mov, Operand::IntImm(1), Operand::SourceReg(9));
        let ranges = compute_live_ranges(&bb, mov, None);
        let range = ranges.iter().find(|r| r.register == 9).unwrap();
        assert_eq!(range.visible_length, -1);
    }

    #[test]
    fn argument_ranges_prefer_argument_registers() {
        let mut bb = BasicBlock::new();
        let mov = bb.append_op2(Opcode::Mov, Operand::IntImm(0), Operand::SourceReg(1));
        let regs = x86_32_register_set();
        let ranges = vec![LiveRange { register: 1, def: mov, def_offset: 0, last_use: mov, use_length: 0, visible_length: 0 }];
        let assigned = assign_registers(&ranges, &regs, |_| true, |_| false);
        assert_eq!(assigned[0].class, Some(RegisterClass::Argument));
        assert!(regs.argument.contains(&assigned[0].target.unwrap()));
    }

    #[test]
    fn non_overlapping_ranges_share_the_same_register() {
        let mut bb = BasicBlock::new();
        let mov = bb.append_op2(Opcode::Mov, Operand::IntImm(0), Operand::SourceReg(1));
        let regs = x86_32_register_set();
        let a = LiveRange { register: 1, def: mov, def_offset: 0, last_use: mov, use_length: 2, visible_length: 2 };
        let b = LiveRange { register: 2, def: mov, def_offset: 3, last_use: mov, use_length: 1, visible_length: 1 };
        let assigned = assign_registers(&[a, b], &regs, |_| false, |_| true);
        assert_eq!(assigned[0].target, assigned[1].target);
    }

    #[test]
    fn exhausted_pool_falls_back_to_non_volatile() {
        let mut bb = BasicBlock::new();
        let mov = bb.append_op2(Opcode::Mov, Operand::IntImm(0), Operand::SourceReg(1));
        let regs = RegisterSet {
            argument: ArrayVec::new(),
            volatile: ArrayVec::from_iter([100]),
            non_volatile: ArrayVec::from_iter([200]),
        };
        let a = LiveRange { register: 1, def: mov, def_offset: 0, last_use: mov, use_length: 5, visible_length: -1 };
        let b = LiveRange { register: 2, def: mov, def_offset: 1, last_use: mov, use_length: 5, visible_length: -1 };
        let assigned = assign_registers(&[a, b], &regs, |_| false, |_| true);
        assert_eq!(assigned[0].target, Some(100));
        assert_eq!(assigned[1].target, Some(200));
    }
}
