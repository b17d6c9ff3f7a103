//! End-to-end exercises of the pieces `codegen_block` doesn't wire
//! together itself: promotion into temporaries, a hand-driven
//! register assignment over those temporaries, and the x86 memory
//! calling sequence, each carried all the way to emitted bytes.

use xir::fixup::{self, FixupTable};
use xir::ir::{verify, BasicBlock, OpId};
use xir::operand::Operand;
use xir::opcode::Opcode;
use xir::promote::promote_source_registers;
use xir::regalloc::{assign_registers, compute_live_ranges, x86_32_register_set};
use xir::target::x86::{MemFuncOffset, MemFuncTable, X86Target, REG_EAX, REG_ECX};
use xir::target::TargetMachine;

fn mem_funcs() -> MemFuncTable {
    MemFuncTable {
        read_byte: MemFuncOffset(0),
        read_byte_for_write: MemFuncOffset(4),
        read_word: MemFuncOffset(8),
        read_long: MemFuncOffset(12),
        prefetch: MemFuncOffset(16),
        write_byte: MemFuncOffset(20),
        write_word: MemFuncOffset(24),
        write_long: MemFuncOffset(28),
    }
}

fn chain_end(bb: &BasicBlock, start: OpId) -> OpId {
    let mut cur = start;
    while let Some(next) = bb.op(cur).next {
        cur = next;
    }
    cur
}

/// A block expressed entirely in target registers (the shape code is
/// in once promotion and allocation have already run) lowers and emits
/// through the generic [`xir::target::codegen_block`] harness without
/// any further help: an immediate load, a register ALU op and a
/// conditional branch whose offset fixup gets resolved against a real
/// base address.
#[test]
fn codegen_block_emits_alu_and_branch_fixups() {
    let mut bb = BasicBlock::new();
    let start = bb.append_op2(Opcode::Mov, Operand::IntImm(5), Operand::TargetReg(REG_EAX));
    bb.append_op2(Opcode::Add, Operand::TargetReg(REG_ECX), Operand::TargetReg(REG_EAX));
    let branch = bb.append_op2(Opcode::BrCond, Operand::IntImm(0), Operand::IntImm(0));
    bb.op_mut(branch).cond = xir::operand::Cond::Eq;
    let end = chain_end(&bb, start);

    let target = X86Target::new(0x2000, mem_funcs());
    let out = xir::target::codegen_block(&target, &mut bb, start, end, 0x1000);

    assert!(!out.is_empty());
    // mov eax, 5
    assert_eq!(&out[0..1], &[0xB8]);
}

/// A guest-register-level block promotes its (read-only) source
/// register into a temporary — the same shape
/// `promote::tests::read_only_source_gets_no_writeback` checks — and a
/// direct [`assign_registers`] call then gives that temporary's one
/// continuous live range a real x86 register. Applying the assignment
/// by hand turns the comparison into a pure register-form op that
/// encodes on its own.
#[test]
fn promote_then_allocate_assigns_a_register_to_the_promoted_temp() {
    let mut bb = BasicBlock::new();
    let tst = bb.append_op2(Opcode::Tst, Operand::SourceReg(9), Operand::SourceReg(9));
    bb.append_op0(Opcode::Nop);

    promote_source_registers(&mut bb, tst, None);
    let start = bb.begin().unwrap();
    let end = chain_end(&bb, start);
    let temp = bb.op(tst).operand[0].register().unwrap();
    assert!(temp >= xir::MIN_TEMP_REGISTER);

    let ranges = compute_live_ranges(&bb, start, Some(end));
    let temp_ranges: Vec<_> = ranges.iter().filter(|r| r.register == temp).collect();
    // Never rewritten after its initial load, so it's one continuous
    // range, still live at the end of the chain.
    assert_eq!(temp_ranges.len(), 1);
    assert_eq!(temp_ranges[0].visible_length, -1);

    let regs = x86_32_register_set();
    let assignments = assign_registers(&ranges, &regs, |_| false, |_| true);
    let assigned = assignments
        .iter()
        .find(|a| a.register == temp)
        .and_then(|a| a.target)
        .expect("the temp's range should get a register");

    bb.op_mut(tst).operand[0] = Operand::TargetReg(assigned);
    bb.op_mut(tst).operand[1] = Operand::TargetReg(assigned);
    assert!(verify(&bb, tst, Some(tst)).is_ok());

    let target = X86Target::new(0x2000, mem_funcs());
    let mut out = Vec::new();
    let mut fixups = FixupTable::new();
    target.codegen(&bb, tst, tst, &mut out, &mut fixups);
    assert_eq!(out[0], 0x85);
}

/// A branch target resolved through [`fixup::apply_fixups`] patches in
/// the distance past the end of the 6-byte `Jcc rel32` that emitted it,
/// matching the scheme [`xir::fixup`]'s own unit tests check in
/// isolation.
#[test]
fn branch_offset_fixup_resolves_relative_to_instruction_end() {
    let mut bb = BasicBlock::new();
    let branch = bb.append_op2(Opcode::BrCond, Operand::IntImm(64), Operand::IntImm(0));
    bb.op_mut(branch).cond = xir::operand::Cond::Eq;

    let target = X86Target::new(0x2000, mem_funcs());
    let mut out = Vec::new();
    let mut fixups = FixupTable::new();
    target.codegen(&bb, branch, branch, &mut out, &mut fixups);
    assert_eq!(out.len(), 6);

    fixups.iter_mut().next().unwrap().target_offset = Some(64);
    fixup::apply_fixups(&mut out, &fixups, 0x1000);
    let rel = i32::from_le_bytes(out[2..6].try_into().unwrap());
    assert_eq!(rel, 64 - 6);
}
