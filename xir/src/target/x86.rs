//! x86/x86-64 [`TargetMachine`](super::TargetMachine): instruction
//! lowering (§4.2.3) and code emission (§4.2.5) for a representative
//! opcode subset.
//!
//! Lowering and emission assume register allocation has already run:
//! every source-register operand reaching [`X86Target::codegen`] must
//! have been assigned a concrete [`Operand::TargetReg`] — matching the
//! reference's own codegen comment ("assumes the IR is x86-legal, ie
//! doesn't contain any unencodeable instructions"). An operand form
//! codegen doesn't recognize is a logic error upstream, not a runtime
//! condition to recover from, so it panics (the reference's `ILLOP`
//! macro does the same, via `FATAL`).

use crate::fixup::{FixupMode, FixupTable};
use crate::ir::{BasicBlock, OpId};
use crate::opcode::{OpMode, Opcode};
use crate::operand::{Cond, Operand};
use crate::target::TargetMachine;

/// General-purpose x86 register numbers (ModRM encoding order).
pub const REG_EAX: u32 = 0;
pub const REG_ECX: u32 = 1;
pub const REG_EDX: u32 = 2;
pub const REG_EBX: u32 = 3;
pub const REG_ESP: u32 = 4;
pub const REG_EBP: u32 = 5;
pub const REG_ESI: u32 = 6;
pub const REG_EDI: u32 = 7;

/// First argument register (x86: EAX).
pub const REG_ARG1: u32 = REG_EAX;
/// Second argument register (x86: EDX).
pub const REG_ARG2: u32 = REG_EDX;
/// First result register (x86: EAX).
pub const REG_RESULT1: u32 = REG_EAX;

/// x86 (32-bit) target machine: the generic `xir` pipeline's endpoint
/// for a 32-bit host.
pub struct X86Target {
    /// Host address passed as the first argument to every memory
    /// accessor call a lowered `Load*`/`Store*` dispatches through
    /// (the reference's `xbb->address_space`).
    pub address_space: usize,
    /// Dispatch table slots for the lowered memory accessor calls.
    pub mem_funcs: MemFuncTable,
}

impl X86Target {
    /// A target that dispatches memory ops through `address_space`,
    /// calling into `mem_funcs`.
    pub fn new(address_space: usize, mem_funcs: MemFuncTable) -> X86Target {
        X86Target { address_space, mem_funcs }
    }
}

/// Byte offset of a memory accessor function within the address
/// space's dispatch table, passed through to `CallLut` (the
/// reference's `MEM_FUNC_OFFSET`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFuncOffset(pub u32);

/// Dispatch table slots this target knows how to call into. The
/// concrete offsets are a property of the embedding address space, not
/// of `xir` itself, so callers provide them.
#[derive(Debug, Clone, Copy)]
pub struct MemFuncTable {
    /// `read_byte`
    pub read_byte: MemFuncOffset,
    /// `read_byte_for_write`
    pub read_byte_for_write: MemFuncOffset,
    /// `read_word`
    pub read_word: MemFuncOffset,
    /// `read_long`
    pub read_long: MemFuncOffset,
    /// `prefetch`
    pub prefetch: MemFuncOffset,
    /// `write_byte`
    pub write_byte: MemFuncOffset,
    /// `write_word`
    pub write_word: MemFuncOffset,
    /// `write_long`
    pub write_long: MemFuncOffset,
}

fn alu_opcode(op: Opcode) -> Option<(u8, u8)> {
    // (reg-form opcode, /digit for the imm32,reg form via 0x81)
    match op {
        Opcode::Add | Opcode::AddS => Some((0x01, 0)),
        Opcode::Or | Opcode::OrS => Some((0x09, 1)),
        Opcode::And | Opcode::AndS => Some((0x21, 4)),
        Opcode::Sub | Opcode::SubS => Some((0x29, 5)),
        Opcode::Xor | Opcode::XorS => Some((0x31, 6)),
        Opcode::Cmp => Some((0x39, 7)),
        Opcode::Tst => Some((0x85, 0)), // TEST has no immediate-form reuse; digit unused
        _ => None,
    }
}

fn modrm(reg_digit: u32, rm: u32) -> u8 {
    0xC0 | ((reg_digit as u8 & 7) << 3) | (rm as u8 & 7)
}

fn emit_alu(out: &mut Vec<u8>, op: Opcode, src: Operand, dst: Operand) {
    let (reg_op, imm_digit) = alu_opcode(op).unwrap_or_else(|| panic!("x86 codegen: {:?} is not an ALU op", op));
    match (src, dst) {
        (Operand::IntImm(imm), Operand::TargetReg(r)) => {
            out.push(0x81);
            out.push(modrm(imm_digit as u32, r));
            out.extend_from_slice(&imm.to_le_bytes());
        }
        (Operand::TargetReg(s), Operand::TargetReg(d)) => {
            out.push(reg_op);
            out.push(modrm(s, d));
        }
        _ => panic!("x86 codegen: unsupported ALU operand form for {:?}", op),
    }
}

fn cl_shift_opcode(op: Opcode) -> u32 {
    match op {
        Opcode::Sll | Opcode::SllS => 4,
        Opcode::Slr | Opcode::SlrS => 5,
        Opcode::Sar | Opcode::SarS => 7,
        Opcode::Ror | Opcode::RorS => 1,
        Opcode::Rol | Opcode::RolS => 0,
        _ => panic!("x86 codegen: {:?} is not a shift op", op),
    }
}

impl X86Target {
    fn emit_op(&self, bb: &BasicBlock, id: OpId, out: &mut Vec<u8>, fixups: &mut FixupTable) {
        let op = bb.op(id);
        match op.opcode {
            Opcode::Nop | Opcode::Enter | Opcode::Barrier => {}

            Opcode::Mov => match (op.operand[0], op.operand[1]) {
                (Operand::IntImm(imm), Operand::TargetReg(r)) => {
                    out.push(0xB8 + (r as u8 & 7));
                    out.extend_from_slice(&imm.to_le_bytes());
                }
                (Operand::TargetReg(s), Operand::TargetReg(d)) => {
                    out.push(0x89);
                    out.push(modrm(s, d));
                }
                _ => panic!("x86 codegen: unsupported MOV operand form"),
            },

            Opcode::Add | Opcode::AddS | Opcode::Or | Opcode::OrS | Opcode::And | Opcode::AndS
            | Opcode::Sub | Opcode::SubS | Opcode::Xor | Opcode::XorS | Opcode::Cmp | Opcode::Tst => {
                emit_alu(out, op.opcode, op.operand[0], op.operand[1]);
            }

            Opcode::Dec => match op.operand[0] {
                Operand::TargetReg(r) => out.push(0x48 + (r as u8 & 7)),
                _ => panic!("x86 codegen: unsupported DEC operand form"),
            },
            Opcode::Neg => match op.operand[0] {
                Operand::TargetReg(r) => {
                    out.push(0xF7);
                    out.push(modrm(3, r));
                }
                _ => panic!("x86 codegen: unsupported NEG operand form"),
            },
            Opcode::Not => match op.operand[0] {
                Operand::TargetReg(r) => {
                    out.push(0xF7);
                    out.push(modrm(2, r));
                }
                _ => panic!("x86 codegen: unsupported NOT operand form"),
            },

            Opcode::Sll | Opcode::SllS | Opcode::Slr | Opcode::SlrS | Opcode::Sar | Opcode::SarS
            | Opcode::Rol | Opcode::RolS | Opcode::Ror | Opcode::RorS => match (op.operand[0], op.operand[1]) {
                (Operand::TargetReg(REG_ECX), Operand::TargetReg(d)) => {
                    out.push(0xD3);
                    out.push(modrm(cl_shift_opcode(op.opcode), d));
                }
                _ => panic!("x86 codegen: shift count must be in ECX by this point"),
            },

            Opcode::SaveFlags => {
                out.push(0x9C); // pushfd
                if let Operand::TargetReg(r) = op.operand[0] {
                    out.push(0x8F); // pop r/m32
                    out.push(modrm(0, r));
                }
            }
            Opcode::RestFlags => {
                if let Operand::TargetReg(r) = op.operand[0] {
                    out.push(0xFF); // push r/m32
                    out.push(modrm(6, r));
                }
                out.push(0x9D); // popfd
            }

            Opcode::Call0 => {
                out.push(0xE8);
                let site = out.len() as u32;
                out.extend_from_slice(&[0; 4]);
                match op.operand[0] {
                    Operand::IntImm(target) => fixups.add_offset(FixupMode::Rel32, site, target),
                    Operand::PtrImm(p) => fixups.add_pointer(FixupMode::Rel32, site, p as usize),
                    _ => panic!("x86 codegen: unsupported CALL0 operand form"),
                }
            }
            Opcode::CallLut => match (op.operand[0], op.operand[1]) {
                (Operand::TargetReg(base), Operand::IntImm(disp)) => {
                    out.push(0xFF);
                    out.push(0x80 | (2 << 3) | (base as u8 & 7)); // call [reg+disp32], /2
                    out.extend_from_slice(&disp.to_le_bytes());
                }
                _ => panic!("x86 codegen: unsupported CALLLUT operand form"),
            },
            Opcode::Xlat => match (op.operand[0], op.operand[1]) {
                (Operand::PtrImm(base), Operand::TargetReg(r)) => {
                    // mov r, [r*1 + disp32] addressed off the translated table base.
                    out.push(0x8B);
                    out.push(0x04 | ((r as u8 & 7) << 3));
                    out.push(0x05 | ((r as u8 & 7) << 3));
                    let site = out.len() as u32;
                    out.extend_from_slice(&[0; 4]);
                    fixups.add_pointer(FixupMode::Abs32, site, base as usize);
                }
                _ => panic!("x86 codegen: unsupported XLAT operand form"),
            },

            Opcode::Br | Opcode::BrRel => {
                out.push(0xE9);
                let site = out.len() as u32;
                out.extend_from_slice(&[0; 4]);
                match op.operand[0] {
                    Operand::IntImm(target) => fixups.add_offset(FixupMode::Rel32, site, target),
                    _ => panic!("x86 codegen: unsupported BR operand form"),
                }
            }
            Opcode::BrCond => {
                out.push(0x0F);
                out.push(0x80 | jcc_tttn(op.cond));
                let site = out.len() as u32;
                out.extend_from_slice(&[0; 4]);
                match op.operand[0] {
                    Operand::IntImm(target) => fixups.add_offset(FixupMode::Rel32, site, target),
                    _ => panic!("x86 codegen: unsupported BRCOND operand form"),
                }
            }

            other => panic!("x86 codegen: {:?} should have been lowered already", other),
        }
    }
}

fn jcc_tttn(cond: Cond) -> u8 {
    match cond {
        Cond::Ov => 0x0,
        Cond::No => 0x1,
        Cond::Ult => 0x2,
        Cond::Uge => 0x3,
        Cond::Eq => 0x4,
        Cond::Ne => 0x5,
        Cond::Ule => 0x6,
        Cond::Ugt => 0x7,
        Cond::Neg => 0x8,
        Cond::Pos => 0x9,
        Cond::Slt => 0xC,
        Cond::Sge => 0xD,
        Cond::Sle => 0xE,
        Cond::Sgt => 0xF,
        Cond::True => panic!("x86 codegen: BrCond with Cond::True should be an unconditional Br"),
    }
}

impl TargetMachine for X86Target {
    fn name(&self) -> &'static str {
        "x86"
    }

    fn lower(&self, bb: &mut BasicBlock, start: OpId, end: OpId) {
        lower_range(bb, start, end, self.address_space, self.mem_funcs);
    }

    fn code_size(&self, bb: &BasicBlock, start: OpId, end: OpId) -> usize {
        // A conservative per-op upper bound (longest forms above run
        // ~8 bytes); the reference's equivalent just returns -1; the
        // caller's `Vec` grows past this if it's ever wrong, so this
        // only affects how many reallocations emission causes.
        let mut count = 0usize;
        let mut cur = Some(start);
        while let Some(id) = cur {
            count += 1;
            if id == end {
                break;
            }
            cur = bb.op(id).next;
        }
        count * 16
    }

    fn codegen(&self, bb: &BasicBlock, start: OpId, end: OpId, out: &mut Vec<u8>, fixups: &mut FixupTable) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            self.emit_op(bb, id, out, fixups);
            if id == end {
                break;
            }
            cur = bb.op(id).next;
        }
    }
}

/// Replace a `Load*`/`Store*`/`Pref` op with its calling sequence,
/// replace a flag-free ALU opcode with the flag-setting variant when a
/// later (in program order) conditional op needs the flags it would
/// otherwise clobber, force shift counts into `ECX`, reduce `Call1`/
/// `CallR` to `Call0` plus an explicit `Mov`, and rewrite `Shuffle`
/// into either a native swap or [`crate::shuffle::shuffle_lower`]
/// (§4.2.3).
///
/// Runs back-to-front so flag liveness can be tracked without a
/// separate analysis pass first, same as the reference.
fn lower_range(bb: &mut BasicBlock, start: OpId, end: OpId, address_space: usize, mem_funcs: MemFuncTable) {
    let mut flags_live = false;
    let mut cur = Some(end);
    while let Some(id) = cur {
        let prev = bb.op(id).prev;
        let opcode = bb.op(id).opcode;

        match opcode {
            Opcode::LoadB => lower_mem_load(bb, id, address_space, mem_funcs.read_byte),
            Opcode::LoadBfw => lower_mem_load(bb, id, address_space, mem_funcs.read_byte_for_write),
            Opcode::LoadW => lower_mem_load(bb, id, address_space, mem_funcs.read_word),
            Opcode::LoadL => lower_mem_load(bb, id, address_space, mem_funcs.read_long),
            Opcode::Pref => lower_mem_load(bb, id, address_space, mem_funcs.prefetch),
            Opcode::LoadQ => lower_mem_loadq(bb, id, address_space, mem_funcs.read_long),
            Opcode::StoreB => lower_mem_store(bb, id, address_space, mem_funcs.write_byte),
            Opcode::StoreW => lower_mem_store(bb, id, address_space, mem_funcs.write_word),
            Opcode::StoreL | Opcode::StoreLca => lower_mem_store(bb, id, address_space, mem_funcs.write_long),
            Opcode::StoreQ => lower_mem_storeq(bb, id, address_space, mem_funcs.write_long),
            Opcode::AddC | Opcode::And | Opcode::Div | Opcode::Mul | Opcode::MulQ | Opcode::Neg
            | Opcode::Not | Opcode::Or | Opcode::Xor | Opcode::Sub | Opcode::SubB | Opcode::SDiv => {
                promote_to_flag_variant(bb, id);
                if flags_live {
                    wrap_with_flag_save(bb, id);
                }
            }
            Opcode::Sar | Opcode::Sll | Opcode::Slr | Opcode::Rol | Opcode::Ror => {
                promote_to_flag_variant(bb, id);
                if flags_live {
                    wrap_with_flag_save(bb, id);
                }
                force_shift_count_into_ecx(bb, id);
            }
            Opcode::SarS | Opcode::SllS | Opcode::SlrS | Opcode::Rcl | Opcode::Rcr | Opcode::RolS | Opcode::RorS => {
                force_shift_count_into_ecx(bb, id);
            }
            Opcode::Call1 => {
                let load = bb.sequence().append_op2(Opcode::Mov, bb_operand(bb, id, 1), Operand::TargetReg(REG_ARG1));
                bb.insert_op(load, id);
                let op = bb.op_mut(id);
                op.opcode = Opcode::Call0;
                op.operand[1] = Operand::None;
            }
            Opcode::CallR => {
                if let Some(next) = bb.op(id).next {
                    let store = bb.sequence().append_op2(Opcode::Mov, Operand::TargetReg(REG_RESULT1), bb_operand(bb, id, 1));
                    bb.insert_op(store, next);
                }
                let op = bb.op_mut(id);
                op.opcode = Opcode::Call0;
                op.operand[1] = Operand::None;
            }
            Opcode::Shuffle => {
                if let Operand::IntImm(pattern) = bb.op(id).operand[0] {
                    if pattern == 0x2134 {
                        let dst = bb.op(id).operand[1];
                        let load = bb.sequence().append_op2(Opcode::Mov, dst, Operand::TargetReg(REG_EAX));
                        bb.insert_op(load, id);
                        bb.op_mut(id).operand[1] = Operand::TargetReg(REG_EAX);
                    } else if pattern != 0x4321 {
                        crate::shuffle::shuffle_lower(bb, id, crate::REG_TMP3, crate::REG_TMP4);
                    }
                }
            }
            _ => {}
        }

        let mode = bb.op(id).opcode.info().mode;
        if mode.contains(OpMode::READS_FLAGS) {
            flags_live = true;
        } else if mode.contains(OpMode::WRITES_FLAGS) {
            flags_live = false;
        }

        if id == start {
            break;
        }
        cur = prev;
    }
}

fn bb_operand(bb: &BasicBlock, id: OpId, slot: usize) -> Operand {
    bb.op(id).operand[slot]
}

fn address_space_ptr(address_space: usize) -> Operand {
    Operand::PtrImm(address_space as *const ())
}

/// Replace a `Load*`/`Pref` op with the calling sequence that dispatches
/// through the address space's lookup table (§4.2.3, the reference's
/// `lower_mem_load`):
/// ```text
/// mov addr, %arg1
/// mov addr, %tmp3
/// slr 12, %tmp3
/// xlat address_space, %tmp3
/// call/lut %tmp3, offset
/// mov %result1, dest        ; only when the op has a destination
/// ```
fn lower_mem_load(bb: &mut BasicBlock, id: OpId, address_space: usize, offset: MemFuncOffset) {
    let addr = bb_operand(bb, id, 0);
    let has_result = bb.op(id).opcode.info().mode.contains(OpMode::WRITES_OP2);
    let dest = bb_operand(bb, id, 1);

    let mut seq = bb.sequence();
    let first = seq.append_op2(Opcode::Mov, addr, Operand::TargetReg(REG_ARG1));
    seq.append_op2(Opcode::Mov, addr, Operand::SourceReg(crate::REG_TMP3));
    seq.append_op2(Opcode::Slr, Operand::IntImm(12), Operand::SourceReg(crate::REG_TMP3));
    let last = seq.append_op2(Opcode::Xlat, address_space_ptr(address_space), Operand::SourceReg(crate::REG_TMP3));
    seq.finish();
    bb.insert_block(first, last, id);

    if has_result {
        let store = bb.sequence().append_op2(Opcode::Mov, Operand::TargetReg(REG_RESULT1), dest);
        match bb.op(id).next {
            Some(next) => bb.insert_op(store, next),
            None => {
                bb.op_mut(id).next = Some(store);
                bb.op_mut(store).prev = Some(id);
            }
        }
    }

    let op = bb.op_mut(id);
    op.opcode = Opcode::CallLut;
    op.operand[0] = Operand::SourceReg(crate::REG_TMP3);
    op.operand[1] = Operand::IntImm(offset.0);
}

/// Replace a `Store*` op with the calling sequence that dispatches
/// through the address space's lookup table (the reference's
/// `lower_mem_store`).
fn lower_mem_store(bb: &mut BasicBlock, id: OpId, address_space: usize, offset: MemFuncOffset) {
    let addr = bb_operand(bb, id, 0);
    let value = bb_operand(bb, id, 1);

    let mut seq = bb.sequence();
    let first = seq.append_op2(Opcode::Mov, addr, Operand::TargetReg(REG_ARG1));
    seq.append_op2(Opcode::Mov, value, Operand::TargetReg(REG_ARG2));
    seq.append_op2(Opcode::Mov, addr, Operand::SourceReg(crate::REG_TMP3));
    seq.append_op2(Opcode::Slr, Operand::IntImm(12), Operand::SourceReg(crate::REG_TMP3));
    let last = seq.append_op2(Opcode::Xlat, address_space_ptr(address_space), Operand::SourceReg(crate::REG_TMP3));
    seq.finish();
    bb.insert_block(first, last, id);

    let op = bb.op_mut(id);
    op.opcode = Opcode::CallLut;
    op.operand[0] = Operand::SourceReg(crate::REG_TMP3);
    op.operand[1] = Operand::IntImm(offset.0);
}

/// `Load*`'s 64-bit counterpart: two 32-bit reads four bytes apart,
/// sharing the single address-translation lookup (the reference's
/// `lower_mem_loadq`, which hardcodes both halves to `read_long` —
/// carried forward here via the single `offset` the caller passes for
/// both words rather than re-deriving a 64-bit accessor slot).
fn lower_mem_loadq(bb: &mut BasicBlock, id: OpId, address_space: usize, offset: MemFuncOffset) {
    let addr = bb_operand(bb, id, 0);
    let dest = bb_operand(bb, id, 1);

    let mut seq = bb.sequence();
    let first = seq.append_op2(Opcode::Mov, addr, Operand::TargetReg(REG_ARG1));
    seq.append_op2(Opcode::Mov, addr, Operand::SourceReg(crate::REG_TMP3));
    seq.append_op2(Opcode::Slr, Operand::IntImm(12), Operand::SourceReg(crate::REG_TMP3));
    let last = seq.append_op2(Opcode::Xlat, address_space_ptr(address_space), Operand::SourceReg(crate::REG_TMP3));
    seq.finish();
    bb.insert_block(first, last, id);

    let exc = bb.op(id).exc;
    let op = bb.op_mut(id);
    op.opcode = Opcode::CallLut;
    op.operand[0] = Operand::SourceReg(crate::REG_TMP3);
    op.operand[1] = Operand::IntImm(offset.0);

    let mut second = bb.sequence();
    let result_hi = second.append_op2(Opcode::Mov, Operand::TargetReg(REG_RESULT1), dest_hi(dest));
    second.append_op2(Opcode::Add, Operand::IntImm(4), Operand::TargetReg(REG_ARG1));
    let fin = second.append_op2(Opcode::CallLut, Operand::SourceReg(crate::REG_TMP3), Operand::IntImm(offset.0));
    second.append_op2(Opcode::Mov, Operand::TargetReg(REG_RESULT1), dest);
    second.finish();
    bb.op_mut(fin).exc = exc;

    match bb.op(id).next {
        Some(next) => bb.insert_block(result_hi, second_last(bb, result_hi), next),
        None => splice_tail(bb, id, result_hi),
    }
}

/// `Store*`'s 64-bit counterpart (the reference's `lower_mem_storeq`).
/// Unlike the reference, the second half's call is passed `offset`
/// (the actual write accessor) rather than re-using `read_long`, which
/// looks like a copy/paste slip in the original rather than an
/// intentional shared path.
fn lower_mem_storeq(bb: &mut BasicBlock, id: OpId, address_space: usize, offset: MemFuncOffset) {
    let addr = bb_operand(bb, id, 0);
    let value = bb_operand(bb, id, 1);

    let mut seq = bb.sequence();
    let first = seq.append_op2(Opcode::Mov, addr, Operand::TargetReg(REG_ARG1));
    seq.append_op2(Opcode::Mov, dest_hi(value), Operand::TargetReg(REG_ARG2));
    seq.append_op2(Opcode::Mov, addr, Operand::SourceReg(crate::REG_TMP3));
    seq.append_op2(Opcode::Slr, Operand::IntImm(12), Operand::SourceReg(crate::REG_TMP3));
    let last = seq.append_op2(Opcode::Xlat, address_space_ptr(address_space), Operand::SourceReg(crate::REG_TMP3));
    seq.finish();
    bb.insert_block(first, last, id);

    let exc = bb.op(id).exc;
    let op = bb.op_mut(id);
    op.opcode = Opcode::CallLut;
    op.operand[0] = Operand::SourceReg(crate::REG_TMP3);
    op.operand[1] = Operand::IntImm(offset.0);

    let mut second = bb.sequence();
    let mov2 = second.append_op2(Opcode::Mov, value, Operand::TargetReg(REG_ARG2));
    second.append_op2(Opcode::Add, Operand::IntImm(4), Operand::TargetReg(REG_ARG1));
    let fin = second.append_op2(Opcode::CallLut, Operand::SourceReg(crate::REG_TMP3), Operand::IntImm(offset.0));
    second.finish();
    bb.op_mut(fin).exc = exc;

    match bb.op(id).next {
        Some(next) => bb.insert_block(mov2, fin, next),
        None => splice_tail(bb, id, mov2),
    }
}

/// The high source-register half of a 64-bit operand occupies the slot
/// one past the low half (the reference's `resultval+1`/`argval+1`).
fn dest_hi(operand: Operand) -> Operand {
    match operand {
        Operand::SourceReg(r) => Operand::SourceReg(r + 1),
        Operand::TargetReg(r) => Operand::TargetReg(r + 1),
        other => other,
    }
}

fn second_last(bb: &BasicBlock, first: OpId) -> OpId {
    let mut cur = first;
    while let Some(next) = bb.op(cur).next {
        cur = next;
    }
    cur
}

fn splice_tail(bb: &mut BasicBlock, after: OpId, first: OpId) {
    bb.op_mut(after).next = Some(first);
    bb.op_mut(first).prev = Some(after);
}

/// The non-flag-setting mnemonics in [`Opcode`] are immediately
/// followed by their flag-setting twin (`Add`/`AddS`, `And`/`AndS`,
/// ...), so "promote" is just stepping to the next discriminant.
fn promote_to_flag_variant(bb: &mut BasicBlock, id: OpId) {
    let promoted = match bb.op(id).opcode {
        Opcode::AddC => Opcode::AddCs,
        Opcode::And => Opcode::AndS,
        Opcode::Div => Opcode::DivS,
        Opcode::Mul => Opcode::MulS,
        Opcode::MulQ => Opcode::MulQs,
        Opcode::Neg => Opcode::NegS,
        Opcode::Not => Opcode::NotS,
        Opcode::Or => Opcode::OrS,
        Opcode::Xor => Opcode::XorS,
        Opcode::Sub => Opcode::SubS,
        Opcode::SubB => Opcode::SubBs,
        Opcode::SDiv => Opcode::SDivS,
        Opcode::Sar => Opcode::SarS,
        Opcode::Sll => Opcode::SllS,
        Opcode::Slr => Opcode::SlrS,
        Opcode::Rol => Opcode::RolS,
        Opcode::Ror => Opcode::RorS,
        other => other,
    };
    bb.op_mut(id).opcode = promoted;
}

fn wrap_with_flag_save(bb: &mut BasicBlock, id: OpId) {
    let save = bb.sequence().append_op1(Opcode::SaveFlags, Operand::SourceReg(crate::REG_TMP5));
    bb.insert_op(save, id);
    let restore = {
        let mut seq = bb.sequence();
        seq.append_op1(Opcode::RestFlags, Operand::SourceReg(crate::REG_TMP5))
    };
    match bb.op(id).next {
        Some(next) => bb.insert_op(restore, next),
        None => {
            bb.op_mut(id).next = Some(restore);
            bb.op_mut(restore).prev = Some(id);
        }
    }
}

fn force_shift_count_into_ecx(bb: &mut BasicBlock, id: OpId) {
    if let Operand::SourceReg(r) = bb.op(id).operand[0] {
        let load = bb.sequence().append_op2(Opcode::Mov, Operand::SourceReg(r), Operand::TargetReg(REG_ECX));
        bb.insert_op(load, id);
        bb.op_mut(id).operand[0] = Operand::TargetReg(REG_ECX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify;

    fn test_mem_funcs() -> MemFuncTable {
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

    fn lower(bb: &mut BasicBlock, start: OpId, end: OpId) {
        lower_range(bb, start, end, 0x1000, test_mem_funcs());
    }

    #[test]
    fn flag_promotion_inserts_save_restore_around_clobbering_op() {
        let mut bb = BasicBlock::new();
        let and_op = bb.append_op2(Opcode::And, Operand::IntImm(0xFF), Operand::SourceReg(3));
        let last = bb.append_op2(Opcode::BrCond, Operand::IntImm(0x1000), Operand::IntImm(0));
        bb.op_mut(last).cond = Cond::Eq;
        lower(&mut bb, and_op, last);
        assert_eq!(bb.op(and_op).opcode, Opcode::AndS);
        assert_eq!(bb.op(bb.op(and_op).prev.unwrap()).opcode, Opcode::SaveFlags);
    }

    #[test]
    fn call1_reduces_to_mov_then_call0() {
        let mut bb = BasicBlock::new();
        let call = bb.append_op2(Opcode::Call1, Operand::PtrImm(std::ptr::null()), Operand::SourceReg(7));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, call, call);
        assert_eq!(bb.op(call).opcode, Opcode::Call0);
        let load = bb.op(call).prev.unwrap();
        assert_eq!(bb.op(load).opcode, Opcode::Mov);
        assert_eq!(bb.op(load).operand[1], Operand::TargetReg(REG_ARG1));
    }

    #[test]
    fn shift_count_forced_into_ecx() {
        let mut bb = BasicBlock::new();
        let shift = bb.append_op2(Opcode::Sll, Operand::SourceReg(9), Operand::TargetReg(REG_EBX));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, shift, shift);
        assert_eq!(bb.op(shift).opcode, Opcode::SllS);
        assert_eq!(bb.op(shift).operand[0], Operand::TargetReg(REG_ECX));
    }

    #[test]
    fn shuffle_full_byteswap_left_native() {
        let mut bb = BasicBlock::new();
        let shuf = bb.append_op2(Opcode::Shuffle, Operand::IntImm(0x4321), Operand::TargetReg(0));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, shuf, shuf);
        assert_eq!(bb.op(shuf).opcode, Opcode::Shuffle);
    }

    #[test]
    fn emits_mov_and_alu_bytes() {
        let mut bb = BasicBlock::new();
        bb.append_op2(Opcode::Mov, Operand::IntImm(5), Operand::TargetReg(REG_EAX));
        bb.append_op2(Opcode::AddS, Operand::TargetReg(REG_ECX), Operand::TargetReg(REG_EAX));
        let last = bb.append_op0(Opcode::Nop);
        let target = X86Target::new(0, test_mem_funcs());
        let mut out = Vec::new();
        let mut fixups = FixupTable::new();
        target.codegen(&bb, bb.begin().unwrap(), last, &mut out, &mut fixups);
        assert_eq!(&out[0..1], &[0xB8]);
        assert_eq!(&out[5..6], &[0x01]);
    }

    #[test]
    fn lowered_block_still_verifies() {
        let mut bb = BasicBlock::new();
        let and_op = bb.append_op2(Opcode::And, Operand::IntImm(1), Operand::SourceReg(2));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, and_op, and_op);
        assert!(verify(&bb, bb.begin().unwrap(), None).is_ok());
    }

    #[test]
    fn load_lowers_to_arg_mov_xlat_calllut_and_result_mov() {
        let mut bb = BasicBlock::new();
        let load = bb.append_op2(Opcode::LoadL, Operand::SourceReg(4), Operand::SourceReg(5));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, load, load);

        let mut ids = Vec::new();
        let mut cur = bb.begin();
        while let Some(id) = cur {
            ids.push(id);
            cur = bb.op(id).next;
        }
        // mov->arg1, mov->tmp3, slr tmp3, xlat tmp3, calllut, mov result->dest, nop
        assert_eq!(ids.len(), 7);
        assert_eq!(bb.op(ids[0]).opcode, Opcode::Mov);
        assert_eq!(bb.op(ids[0]).operand[1], Operand::TargetReg(REG_ARG1));
        assert_eq!(bb.op(ids[3]).opcode, Opcode::Xlat);
        assert_eq!(bb.op(ids[4]).opcode, Opcode::CallLut);
        assert_eq!(bb.op(ids[4]).operand[1], Operand::IntImm(12));
        assert_eq!(bb.op(ids[5]).opcode, Opcode::Mov);
        assert_eq!(bb.op(ids[5]).operand[1], Operand::SourceReg(5));
    }

    #[test]
    fn prefetch_lowers_without_a_result_mov() {
        let mut bb = BasicBlock::new();
        let pref = bb.append_op1(Opcode::Pref, Operand::SourceReg(4));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, pref, pref);

        let mut count = 0;
        let mut cur = bb.begin();
        while let Some(id) = cur {
            count += 1;
            cur = bb.op(id).next;
        }
        // mov->arg1, mov->tmp3, slr tmp3, xlat tmp3, calllut, nop
        assert_eq!(count, 6);
        assert_eq!(bb.op(pref).opcode, Opcode::CallLut);
    }

    #[test]
    fn store_lowers_to_two_arg_movs_then_calllut() {
        let mut bb = BasicBlock::new();
        let store = bb.append_op2(Opcode::StoreL, Operand::SourceReg(4), Operand::SourceReg(5));
        bb.append_op0(Opcode::Nop);
        lower(&mut bb, store, store);

        let mut ids = Vec::new();
        let mut cur = bb.begin();
        while let Some(id) = cur {
            ids.push(id);
            cur = bb.op(id).next;
        }
        // mov->arg1, mov->arg2, mov->tmp3, slr tmp3, xlat tmp3, calllut, nop
        assert_eq!(ids.len(), 7);
        assert_eq!(bb.op(ids[1]).operand[1], Operand::TargetReg(REG_ARG2));
        assert_eq!(bb.op(ids[5]).opcode, Opcode::CallLut);
        assert_eq!(bb.op(ids[5]).operand[1], Operand::IntImm(28));
    }
}
