//! Target machine abstraction and the generic harness that drives
//! lowering, promotion, emission, and fixup resolution for any target
//! (§4.2, §4.2.6).
//!
//! lxdream dispatches to a target through a hand-rolled method table
//! (`struct xlat_target_machine { char *name, lower, get_code_size,
//! codegen }`). Per "function-pointer method tables -> trait /
//! polymorphism" (§9), that becomes the [`TargetMachine`] trait here.

pub mod x86;

use crate::fixup::{self, FixupKind, FixupMode, FixupTable};
use crate::ir::{BasicBlock, OpId};
use crate::promote::promote_source_registers;

/// A host machine XIR can lower to and emit code for.
pub trait TargetMachine {
    /// Target name, e.g. `"x86"` or `"x86-64"`.
    fn name(&self) -> &'static str;

    /// Rewrite `start..=end` in place, replacing ops the target can't
    /// encode directly with an equivalent sequence it can.
    fn lower(&self, bb: &mut BasicBlock, start: OpId, end: OpId);

    /// Upper bound (in bytes) on the code [`Self::codegen`] will emit
    /// for `start..=end`, used to size the output buffer up front.
    fn code_size(&self, bb: &BasicBlock, start: OpId, end: OpId) -> usize;

    /// Emit machine code for `start..=end` into `out`, recording any
    /// fixups needed once the full block (including exception bodies
    /// and the constant pool) has been laid out.
    fn codegen(&self, bb: &BasicBlock, start: OpId, end: OpId, out: &mut Vec<u8>, fixups: &mut FixupTable);
}

fn chain_end(bb: &BasicBlock, start: OpId) -> OpId {
    let mut cur = start;
    while let Some(next) = bb.op(cur).next {
        cur = next;
    }
    cur
}

/// Lower, promote, and emit a complete block: the counterpart of
/// lxdream's `target_codegen`, minus its static scratch buffer (here
/// the caller gets an owned `Vec<u8>` back) and the executable-memory
/// bookkeeping, which is a JIT-runtime concern outside this crate.
pub fn codegen_block(machine: &dyn TargetMachine, bb: &mut BasicBlock, start: OpId, end: OpId, base_address: usize) -> Vec<u8> {
    machine.lower(bb, start, end);
    promote_source_registers(bb, start, Some(end));

    let mut out = Vec::with_capacity(machine.code_size(bb, start, end));
    let mut fixups = FixupTable::new();
    machine.codegen(bb, start, end, &mut out, &mut fixups);

    gen_exception_table(machine, bb, &mut out, &mut fixups);
    gen_constant_pool(&mut out, &mut fixups);

    fixup::apply_fixups(&mut out, &fixups, base_address);
    out
}

fn set_target(fixups: &mut FixupTable, index: usize, offset: u32) {
    if let Some(f) = fixups.iter_mut().nth(index) {
        f.target_offset = Some(offset);
    }
}

/// Emit exception-handler bodies after the main code and point their
/// fixups at where they landed. Note this only handles one level of
/// `Raise`/`RaiseExt` fixups present when this function is entered —
/// an exception handler that itself raises gets the same treatment the
/// reference gives it: none.
fn gen_exception_table(machine: &dyn TargetMachine, bb: &BasicBlock, out: &mut Vec<u8>, fixups: &mut FixupTable) {
    let raises: Vec<(usize, OpId)> = fixups
        .iter()
        .enumerate()
        .filter_map(|(i, f)| match f.kind {
            FixupKind::Raise(exc) | FixupKind::RaiseExt(exc) => Some((i, exc)),
            _ => None,
        })
        .collect();

    for (i, exc) in raises {
        let offset = out.len() as u32;
        machine.codegen(bb, exc, chain_end(bb, exc), out, fixups);
        set_target(fixups, i, offset);
    }
}

/// Lay out the constant pool (64-bit constants first, so both pools
/// end up naturally aligned) and point their fixups at it.
fn gen_constant_pool(out: &mut Vec<u8>, fixups: &mut FixupTable) {
    let mut const64 = Vec::new();
    let mut const32 = Vec::new();
    for (i, f) in fixups.iter().enumerate() {
        match f.kind {
            FixupKind::Const64(v) => const64.push((i, v)),
            FixupKind::Const32(v) => const32.push((i, v)),
            _ => {}
        }
    }
    if const64.is_empty() && const32.is_empty() {
        return;
    }
    let align = if !const64.is_empty() { 8 } else { 4 };
    while out.len() % align != 0 {
        out.push(0);
    }
    for (i, v) in const64 {
        let offset = out.len() as u32;
        out.extend_from_slice(&v.to_le_bytes());
        set_target(fixups, i, offset);
    }
    for (i, v) in const32 {
        let offset = out.len() as u32;
        out.extend_from_slice(&v.to_le_bytes());
        set_target(fixups, i, offset);
    }
}
