//! Two-operand translation IR and x86/x86-64 code generator.
//!
//! A [`BasicBlock`] holds a linear sequence of [`ir::Op`]s operating on
//! source registers (the guest machine's register file, plus
//! block-local temporaries), lowered by a [`target::TargetMachine`]
//! into host machine code. The pipeline is: build IR with the
//! `append_op*` constructors, [`ir::verify`] it in debug builds,
//! [`target::TargetMachine::lower`] it for the chosen host, run
//! [`promote::promote_source_registers`], then
//! [`target::TargetMachine::codegen`] to emit bytes and resolve
//! [`fixup::Fixup`]s.

#![warn(missing_docs)]

pub mod fixup;
pub mod ir;
pub mod opcode;
pub mod operand;
pub mod promote;
pub mod regalloc;
pub mod shuffle;
pub mod target;

pub use ir::{BasicBlock, Op, OpId, VerifyFailure};
pub use opcode::{OpMode, Opcode};
pub use operand::{Cond, Operand, XirType};

/// Source registers `0..=1023` are the guest machine's addressable
/// register file.
pub const MAX_SOURCE_REGISTER: u32 = 1023;
/// Temporaries occupy `1024..=1535` of the same operand namespace.
pub const MIN_TEMP_REGISTER: u32 = 1024;
/// Highest temporary register index.
pub const MAX_TEMP_REGISTER: u32 = 1535;
/// Target (host) registers are named by the target machine, `0..=127`.
pub const MAX_TARGET_REGISTER: u32 = 127;

/// Fixed scratch temporaries reserved by the x86 lowering pass for
/// address translation and flag save/restore (mirrors `REG_TMP0..5`).
pub const REG_TMP0: u32 = MIN_TEMP_REGISTER;
/// See [`REG_TMP0`].
pub const REG_TMP1: u32 = MIN_TEMP_REGISTER + 1;
/// See [`REG_TMP0`].
pub const REG_TMP2: u32 = MIN_TEMP_REGISTER + 2;
/// See [`REG_TMP0`].
pub const REG_TMP3: u32 = MIN_TEMP_REGISTER + 3;
/// See [`REG_TMP0`].
pub const REG_TMP4: u32 = MIN_TEMP_REGISTER + 4;
/// See [`REG_TMP0`].
pub const REG_TMP5: u32 = MIN_TEMP_REGISTER + 5;
/// First 64-bit scratch temporary.
pub const REG_TMPQ0: u32 = MIN_TEMP_REGISTER + 6;
/// Second 64-bit scratch temporary.
pub const REG_TMPQ1: u32 = MIN_TEMP_REGISTER + 7;

#[inline]
fn is_temp_register(reg: u32) -> bool {
    reg >= MIN_TEMP_REGISTER
}
