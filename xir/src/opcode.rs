//! Opcode catalogue and per-opcode descriptor metadata (§3.2, §4.2.1).
//!
//! Each [`Opcode`] has a matching entry in [`OPCODE_TABLE`], in
//! declaration order, giving its operand read/write pattern, operand
//! types, and control/flag/exception behaviour. Everything downstream
//! (`verify`, lowering, promotion, emission) drives off this table
//! rather than switching on the opcode directly.

use crate::operand::XirType;

bitflags::bitflags! {
    /// Per-opcode behaviour bits, decoded from [`OPCODE_TABLE`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpMode: u32 {
        /// Operand 1 is read.
        const READS_OP1 = 1 << 0;
        /// Operand 1 is written.
        const WRITES_OP1 = 1 << 1;
        /// Operand 2 is read.
        const READS_OP2 = 1 << 2;
        /// Operand 2 is written.
        const WRITES_OP2 = 1 << 3;
        /// Condition-flag state is consumed.
        const READS_FLAGS = 1 << 4;
        /// Condition-flag state is produced.
        const WRITES_FLAGS = 1 << 5;
        /// May raise a guest exception; clobbers volatile registers on
        /// the slow path.
        const EXCEPTION = 1 << 6;
        /// Clobbers the full volatile register set (e.g. a native call).
        const CLOBBERS = 1 << 7;
        /// Clobbers only the fixed scratch temporaries, not the full
        /// volatile set (SH4 macro-ops lowered to short native sequences).
        const CLOBBERS_TEMPS = 1 << 8;
        /// Must be the final instruction in its block.
        const TERMINATOR = 1 << 9;
    }
}

impl OpMode {
    /// Number of operands this opcode takes: 0, 1, or 2.
    pub const fn operand_count(self) -> u32 {
        if self.intersects(OpMode::READS_OP2.union(OpMode::WRITES_OP2)) {
            2
        } else if self.intersects(OpMode::READS_OP1.union(OpMode::WRITES_OP1)) {
            1
        } else {
            0
        }
    }
}

const R: OpMode = OpMode::READS_OP1;
const W: OpMode = OpMode::WRITES_OP1;
const RW: OpMode = OpMode::READS_OP1.union(OpMode::WRITES_OP1);
const R_R: OpMode = OpMode::READS_OP1.union(OpMode::READS_OP2);
const R_W: OpMode = OpMode::READS_OP1.union(OpMode::WRITES_OP2);
const R_RW: OpMode = OpMode::READS_OP1.union(OpMode::READS_OP2).union(OpMode::WRITES_OP2);
const TR: OpMode = OpMode::READS_FLAGS;
const TW: OpMode = OpMode::WRITES_FLAGS;
const TRW: OpMode = OpMode::READS_FLAGS.union(OpMode::WRITES_FLAGS);
const EXC: OpMode = OpMode::EXCEPTION;
const CLB: OpMode = OpMode::CLOBBERS;
const CLBT: OpMode = OpMode::CLOBBERS_TEMPS;
const TERM: OpMode = OpMode::TERMINATOR;

const fn op(m: OpMode) -> OpMode {
    m
}

/// One opcode's static behaviour description.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    /// Mnemonic, used by the disassembler.
    pub name: &'static str,
    /// Behaviour bits.
    pub mode: OpMode,
    /// Operand 1's value type.
    pub type1: XirType,
    /// Operand 2's value type.
    pub type2: XirType,
}

impl OpInfo {
    const fn new(name: &'static str, mode: OpMode) -> OpInfo {
        OpInfo { name, mode, type1: XirType::Long, type2: XirType::Long }
    }

    const fn types(mut self, type1: XirType, type2: XirType) -> OpInfo {
        self.type1 = type1;
        self.type2 = type2;
        self
    }
}

macro_rules! i {
    ($name:literal, $mode:expr) => {
        OpInfo::new($name, op($mode))
    };
    ($name:literal, $mode:expr, $t1:expr, $t2:expr) => {
        OpInfo::new($name, op($mode)).types($t1, $t2)
    };
}

/// The full opcode catalogue (§3.2, §4.2.5), including the SH4-specific
/// macro-ops (`AddQSat32/48`, `CmpStr`, `Div1`, `Shad`, `Shld`) beyond
/// what the distilled interface called out by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop,
    Barrier,
    Dec,
    Ld,
    St,
    RestFlags,
    SaveFlags,
    Enter,
    BrRel,
    Br,
    Call0,
    Ocbi,
    Ocbp,
    Ocbwb,
    Pref,

    Mov,
    MovQ,
    MovV,
    MovM,
    MovSx8,
    MovSx16,
    MovSx32,
    MovZx8,
    MovZx16,
    MovZx32,

    Add,
    AddS,
    AddC,
    AddCs,
    And,
    AndS,
    Cmp,
    Div,
    DivS,
    Mul,
    MulS,
    MulQ,
    MulQs,
    Neg,
    NegS,
    Not,
    NotS,
    Or,
    OrS,
    Rcl,
    Rcr,
    Rol,
    RolS,
    Ror,
    RorS,
    Sar,
    SarS,
    SDiv,
    SDivS,
    Sll,
    SllS,
    Slr,
    SlrS,
    Sub,
    SubS,
    SubB,
    SubBs,
    Shuffle,
    Tst,
    Xor,
    XorS,

    AbsD,
    AbsF,
    AbsV,
    AddD,
    AddF,
    AddV,
    CmpD,
    CmpF,
    DivD,
    DivF,
    DivV,
    MulD,
    MulF,
    MulV,
    NegD,
    NegF,
    NegV,
    SqrtD,
    SqrtF,
    SqrtV,
    RSqrtD,
    RSqrtF,
    RSqrtV,
    SubD,
    SubF,
    SubV,

    DtoF,
    DtoI,
    FtoD,
    FtoI,
    ItoD,
    ItoF,

    SinCosF,

    DotProdV,
    MatMulV,

    LoadB,
    LoadBfw,
    LoadW,
    LoadL,
    LoadQ,
    StoreB,
    StoreW,
    StoreL,
    StoreQ,
    StoreLca,

    BrCond,
    BrCondDel,
    RaiseMe,
    RaiseMne,

    CallLut,
    Call1,
    CallR,
    LoadPtrL,
    LoadPtrQ,
    Xlat,

    AddQSat32,
    AddQSat48,
    CmpStr,
    Div1,
    Shad,
    Shld,
}

/// Highest opcode that takes no operands.
pub const MAX_OP0_OPCODE: Opcode = Opcode::Barrier;
/// Highest opcode that takes exactly one operand.
pub const MAX_OP1_OPCODE: Opcode = Opcode::Pref;
/// Highest opcode that takes two operands (the last opcode overall).
pub const MAX_OP2_OPCODE: Opcode = Opcode::Shld;

impl Opcode {
    /// This opcode's static descriptor.
    pub fn info(self) -> &'static OpInfo {
        &OPCODE_TABLE[self as usize]
    }
}

/// Parallel array to [`Opcode`], indexed by its `repr(u8)` discriminant.
pub static OPCODE_TABLE: [OpInfo; 127] = [
    i!("nop", OpMode::empty()),
    i!("barrier", CLB),
    i!("dec", RW.union(TW)),
    i!("ld", R.union(TW)),
    i!("st", W.union(TR)),
    i!("restflags", R.union(TW)),
    i!("saveflags", W.union(TR)),
    i!("enter", R),
    i!("brrel", R.union(TERM)),
    i!("br", R.union(TERM)),
    i!("call0", R.union(CLB)),
    i!("ocbi", R.union(EXC)),
    i!("ocbp", R.union(EXC)),
    i!("ocbwb", R.union(EXC)),
    i!("pref", R.union(EXC)),
    i!("mov", R_W),
    i!("movq", R_W, XirType::Quad, XirType::Quad),
    i!("movv", R_W, XirType::Vec4, XirType::Vec4),
    i!("movm", R_W, XirType::Matrix, XirType::Matrix),
    i!("movsx8", R_W),
    i!("movsx16", R_W),
    i!("movsx32", R_W, XirType::Long, XirType::Quad),
    i!("movzx8", R_W),
    i!("movzx16", R_W),
    i!("movzx32", R_W, XirType::Long, XirType::Quad),
    i!("add", R_RW),
    i!("adds", R_RW.union(TW)),
    i!("addc", R_RW.union(TR)),
    i!("addcs", R_RW.union(TRW)),
    i!("and", R_RW),
    i!("ands", R_RW.union(TW)),
    i!("cmp", R_R.union(TW)),
    i!("div", R_RW),
    i!("divs", R_RW.union(TW)),
    i!("mul", R_RW),
    i!("muls", R_RW.union(TW)),
    i!("mulq", R_RW, XirType::Quad, XirType::Quad),
    i!("mulqs", R_RW.union(TW), XirType::Quad, XirType::Quad),
    i!("neg", R_W),
    i!("negs", R_W.union(TW)),
    i!("not", R_W),
    i!("nots", R_W.union(TW)),
    i!("or", R_RW),
    i!("ors", R_RW.union(TW)),
    i!("rcl", R_RW.union(TRW)),
    i!("rcr", R_RW.union(TRW)),
    i!("rol", R_RW),
    i!("rols", R_RW.union(TW)),
    i!("ror", R_RW),
    i!("rors", R_RW.union(TW)),
    i!("sar", R_RW),
    i!("sars", R_RW.union(TW)),
    i!("sdiv", R_RW),
    i!("sdivs", R_RW.union(TW)),
    i!("sll", R_RW),
    i!("slls", R_RW.union(TW)),
    i!("slr", R_RW),
    i!("slrs", R_RW.union(TW)),
    i!("sub", R_RW),
    i!("subs", R_RW.union(TW)),
    i!("subb", R_RW),
    i!("subbs", R_RW.union(TRW)),
    i!("shuffle", R_RW),
    i!("tst", R_R.union(TW)),
    i!("xor", R_RW),
    i!("xors", R_RW.union(TW)),
    i!("absd", R_W, XirType::Double, XirType::Double),
    i!("absf", R_W, XirType::Float, XirType::Float),
    i!("absv", R_W, XirType::Vec4, XirType::Vec4),
    i!("addd", R_RW, XirType::Double, XirType::Double),
    i!("addf", R_RW, XirType::Float, XirType::Float),
    i!("addv", R_RW, XirType::Vec4, XirType::Vec4),
    i!("cmpd", R_R.union(TW), XirType::Double, XirType::Double),
    i!("cmpf", R_R.union(TW), XirType::Float, XirType::Float),
    i!("divd", R_RW, XirType::Double, XirType::Double),
    i!("divf", R_RW, XirType::Float, XirType::Float),
    i!("divv", R_RW, XirType::Vec4, XirType::Vec4),
    i!("muld", R_RW, XirType::Double, XirType::Double),
    i!("mulf", R_RW, XirType::Float, XirType::Float),
    i!("mulv", R_RW, XirType::Vec4, XirType::Vec4),
    i!("negd", R_W, XirType::Double, XirType::Double),
    i!("negf", R_W, XirType::Float, XirType::Float),
    i!("negv", R_W, XirType::Vec4, XirType::Vec4),
    i!("sqrtd", R_W, XirType::Double, XirType::Double),
    i!("sqrtf", R_W, XirType::Float, XirType::Float),
    i!("sqrtv", R_W, XirType::Vec4, XirType::Vec4),
    i!("rsqrtd", R_W, XirType::Double, XirType::Double),
    i!("rsqrtf", R_W, XirType::Float, XirType::Float),
    i!("rsqrtv", R_W, XirType::Vec4, XirType::Vec4),
    i!("subd", R_RW, XirType::Double, XirType::Double),
    i!("subf", R_RW, XirType::Float, XirType::Float),
    i!("subv", R_RW, XirType::Vec4, XirType::Vec4),
    i!("dtof", R_W, XirType::Double, XirType::Float),
    i!("dtoi", R_W, XirType::Double, XirType::Long),
    i!("ftod", R_W, XirType::Float, XirType::Double),
    i!("ftoi", R_W, XirType::Float, XirType::Long),
    i!("itod", R_W, XirType::Long, XirType::Double),
    i!("itof", R_W, XirType::Long, XirType::Float),
    i!("sincosf", R_RW, XirType::Float, XirType::Float),
    i!("dotprodv", R_RW, XirType::Vec4, XirType::Vec4),
    i!("matmulv", R_RW, XirType::Vec4, XirType::Matrix),
    i!("load.b", R_W.union(EXC)),
    i!("load.bfw", R_W.union(EXC)),
    i!("load.w", R_W.union(EXC)),
    i!("load.l", R_W.union(EXC)),
    i!("load.q", R_W.union(EXC), XirType::Long, XirType::Quad),
    i!("store.b", R_R.union(EXC)),
    i!("store.w", R_R.union(EXC)),
    i!("store.l", R_R.union(EXC)),
    i!("store.q", R_R.union(EXC), XirType::Long, XirType::Quad),
    i!("store.lca", R_R.union(EXC)),
    i!("brcond", R_R.union(TR).union(TERM)),
    i!("brconddel", R_R.union(TR)),
    i!("raise/me", R_R.union(EXC)),
    i!("raise/mne", R_R.union(EXC)),
    i!("call/lut", R_R.union(EXC)),
    i!("call1", R_R.union(CLB)),
    i!("callr", R_W.union(CLB)),
    i!("loadptrl", R_W),
    i!("loadptrq", R_W, XirType::Long, XirType::Quad),
    i!("xlat", R_RW),
    i!("addqsat32", R_R.union(CLBT), XirType::Quad, XirType::Quad),
    i!("addqsat48", R_R.union(CLBT), XirType::Quad, XirType::Quad),
    i!("cmp/str", R_R.union(TW).union(CLBT)),
    i!("div1", R_RW.union(TRW).union(CLBT)),
    i!("shad", R_RW.union(CLBT)),
    i!("shld", R_RW.union(CLBT)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_length_matches_opcode_count() {
        assert_eq!(OPCODE_TABLE.len(), (Opcode::Shld as usize) + 1);
    }

    #[test]
    fn zero_one_two_operand_boundaries_match_spec() {
        assert_eq!(MAX_OP0_OPCODE.info().mode.operand_count(), 0);
        assert_eq!(Opcode::Dec.info().mode.operand_count(), 1);
        assert_eq!(MAX_OP1_OPCODE.info().mode.operand_count(), 1);
        assert_eq!(Opcode::Mov.info().mode.operand_count(), 2);
        assert_eq!(MAX_OP2_OPCODE.info().mode.operand_count(), 2);
    }

    #[test]
    fn terminators_are_flagged() {
        assert!(Opcode::Br.info().mode.contains(OpMode::TERMINATOR));
        assert!(Opcode::BrCond.info().mode.contains(OpMode::TERMINATOR));
        assert!(!Opcode::Mov.info().mode.contains(OpMode::TERMINATOR));
    }

    #[test]
    fn exception_opcodes_are_flagged() {
        assert!(Opcode::LoadL.info().mode.contains(OpMode::EXCEPTION));
        assert!(Opcode::Pref.info().mode.contains(OpMode::EXCEPTION));
        assert!(!Opcode::Add.info().mode.contains(OpMode::EXCEPTION));
    }
}
