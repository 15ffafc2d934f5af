//! The MIPS32 instruction table: how each opcode is encoded, what it reads and writes, and how it
//! is rendered in listings.

use crate::compile::lir::{
    Lir, IS_BINARY_OP, IS_BRANCH, IS_LOAD, IS_QUAD_OP, IS_STORE, IS_TERTIARY_OP, IS_UNARY_OP,
    NEEDS_FIXUP, NO_OPERAND, REG_DEF0, REG_DEF0_USE0, REG_DEF0_USE1, REG_DEF0_USE12,
    REG_DEF0_USE2, REG_DEF1, REG_DEF_LR, REG_USE0, REG_USE01, REG_USE02, REG_USE1, REG_USE2,
    REG_USE23, REG_USE_LR,
};
use std::fmt::Write;
use strum::{EnumCount, EnumIter};

#[derive(Copy, Clone, Debug, EnumCount, EnumIter, Eq, Hash, PartialEq)]
pub enum MipsOpcode {
    /// A literal pool word.
    Data32,
    Addiu,
    Addu,
    And,
    Andi,
    B,
    Bal,
    Beq,
    Beqz,
    Bgez,
    Bgtz,
    Blez,
    Bltz,
    Bnez,
    Bne,
    Div,
    Ext,
    Jal,
    Jalr,
    Jr,
    /// The high half of a label's absolute address.
    Lahi,
    /// The low half of a label's absolute address.
    Lalo,
    Lui,
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lw,
    Mfhi,
    Mflo,
    Move,
    Movz,
    Mul,
    Nop,
    Nor,
    Or,
    Ori,
    Pref,
    Sb,
    Seb,
    Seh,
    Sh,
    Sll,
    Sllv,
    Slt,
    Slti,
    Sltu,
    Sra,
    Srav,
    Srl,
    Srlv,
    Subu,
    Sw,
    Xor,
    Xori,
    Fadds,
    Fsubs,
    Fmuls,
    Fdivs,
    Faddd,
    Fsubd,
    Fmuld,
    Fdivd,
    Fcvtsd,
    Fcvtsw,
    Fcvtds,
    Fcvtdw,
    Fcvtws,
    Fcvtwd,
    Fmovs,
    Fmovd,
    Flwc1,
    Fldc1,
    Fswc1,
    Fsdc1,
    Mfc1,
    Mtc1,
    /// `rd = ra + (target - anchor)`, where `ra` holds the anchor's address. Expanded into
    /// [Self::DeltaHi], [Self::DeltaLo] and an `addu` if the displacement does not fit in 15 bits.
    Delta,
    DeltaHi,
    DeltaLo,
    /// `bal .+8`: puts the address of the instruction after its delay slot in `ra`.
    CurrPC,
    Sync,
    Undefined,
}

/// Where one operand goes in the instruction word. Bit ranges are `(end, start)`, inclusive.
#[derive(Clone, Copy, Debug)]
pub(super) enum Field {
    Unused,
    BitBlt(u8, u8),
    /// A single-precision FP register.
    Sfp(u8, u8),
    /// A double-precision FP register, given by its (even) low single.
    Dfp(u8, u8),
    /// The same 5-bit register written to both bit positions `start` and `end`.
    Blt5_2(u8, u8),
}

#[derive(Debug)]
pub(super) struct Encoding {
    pub(super) opcode: MipsOpcode,
    pub(super) skeleton: u32,
    pub(super) fields: [Field; 4],
    pub(super) flags: u64,
    pub(super) name: &'static str,
    pub(super) fmt: &'static str,
    /// The size in bytes, including a branch's delay-slot `nop`.
    pub(super) size: u32,
}

use Field::{BitBlt as Bb, Blt5_2, Dfp, Sfp, Unused as U};

const fn enc(
    opcode: MipsOpcode,
    skeleton: u32,
    fields: [Field; 4],
    flags: u64,
    name: &'static str,
    fmt: &'static str,
    size: u32,
) -> Encoding {
    Encoding {
        opcode,
        skeleton,
        fields,
        flags,
        name,
        fmt,
        size,
    }
}

const LOAD: u64 = IS_TERTIARY_OP | REG_DEF0_USE2 | IS_LOAD;
const STORE: u64 = IS_TERTIARY_OP | REG_USE02 | IS_STORE;
const MEM_FIELDS: [Field; 4] = [Bb(20, 16), Bb(15, 0), Bb(25, 21), U];
const BRANCH_Z: u64 = IS_UNARY_OP | IS_BRANCH | REG_USE0 | NEEDS_FIXUP;
const BRANCH_Z_FIELDS: [Field; 4] = [Bb(25, 21), Bb(15, 0), U, U];
const RRR: [Field; 4] = [Bb(15, 11), Bb(25, 21), Bb(20, 16), U];
const RRI: [Field; 4] = [Bb(20, 16), Bb(25, 21), Bb(15, 0), U];
const SHIFT: [Field; 4] = [Bb(15, 11), Bb(20, 16), Bb(10, 6), U];
const SHIFTV: [Field; 4] = [Bb(15, 11), Bb(20, 16), Bb(25, 21), U];
const FP_SSS: [Field; 4] = [Sfp(10, 6), Sfp(15, 11), Sfp(20, 16), U];
const FP_DDD: [Field; 4] = [Dfp(10, 6), Dfp(15, 11), Dfp(20, 16), U];
const FP_ARITH: u64 = IS_TERTIARY_OP | REG_DEF0_USE12;
const FP_CVT: u64 = IS_BINARY_OP | REG_DEF0_USE1;
const RRR_FMT: &str = "!0r,!1r,!2r";
const RRI_FMT: &str = "!0r,!1r,0x!2h(!2d)";

/// Indexed by [MipsOpcode].
pub(super) const ENCODING_MAP: &[Encoding] = {
    use MipsOpcode as M;
    &[
        enc(M::Data32, 0, [Bb(31, 0), U, U, U], IS_UNARY_OP, "data", "0x!0h(!0d)", 4),
        enc(M::Addiu, 0x2400_0000, RRI, IS_TERTIARY_OP | REG_DEF0_USE1, "addiu", RRI_FMT, 4),
        enc(M::Addu, 0x0000_0021, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "addu", RRR_FMT, 4),
        enc(M::And, 0x0000_0024, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "and", RRR_FMT, 4),
        enc(M::Andi, 0x3000_0000, RRI, IS_TERTIARY_OP | REG_DEF0_USE1, "andi", RRI_FMT, 4),
        enc(
            M::B,
            0x1000_0000,
            [Bb(15, 0), U, U, U],
            IS_UNARY_OP | IS_BRANCH | NEEDS_FIXUP,
            "b",
            "!0t!0N",
            8,
        ),
        enc(
            M::Bal,
            0x0411_0000,
            [Bb(15, 0), U, U, U],
            IS_UNARY_OP | IS_BRANCH | REG_DEF_LR | NEEDS_FIXUP,
            "bal",
            "!0t!0N",
            8,
        ),
        enc(
            M::Beq,
            0x1000_0000,
            [Bb(25, 21), Bb(20, 16), Bb(15, 0), U],
            IS_BINARY_OP | IS_BRANCH | REG_USE01 | NEEDS_FIXUP,
            "beq",
            "!0r,!1r,!2t!0N",
            8,
        ),
        enc(M::Beqz, 0x1000_0000, BRANCH_Z_FIELDS, BRANCH_Z, "beqz", "!0r,!1t!0N", 8),
        enc(M::Bgez, 0x0401_0000, BRANCH_Z_FIELDS, BRANCH_Z, "bgez", "!0r,!1t!0N", 8),
        enc(M::Bgtz, 0x1C00_0000, BRANCH_Z_FIELDS, BRANCH_Z, "bgtz", "!0r,!1t!0N", 8),
        enc(M::Blez, 0x1800_0000, BRANCH_Z_FIELDS, BRANCH_Z, "blez", "!0r,!1t!0N", 8),
        enc(M::Bltz, 0x0400_0000, BRANCH_Z_FIELDS, BRANCH_Z, "bltz", "!0r,!1t!0N", 8),
        enc(M::Bnez, 0x1400_0000, BRANCH_Z_FIELDS, BRANCH_Z, "bnez", "!0r,!1t!0N", 8),
        enc(
            M::Bne,
            0x1400_0000,
            [Bb(25, 21), Bb(20, 16), Bb(15, 0), U],
            IS_BINARY_OP | IS_BRANCH | REG_USE01 | NEEDS_FIXUP,
            "bne",
            "!0r,!1r,!2t!0N",
            8,
        ),
        // Operands 0 and 1 stand for hi and lo, which have no encoding.
        enc(
            M::Div,
            0x0000_001a,
            [U, U, Bb(25, 21), Bb(20, 16)],
            IS_QUAD_OP | REG_USE23,
            "div",
            "!2r,!3r",
            4,
        ),
        enc(
            M::Ext,
            0x7c00_0000,
            [Bb(20, 16), Bb(25, 21), Bb(10, 6), Bb(15, 11)],
            IS_QUAD_OP | REG_DEF0 | REG_USE1,
            "ext",
            "!0r,!1r,!2d,!3D",
            8,
        ),
        enc(
            M::Jal,
            0x0c00_0000,
            [Bb(25, 0), U, U, U],
            IS_UNARY_OP | IS_BRANCH | REG_DEF_LR | NEEDS_FIXUP,
            "jal",
            "!0T(!0d)!0N",
            8,
        ),
        enc(
            M::Jalr,
            0x0000_0009,
            [Bb(15, 11), Bb(25, 21), U, U],
            IS_BINARY_OP | IS_BRANCH | REG_DEF0_USE1,
            "jalr",
            "!0r,!1r!0N",
            8,
        ),
        enc(
            M::Jr,
            0x0000_0008,
            [Bb(25, 21), U, U, U],
            IS_UNARY_OP | IS_BRANCH | REG_USE0 | NEEDS_FIXUP,
            "jr",
            "!0r!0N",
            8,
        ),
        enc(
            M::Lahi,
            0x3C00_0000,
            [Bb(20, 16), Bb(15, 0), U, U],
            IS_BINARY_OP | REG_DEF0 | NEEDS_FIXUP,
            "lahi/lui",
            "!0r,0x!1h(!1d)",
            4,
        ),
        enc(
            M::Lalo,
            0x3400_0000,
            RRI,
            IS_TERTIARY_OP | REG_DEF0_USE1 | NEEDS_FIXUP,
            "lalo/ori",
            RRI_FMT,
            4,
        ),
        enc(
            M::Lui,
            0x3C00_0000,
            [Bb(20, 16), Bb(15, 0), U, U],
            IS_BINARY_OP | REG_DEF0,
            "lui",
            "!0r,0x!1h(!1d)",
            4,
        ),
        enc(M::Lb, 0x8000_0000, MEM_FIELDS, LOAD, "lb", "!0r,!1d(!2r)", 4),
        enc(M::Lbu, 0x9000_0000, MEM_FIELDS, LOAD, "lbu", "!0r,!1d(!2r)", 4),
        enc(M::Lh, 0x8400_0000, MEM_FIELDS, LOAD, "lh", "!0r,!1d(!2r)", 4),
        enc(M::Lhu, 0x9400_0000, MEM_FIELDS, LOAD, "lhu", "!0r,!1d(!2r)", 4),
        enc(M::Lw, 0x8C00_0000, MEM_FIELDS, LOAD, "lw", "!0r,!1d(!2r)", 4),
        // hi and lo are tracked by the target's resource masks.
        enc(
            M::Mfhi,
            0x0000_0010,
            [Bb(15, 11), U, U, U],
            IS_UNARY_OP | REG_DEF0,
            "mfhi",
            "!0r",
            4,
        ),
        enc(
            M::Mflo,
            0x0000_0012,
            [Bb(15, 11), U, U, U],
            IS_UNARY_OP | REG_DEF0,
            "mflo",
            "!0r",
            4,
        ),
        enc(
            M::Move,
            0x0000_0025,
            [Bb(15, 11), Bb(25, 21), U, U],
            IS_BINARY_OP | REG_DEF0_USE1,
            "move",
            "!0r,!1r",
            4,
        ),
        enc(M::Movz, 0x0000_000a, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "movz", RRR_FMT, 4),
        enc(M::Mul, 0x7000_0002, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "mul", RRR_FMT, 4),
        enc(M::Nop, 0x0000_0000, [U; 4], NO_OPERAND, "nop", ";", 4),
        enc(M::Nor, 0x0000_0027, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "nor", RRR_FMT, 4),
        enc(M::Or, 0x0000_0025, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "or", RRR_FMT, 4),
        enc(M::Ori, 0x3400_0000, RRI, IS_TERTIARY_OP | REG_DEF0_USE1, "ori", RRI_FMT, 4),
        enc(
            M::Pref,
            0xCC00_0000,
            MEM_FIELDS,
            IS_TERTIARY_OP | REG_USE2,
            "pref",
            "!0d,!1d(!2r)",
            4,
        ),
        enc(M::Sb, 0xA000_0000, MEM_FIELDS, STORE, "sb", "!0r,!1d(!2r)", 4),
        enc(
            M::Seb,
            0x7c00_0420,
            [Bb(15, 11), Bb(20, 16), U, U],
            IS_BINARY_OP | REG_DEF0_USE1,
            "seb",
            "!0r,!1r",
            4,
        ),
        enc(
            M::Seh,
            0x7c00_0620,
            [Bb(15, 11), Bb(20, 16), U, U],
            IS_BINARY_OP | REG_DEF0_USE1,
            "seh",
            "!0r,!1r",
            4,
        ),
        enc(M::Sh, 0xA400_0000, MEM_FIELDS, STORE, "sh", "!0r,!1d(!2r)", 4),
        enc(M::Sll, 0x0000_0000, SHIFT, IS_TERTIARY_OP | REG_DEF0_USE1, "sll", "!0r,!1r,0x!2h(!2d)", 4),
        enc(M::Sllv, 0x0000_0004, SHIFTV, IS_TERTIARY_OP | REG_DEF0_USE12, "sllv", RRR_FMT, 4),
        enc(M::Slt, 0x0000_002a, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "slt", RRR_FMT, 4),
        enc(M::Slti, 0x2800_0000, RRI, IS_TERTIARY_OP | REG_DEF0_USE1, "slti", RRI_FMT, 4),
        enc(M::Sltu, 0x0000_002b, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "sltu", RRR_FMT, 4),
        enc(M::Sra, 0x0000_0003, SHIFT, IS_TERTIARY_OP | REG_DEF0_USE1, "sra", "!0r,!1r,0x!2h(!2d)", 4),
        enc(M::Srav, 0x0000_0007, SHIFTV, IS_TERTIARY_OP | REG_DEF0_USE12, "srav", RRR_FMT, 4),
        enc(M::Srl, 0x0000_0002, SHIFT, IS_TERTIARY_OP | REG_DEF0_USE1, "srl", "!0r,!1r,0x!2h(!2d)", 4),
        enc(M::Srlv, 0x0000_0006, SHIFTV, IS_TERTIARY_OP | REG_DEF0_USE12, "srlv", RRR_FMT, 4),
        enc(M::Subu, 0x0000_0023, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "subu", RRR_FMT, 4),
        enc(M::Sw, 0xAC00_0000, MEM_FIELDS, STORE, "sw", "!0r,!1d(!2r)", 4),
        enc(M::Xor, 0x0000_0026, RRR, IS_TERTIARY_OP | REG_DEF0_USE12, "xor", RRR_FMT, 4),
        enc(M::Xori, 0x3800_0000, RRI, IS_TERTIARY_OP | REG_DEF0_USE1, "xori", RRI_FMT, 4),
        enc(M::Fadds, 0x4600_0000, FP_SSS, FP_ARITH, "add.s", "!0s,!1s,!2s", 4),
        enc(M::Fsubs, 0x4600_0001, FP_SSS, FP_ARITH, "sub.s", "!0s,!1s,!2s", 4),
        enc(M::Fmuls, 0x4600_0002, FP_SSS, FP_ARITH, "mul.s", "!0s,!1s,!2s", 4),
        enc(M::Fdivs, 0x4600_0003, FP_SSS, FP_ARITH, "div.s", "!0s,!1s,!2s", 4),
        enc(M::Faddd, 0x4620_0000, FP_DDD, FP_ARITH, "add.d", "!0S,!1S,!2S", 4),
        enc(M::Fsubd, 0x4620_0001, FP_DDD, FP_ARITH, "sub.d", "!0S,!1S,!2S", 4),
        enc(M::Fmuld, 0x4620_0002, FP_DDD, FP_ARITH, "mul.d", "!0S,!1S,!2S", 4),
        enc(M::Fdivd, 0x4620_0003, FP_DDD, FP_ARITH, "div.d", "!0S,!1S,!2S", 4),
        enc(M::Fcvtsd, 0x4620_0020, [Sfp(10, 6), Dfp(15, 11), U, U], FP_CVT, "cvt.s.d", "!0s,!1S", 4),
        enc(M::Fcvtsw, 0x4680_0020, [Sfp(10, 6), Sfp(15, 11), U, U], FP_CVT, "cvt.s.w", "!0s,!1s", 4),
        enc(M::Fcvtds, 0x4600_0021, [Dfp(10, 6), Sfp(15, 11), U, U], FP_CVT, "cvt.d.s", "!0S,!1s", 4),
        enc(M::Fcvtdw, 0x4680_0021, [Dfp(10, 6), Sfp(15, 11), U, U], FP_CVT, "cvt.d.w", "!0S,!1s", 4),
        enc(M::Fcvtws, 0x4600_0024, [Sfp(10, 6), Sfp(15, 11), U, U], FP_CVT, "cvt.w.s", "!0s,!1s", 4),
        enc(M::Fcvtwd, 0x4620_0024, [Sfp(10, 6), Dfp(15, 11), U, U], FP_CVT, "cvt.w.d", "!0s,!1S", 4),
        enc(M::Fmovs, 0x4600_0006, [Sfp(10, 6), Sfp(15, 11), U, U], FP_CVT, "mov.s", "!0s,!1s", 4),
        enc(M::Fmovd, 0x4620_0006, [Dfp(10, 6), Dfp(15, 11), U, U], FP_CVT, "mov.d", "!0S,!1S", 4),
        enc(
            M::Flwc1,
            0xC400_0000,
            [Sfp(20, 16), Bb(15, 0), Bb(25, 21), U],
            LOAD,
            "lwc1",
            "!0s,!1d(!2r)",
            4,
        ),
        enc(
            M::Fldc1,
            0xD400_0000,
            [Dfp(20, 16), Bb(15, 0), Bb(25, 21), U],
            LOAD,
            "ldc1",
            "!0S,!1d(!2r)",
            4,
        ),
        enc(
            M::Fswc1,
            0xE400_0000,
            [Sfp(20, 16), Bb(15, 0), Bb(25, 21), U],
            STORE,
            "swc1",
            "!0s,!1d(!2r)",
            4,
        ),
        enc(
            M::Fsdc1,
            0xF400_0000,
            [Dfp(20, 16), Bb(15, 0), Bb(25, 21), U],
            STORE,
            "sdc1",
            "!0S,!1d(!2r)",
            4,
        ),
        enc(
            M::Mfc1,
            0x4400_0000,
            [Bb(20, 16), Sfp(15, 11), U, U],
            IS_BINARY_OP | REG_DEF0_USE1,
            "mfc1",
            "!0r,!1s",
            4,
        ),
        enc(
            M::Mtc1,
            0x4480_0000,
            [Bb(20, 16), Sfp(15, 11), U, U],
            IS_BINARY_OP | REG_USE0 | REG_DEF1,
            "mtc1",
            "!0r,!1s",
            4,
        ),
        enc(
            M::Delta,
            0x27e0_0000,
            [Bb(20, 16), Bb(15, 0), U, U],
            IS_QUAD_OP | REG_DEF0 | REG_USE_LR | NEEDS_FIXUP,
            "addiu",
            "!0r,ra,0x!1h(!1d)",
            4,
        ),
        enc(
            M::DeltaHi,
            0x3C00_0000,
            [Bb(20, 16), Bb(15, 0), U, U],
            IS_QUAD_OP | REG_DEF0 | NEEDS_FIXUP,
            "lui",
            "!0r,0x!1h(!1d)",
            4,
        ),
        enc(
            M::DeltaLo,
            0x3400_0000,
            [Blt5_2(16, 21), Bb(15, 0), U, U],
            IS_QUAD_OP | REG_DEF0_USE0 | NEEDS_FIXUP,
            "ori",
            "!0r,!0r,0x!1h(!1d)",
            4,
        ),
        enc(
            M::CurrPC,
            0x0411_0001,
            [U; 4],
            NO_OPERAND | IS_BRANCH | REG_DEF_LR,
            "addiu",
            "ra,pc,8",
            4,
        ),
        enc(M::Sync, 0x0000_000f, [Bb(10, 6), U, U, U], IS_UNARY_OP, "sync", ";", 4),
        enc(M::Undefined, 0x6400_0000, [U; 4], NO_OPERAND, "undefined", "", 4),
    ]
};

static_assertions::const_assert!(ENCODING_MAP.len() == MipsOpcode::COUNT);

impl MipsOpcode {
    pub(super) fn encoding(self) -> &'static Encoding {
        &ENCODING_MAP[self as usize]
    }
}

/// The names of the core registers, by number.
pub(super) const CORE_REG_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp",
    "ra",
];

const FP_REG_MASK: i32 = 0x1f;

fn blt(value: u32, end: u8, start: u8) -> u32 {
    if start == 0 && end == 31 {
        return value;
    }
    let mask = (1u64 << (end + 1)) - 1;
    ((u64::from(value) << start) & mask) as u32
}

/// Encode `op` with `operands` as an instruction word.
pub(super) fn encode_operands(op: MipsOpcode, operands: &[i32; 4]) -> u32 {
    let encoder = op.encoding();
    let mut bits = encoder.skeleton;
    for (field, &operand) in encoder.fields.iter().zip(operands.iter()) {
        let operand = operand as u32;
        bits |= match *field {
            Field::Unused => 0,
            Field::BitBlt(end, start) => blt(operand, end, start),
            Field::Sfp(end, start) => blt(operand & FP_REG_MASK as u32, end, start),
            Field::Dfp(end, start) => {
                debug_assert_eq!(operand & 1, 0, "odd double register in {op:?}");
                blt(operand & FP_REG_MASK as u32, end, start)
            }
            Field::Blt5_2(end, start) => {
                let v = operand & 0x1f;
                (v << start) | (v << end)
            }
        };
    }
    bits
}

/// Expand the `!` escapes in `fmt` with `lir`'s operands. An escape is `!` followed by an operand
/// number and a format letter; `!!` is a literal `!`.
pub(super) fn build_insn_string(fmt: &str, lir: &Lir<MipsOpcode>, base_addr: u32) -> String {
    let mut buf = String::new();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '!' {
            buf.push(c);
            continue;
        }
        let Some(c) = chars.next() else { break };
        if c == '!' {
            buf.push('!');
            continue;
        }
        let Some(kind) = chars.next() else { break };
        let Some(&operand) = c.to_digit(10).and_then(|i| lir.operands.get(i as usize)) else {
            buf.push_str("DecodeError");
            continue;
        };
        match kind {
            'b' => write!(buf, "{:04b}", operand & 0xf),
            's' | 'S' => write!(buf, "$f{}", operand & FP_REG_MASK),
            'h' => write!(buf, "{operand:04x}"),
            'M' | 'd' => write!(buf, "{operand}"),
            'D' => write!(buf, "{}", operand.wrapping_add(1)),
            'E' => write!(buf, "{}", operand.wrapping_mul(4)),
            'F' => write!(buf, "{}", operand.wrapping_mul(2)),
            't' => {
                let addr = base_addr
                    .wrapping_add(lir.offset)
                    .wrapping_add(4)
                    .wrapping_add((operand << 2) as u32);
                match lir.target {
                    Some(t) => write!(buf, "0x{addr:08x} (L{})", t.to_u32()),
                    None => write!(buf, "0x{addr:08x} (L?)"),
                }
            }
            'T' => write!(buf, "0x{:08x}", operand as u32),
            'N' => write!(buf, ";  nop"),
            'r' => match usize::try_from(operand).ok().and_then(|i| CORE_REG_NAMES.get(i)) {
                Some(name) => write!(buf, "{name}"),
                None => write!(buf, "DecodeError"),
            },
            _ => write!(buf, "DecodeError"),
        }
        .ok();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::lir::LirOp;
    use strum::IntoEnumIterator;

    fn lir(op: MipsOpcode, operands: [i32; 4]) -> Lir<MipsOpcode> {
        Lir::new(0, LirOp::Target(op), operands)
    }

    #[test]
    fn table_order() {
        for op in MipsOpcode::iter() {
            assert_eq!(op.encoding().opcode, op);
        }
    }

    #[test]
    fn encodings() {
        // addu v0,a0,a1
        assert_eq!(encode_operands(MipsOpcode::Addu, &[2, 4, 5, 0]), 0x0085_1021);
        // addiu sp,sp,-16
        assert_eq!(
            encode_operands(MipsOpcode::Addiu, &[29, 29, -16, 0]),
            0x27bd_fff0
        );
        // lw ra,12(sp)
        assert_eq!(encode_operands(MipsOpcode::Lw, &[31, 12, 29, 0]), 0x8fbf_000c);
        // sll t0,t1,2
        assert_eq!(encode_operands(MipsOpcode::Sll, &[8, 9, 2, 0]), 0x0009_4080);
        // add.d $f0,$f2,$f4, with doubles as operands.
        assert_eq!(
            encode_operands(MipsOpcode::Faddd, &[96, 98, 100, 0]),
            0x4624_1000
        );
        // ori at,at,0x10: the register goes in both rs and rt.
        assert_eq!(
            encode_operands(MipsOpcode::DeltaLo, &[1, 0x10, 0, 0]),
            0x3421_0010
        );
        assert_eq!(
            encode_operands(MipsOpcode::Data32, &[-1, 0, 0, 0]),
            0xffff_ffff
        );
    }

    #[test]
    fn insn_strings() {
        let l = lir(MipsOpcode::Addiu, [4, 0, -5, 0]);
        let e = MipsOpcode::Addiu.encoding();
        assert_eq!(build_insn_string(e.fmt, &l, 0), "a0,zero,0xfffffffb(-5)");
        let l = lir(MipsOpcode::Ext, [2, 3, 4, 7]);
        assert_eq!(build_insn_string(MipsOpcode::Ext.encoding().fmt, &l, 0), "v0,v1,4,8");
        let l = lir(MipsOpcode::Fmovs, [33, 35, 0, 0]);
        assert_eq!(build_insn_string(MipsOpcode::Fmovs.encoding().fmt, &l, 0), "$f1,$f3");
        let mut l = lir(MipsOpcode::B, [3, 0, 0, 0]);
        l.offset = 8;
        assert_eq!(
            build_insn_string(MipsOpcode::B.encoding().fmt, &l, 0x100),
            "0x00000118 (L?);  nop"
        );
        assert_eq!(
            build_insn_string("!0b !! !0q !9d", &lir(MipsOpcode::Nop, [5, 0, 0, 0]), 0),
            "0101 ! DecodeError DecodeError"
        );
    }
}
