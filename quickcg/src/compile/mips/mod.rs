//! The MIPS32 (o32, little-endian) backend.
//!
//! `s0` holds the suspend count and `s1` the thread pointer: both are reserved, along with the
//! registers the ABI gives special meanings. `ra` is always spilled.

use super::{
    codegen::Codegen,
    lir::{Lir, LirIdx, LirOp, REG_DEF_LR, REG_DEF_SP, REG_USE_LR, REG_USE_SP},
    method::VReg,
    regalloc::{PhysReg, ValueLocation},
    AssemblerStatus, CompilationError, OpSize, TargetCodegen,
};

mod assemble;
mod call;
mod encoding;
mod utility;

pub use encoding::MipsOpcode;

pub const ZERO: PhysReg = PhysReg::Core(0);
pub const AT: PhysReg = PhysReg::Core(1);
pub const V0: PhysReg = PhysReg::Core(2);
pub const V1: PhysReg = PhysReg::Core(3);
pub const A0: PhysReg = PhysReg::Core(4);
pub const A1: PhysReg = PhysReg::Core(5);
pub const A2: PhysReg = PhysReg::Core(6);
pub const A3: PhysReg = PhysReg::Core(7);
pub const T0: PhysReg = PhysReg::Core(8);
pub const T1: PhysReg = PhysReg::Core(9);
pub const T2: PhysReg = PhysReg::Core(10);
pub const T3: PhysReg = PhysReg::Core(11);
pub const T4: PhysReg = PhysReg::Core(12);
pub const T5: PhysReg = PhysReg::Core(13);
pub const T6: PhysReg = PhysReg::Core(14);
pub const T7: PhysReg = PhysReg::Core(15);
pub const S0: PhysReg = PhysReg::Core(16);
pub const S1: PhysReg = PhysReg::Core(17);
pub const S2: PhysReg = PhysReg::Core(18);
pub const S3: PhysReg = PhysReg::Core(19);
pub const S4: PhysReg = PhysReg::Core(20);
pub const S5: PhysReg = PhysReg::Core(21);
pub const S6: PhysReg = PhysReg::Core(22);
pub const S7: PhysReg = PhysReg::Core(23);
pub const T8: PhysReg = PhysReg::Core(24);
pub const T9: PhysReg = PhysReg::Core(25);
pub const K0: PhysReg = PhysReg::Core(26);
pub const K1: PhysReg = PhysReg::Core(27);
pub const GP: PhysReg = PhysReg::Core(28);
pub const SP: PhysReg = PhysReg::Core(29);
pub const FP: PhysReg = PhysReg::Core(30);
pub const RA: PhysReg = PhysReg::Core(31);

/// The suspend count.
pub const SUSPEND: PhysReg = S0;
/// The current thread.
pub const SELF: PhysReg = S1;

pub const F0: PhysReg = PhysReg::FloatSingle(0);
pub const F1: PhysReg = PhysReg::FloatSingle(1);
pub const F2: PhysReg = PhysReg::FloatSingle(2);
pub const F3: PhysReg = PhysReg::FloatSingle(3);

const fn core_regs<const N: usize>(first: u8) -> [PhysReg; N] {
    let mut regs = [PhysReg::Core(0); N];
    let mut i = 0;
    while i < N {
        regs[i] = PhysReg::Core(first + i as u8);
        i += 1;
    }
    regs
}

const fn fp_regs<const N: usize>() -> [PhysReg; N] {
    let mut regs = [PhysReg::FloatSingle(0); N];
    let mut i = 0;
    while i < N {
        regs[i] = PhysReg::FloatSingle(i as u8);
        i += 1;
    }
    regs
}

const CORE_REGS: [PhysReg; 32] = core_regs(0);
const FP_REGS: [PhysReg; 16] = fp_regs();
const RESERVED_REGS: [PhysReg; 9] = [ZERO, AT, S0, S1, K0, K1, GP, SP, RA];
const TEMP_REGS: [PhysReg; 31] = [
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    T8,
    PhysReg::FloatSingle(0),
    PhysReg::FloatSingle(1),
    PhysReg::FloatSingle(2),
    PhysReg::FloatSingle(3),
    PhysReg::FloatSingle(4),
    PhysReg::FloatSingle(5),
    PhysReg::FloatSingle(6),
    PhysReg::FloatSingle(7),
    PhysReg::FloatSingle(8),
    PhysReg::FloatSingle(9),
    PhysReg::FloatSingle(10),
    PhysReg::FloatSingle(11),
    PhysReg::FloatSingle(12),
    PhysReg::FloatSingle(13),
    PhysReg::FloatSingle(14),
    PhysReg::FloatSingle(15),
];
const CALL_TEMPS: [PhysReg; 4] = [A0, A1, A2, A3];
const CALLER_SAVE: [PhysReg; 39] = {
    let core = [
        ZERO, AT, V0, V1, A0, A1, A2, A3, T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, K0, K1, GP, FP,
        RA,
    ];
    let fp: [PhysReg; 16] = fp_regs();
    let mut regs = [ZERO; 39];
    let mut i = 0;
    while i < core.len() {
        regs[i] = core[i];
        i += 1;
    }
    let mut j = 0;
    while j < 16 {
        regs[i + j] = fp[j];
        j += 1;
    }
    regs
};

/// The multiply/divide result registers, above the FP register bits.
const ENCODE_HI: u64 = 1 << 48;
const ENCODE_LO: u64 = 1 << 49;

/// The MIPS32 backend.
#[derive(Debug)]
pub struct MipsTarget {
    /// Is the code to run on a multiprocessor? If not, memory barriers are elided.
    smp: bool,
}

impl MipsTarget {
    pub fn new(smp: bool) -> Self {
        Self { smp }
    }
}

impl From<MipsOpcode> for LirOp<MipsOpcode> {
    fn from(op: MipsOpcode) -> Self {
        LirOp::Target(op)
    }
}

impl TargetCodegen for MipsTarget {
    type Opcode = MipsOpcode;
    const DATA_OPCODE: MipsOpcode = MipsOpcode::Data32;

    const CORE_REGS: &'static [PhysReg] = &CORE_REGS;
    const FP_REGS: &'static [PhysReg] = &FP_REGS;
    const RESERVED_REGS: &'static [PhysReg] = &RESERVED_REGS;
    const TEMP_REGS: &'static [PhysReg] = &TEMP_REGS;
    const CALL_TEMPS: &'static [PhysReg] = &CALL_TEMPS;
    const CALLER_SAVE: &'static [PhysReg] = &CALLER_SAVE;
    const SP: PhysReg = SP;

    fn loc_c_return() -> ValueLocation {
        ValueLocation::in_reg(V0)
    }

    fn loc_c_return_wide() -> ValueLocation {
        ValueLocation::in_reg_pair(V0, V1)
    }

    fn loc_c_return_float() -> ValueLocation {
        ValueLocation::in_reg(F0)
    }

    fn loc_c_return_double() -> ValueLocation {
        ValueLocation::in_reg_pair(F0, F1)
    }

    fn lock_return(cg: &mut Codegen<Self>, reg: PhysReg) -> Result<(), CompilationError> {
        cg.pool.mark_in_use(reg);
        Ok(())
    }

    fn adjust_spill_mask(cg: &mut Codegen<Self>) {
        cg.core_spill_mask |= 1 << RA.num();
        cg.num_core_spills += 1;
    }

    fn mark_preserved_single(
        _cg: &mut Codegen<Self>,
        _vreg: VReg,
        _reg: PhysReg,
    ) -> Result<(), CompilationError> {
        Err(CompilationError::General(
            "No support yet for promoted FP regs".into(),
        ))
    }

    fn insn_flags(op: MipsOpcode) -> u64 {
        op.encoding().flags
    }

    fn insn_size(op: MipsOpcode) -> u32 {
        op.encoding().size
    }

    fn reg_mask(reg: PhysReg) -> u64 {
        match reg {
            PhysReg::Core(n) => 1 << n,
            PhysReg::FloatSingle(n) => 1 << (32 + u32::from(n)),
            PhysReg::FloatDouble(lo, _) => 3 << (32 + u32::from(lo)),
        }
    }

    fn setup_target_resource_masks(lir: &mut Lir<MipsOpcode>) {
        let LirOp::Target(op) = lir.op else { return };
        let flags = op.encoding().flags;
        if flags & REG_DEF_SP != 0 {
            lir.def_mask |= Self::reg_mask(SP);
        }
        if flags & REG_USE_SP != 0 {
            lir.use_mask |= Self::reg_mask(SP);
        }
        if flags & REG_DEF_LR != 0 {
            lir.def_mask |= Self::reg_mask(RA);
        }
        if flags & REG_USE_LR != 0 {
            lir.use_mask |= Self::reg_mask(RA);
        }
        match op {
            MipsOpcode::Div => lir.def_mask |= ENCODE_HI | ENCODE_LO,
            MipsOpcode::Mfhi => lir.use_mask |= ENCODE_HI,
            MipsOpcode::Mflo => lir.use_mask |= ENCODE_LO,
            _ => (),
        }
    }

    fn dump_insn(lir: &Lir<MipsOpcode>, base_addr: u32) -> String {
        let LirOp::Target(op) = lir.op else {
            return String::new();
        };
        let e = op.encoding();
        format!(
            "{:05x}: {:<9}{}{}",
            base_addr.wrapping_add(lir.offset),
            encoding::build_insn_string(e.name, lir, base_addr),
            encoding::build_insn_string(e.fmt, lir, base_addr),
            if lir.is_nop { "(nop)" } else { "" }
        )
    }

    fn reg_name(reg: PhysReg) -> String {
        match reg {
            PhysReg::Core(n) => encoding::CORE_REG_NAMES[usize::from(n & 0x1f)].to_owned(),
            PhysReg::FloatSingle(n) | PhysReg::FloatDouble(n, _) => format!("$f{n}"),
        }
    }

    fn op_reg_copy_no_insert(
        cg: &mut Codegen<Self>,
        dest: PhysReg,
        src: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        utility::op_reg_copy_no_insert(cg, dest, src)
    }

    fn op_reg_copy_wide(
        cg: &mut Codegen<Self>,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
        src_lo: PhysReg,
        src_hi: PhysReg,
    ) -> Result<(), CompilationError> {
        utility::op_reg_copy_wide(cg, dest_lo, dest_hi, src_lo, src_hi)
    }

    fn load_constant_no_clobber(
        cg: &mut Codegen<Self>,
        dest: PhysReg,
        value: i32,
    ) -> Result<LirIdx, CompilationError> {
        utility::load_constant_no_clobber(cg, dest, value)
    }

    fn load_constant_wide(
        cg: &mut Codegen<Self>,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
        value: i64,
    ) -> Result<LirIdx, CompilationError> {
        let res = utility::load_constant_no_clobber(cg, dest_lo, value as i32)?;
        utility::load_constant_no_clobber(cg, dest_hi, (value >> 32) as i32)?;
        Ok(res)
    }

    fn load_base_disp(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        dest: PhysReg,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError> {
        utility::load_base_disp_body(cg, base, disp, dest, None, size)
    }

    fn load_base_disp_wide(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        utility::load_base_disp_body(cg, base, disp, dest_lo, Some(dest_hi), OpSize::Long)
    }

    fn store_base_disp(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        src: PhysReg,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError> {
        utility::store_base_disp_body(cg, base, disp, src, None, size)
    }

    fn store_base_disp_wide(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        src_lo: PhysReg,
        src_hi: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        utility::store_base_disp_body(cg, base, disp, src_lo, Some(src_hi), OpSize::Long)
    }

    fn inexpensive_constant_int(value: i32) -> bool {
        value == 0 || (0..=65535).contains(&value) || (-32768..0).contains(&value)
    }

    fn inexpensive_constant_float(_value: i32) -> bool {
        false
    }

    fn inexpensive_constant_long(_value: i64) -> bool {
        false
    }

    fn inexpensive_constant_double(_value: i64) -> bool {
        false
    }

    fn assemble_instructions(
        cg: &mut Codegen<Self>,
        start_addr: u32,
    ) -> Result<AssemblerStatus, CompilationError> {
        assemble::assemble_instructions(cg, start_addr)
    }

    fn switch_table_base(anchor_offset: u32) -> u32 {
        anchor_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::codegen::tests::mips_codegen;

    #[test]
    fn register_sets() {
        assert!(CALLER_SAVE.contains(&PhysReg::FloatSingle(15)));
        assert!(CALLER_SAVE.contains(&RA));
        assert!(!CALLER_SAVE.contains(&S2));
        for r in RESERVED_REGS {
            assert!(!TEMP_REGS.contains(&r));
        }
        assert_eq!(MipsTarget::reg_mask(PhysReg::FloatDouble(2, 3)), 3 << 34);
        assert_eq!(MipsTarget::reg_name(RA), "ra");
        assert_eq!(MipsTarget::reg_name(PhysReg::FloatDouble(4, 5)), "$f4");
    }

    #[test]
    fn inexpensive_constants() {
        assert!(MipsTarget::inexpensive_constant_int(0));
        assert!(MipsTarget::inexpensive_constant_int(65535));
        assert!(MipsTarget::inexpensive_constant_int(-32768));
        assert!(!MipsTarget::inexpensive_constant_int(65536));
        assert!(!MipsTarget::inexpensive_constant_int(-32769));
        assert!(!MipsTarget::inexpensive_constant_long(0));
    }

    #[test]
    fn target_masks() {
        let mut cg = mips_codegen(1, vec![]);
        let d = cg
            .new_lir4(MipsOpcode::Delta, V0.to_operand(), 0, 0, 0)
            .unwrap();
        assert_eq!(cg.lirs[d].use_mask, MipsTarget::reg_mask(RA));
        assert_eq!(cg.lirs[d].def_mask, MipsTarget::reg_mask(V0));
        let x = cg
            .new_lir4(MipsOpcode::Div, 0, 0, A0.to_operand(), A1.to_operand())
            .unwrap();
        assert_eq!(cg.lirs[x].def_mask, ENCODE_HI | ENCODE_LO);
        let x = cg.new_lir1(MipsOpcode::Mflo, V0.to_operand()).unwrap();
        assert_eq!(cg.lirs[x].use_mask, ENCODE_LO);
    }

    #[test]
    fn listing() {
        let mut cg = mips_codegen(1, vec![]);
        let x = cg
            .new_lir3(MipsOpcode::Addiu, SP.to_operand(), SP.to_operand(), -16)
            .unwrap();
        cg.lirs[x].offset = 0x24;
        assert_eq!(
            MipsTarget::dump_insn(&cg.lirs[x], 0),
            "00024: addiu    sp,sp,0xfffffff0(-16)"
        );
        cg.lirs.nop(x);
        assert_eq!(
            MipsTarget::dump_insn(&cg.lirs[x], 0x100),
            "00124: addiu    sp,sp,0xfffffff0(-16)(nop)"
        );
        let x = cg.new_lir0(MipsOpcode::CurrPC).unwrap();
        assert_eq!(MipsTarget::dump_insn(&cg.lirs[x], 0), "00000: addiu    ra,pc,8");
    }
}
