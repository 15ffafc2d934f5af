//! Instruction selection for the basic operations that the machine-independent code generator
//! needs: copies, constants, arithmetic, compares and memory accesses.

use super::{MipsOpcode, MipsTarget, RA, SP, ZERO};
use crate::compile::{
    codegen::Codegen, lir::LirIdx, regalloc::PhysReg, CompilationError, ConditionCode, OpKind,
    OpSize, Opt,
};

/// The offsets of the two words of a 64-bit value in memory.
const LOWORD_OFFSET: i32 = 0;
const HIWORD_OFFSET: i32 = 4;

fn is_simm16(v: i32) -> bool {
    (-32768..=32767).contains(&v)
}

/// Do both words of a 64-bit access at `v` have 16-bit displacements?
fn is_simm16_2word(v: i32) -> bool {
    (-32768..=32763).contains(&v)
}

fn is_uimm16(v: i32) -> bool {
    (0..=65535).contains(&v)
}

/// Resolve the registers of a 64-bit value: a double, an even/odd pair of singles, or a pair of
/// core registers.
fn wide_pair(
    lo: PhysReg,
    hi: Option<PhysReg>,
) -> Result<(PhysReg, PhysReg), CompilationError> {
    match (lo, hi) {
        (PhysReg::FloatDouble(l, h), _) => Ok((PhysReg::FloatSingle(l), PhysReg::FloatSingle(h))),
        (PhysReg::FloatSingle(l), Some(h @ PhysReg::FloatSingle(hn))) if hn == l + 1 => Ok((lo, h)),
        (PhysReg::Core(_), Some(h @ PhysReg::Core(_))) => Ok((lo, h)),
        _ => Err(CompilationError::InternalError(format!(
            "{lo} and {hi:?} do not form a 64-bit register pair"
        ))),
    }
}

pub(super) fn op_reg_copy_no_insert(
    cg: &mut Codegen<MipsTarget>,
    dest: PhysReg,
    src: PhysReg,
) -> Result<LirIdx, CompilationError> {
    let (opcode, a, b) = match (dest, src) {
        (PhysReg::Core(_), PhysReg::Core(_)) => (MipsOpcode::Move, dest, src),
        (PhysReg::FloatDouble(..), PhysReg::FloatDouble(..)) => (MipsOpcode::Fmovd, dest, src),
        (PhysReg::FloatSingle(_), PhysReg::FloatSingle(_)) => (MipsOpcode::Fmovs, dest, src),
        // The core register always comes first in mtc1/mfc1.
        (PhysReg::FloatSingle(_), PhysReg::Core(_)) => (MipsOpcode::Mtc1, src, dest),
        (PhysReg::Core(_), PhysReg::FloatSingle(_)) => (MipsOpcode::Mfc1, dest, src),
        _ => {
            return Err(CompilationError::InternalError(format!(
                "cannot copy {src} to {dest}"
            )))
        }
    };
    let idx = cg.raw_lir(
        cg.current_dalvik_offset,
        opcode.into(),
        [a.to_operand(), b.to_operand(), 0, 0],
        None,
    )?;
    if dest == src && cg.opts.enabled(Opt::SafeOptimizations) {
        cg.lirs.nop(idx);
    }
    Ok(idx)
}

pub(super) fn op_reg_copy_wide(
    cg: &mut Codegen<MipsTarget>,
    dest_lo: PhysReg,
    dest_hi: PhysReg,
    src_lo: PhysReg,
    src_hi: PhysReg,
) -> Result<(), CompilationError> {
    if dest_lo.is_fp() != dest_hi.is_fp() || src_lo.is_fp() != src_hi.is_fp() {
        return Err(CompilationError::InternalError(format!(
            "mixed register classes in the copy {src_lo}:{src_hi} -> {dest_lo}:{dest_hi}"
        )));
    }
    match (dest_lo.is_fp(), src_lo.is_fp()) {
        (true, true) => {
            cg.op_reg_copy(
                PhysReg::s2d(dest_lo, dest_hi),
                PhysReg::s2d(src_lo, src_hi),
            )?;
        }
        (true, false) => {
            cg.new_lir2(MipsOpcode::Mtc1, src_lo.to_operand(), dest_lo.to_operand())?;
            cg.new_lir2(MipsOpcode::Mtc1, src_hi.to_operand(), dest_hi.to_operand())?;
        }
        (false, true) => {
            cg.new_lir2(MipsOpcode::Mfc1, dest_lo.to_operand(), src_lo.to_operand())?;
            cg.new_lir2(MipsOpcode::Mfc1, dest_hi.to_operand(), src_hi.to_operand())?;
        }
        (false, false) => {
            if src_hi == dest_lo {
                cg.op_reg_copy(dest_hi, src_hi)?;
                cg.op_reg_copy(dest_lo, src_lo)?;
            } else {
                cg.op_reg_copy(dest_lo, src_lo)?;
                cg.op_reg_copy(dest_hi, src_hi)?;
            }
        }
    }
    Ok(())
}

/// Materialise `value` with the cheapest of `move`, `ori`, `addiu` and `lui`/`ori`. FP
/// destinations are loaded through a core temp.
pub(super) fn load_constant_no_clobber(
    cg: &mut Codegen<MipsTarget>,
    dest: PhysReg,
    value: i32,
) -> Result<LirIdx, CompilationError> {
    let r = if dest.is_fp() {
        cg.pool.alloc_temp()?
    } else {
        dest
    };
    let ro = r.to_operand();
    let res = if value == 0 {
        cg.new_lir2(MipsOpcode::Move, ro, ZERO.to_operand())?
    } else if (1..=65535).contains(&value) {
        cg.new_lir3(MipsOpcode::Ori, ro, ZERO.to_operand(), value)?
    } else if (-32768..0).contains(&value) {
        cg.new_lir3(MipsOpcode::Addiu, ro, ZERO.to_operand(), value)?
    } else {
        let res = cg.new_lir2(MipsOpcode::Lui, ro, (value >> 16) & 0xffff)?;
        if value & 0xffff != 0 {
            cg.new_lir3(MipsOpcode::Ori, ro, ro, value & 0xffff)?;
        }
        res
    };
    if dest.is_fp() {
        cg.new_lir2(MipsOpcode::Mtc1, ro, dest.to_operand())?;
        cg.pool.free_temp(r)?;
    }
    Ok(res)
}

/// Load `size` bytes from `base + disp` into `dest` (and `dest_hi` for 64-bit values). Accesses
/// to the frame are annotated with the Dalvik register they touch. Returns the (first) load.
pub(super) fn load_base_disp_body(
    cg: &mut Codegen<MipsTarget>,
    base: PhysReg,
    disp: i32,
    dest: PhysReg,
    dest_hi: Option<PhysReg>,
    size: OpSize,
) -> Result<LirIdx, CompilationError> {
    let (opcode, pair) = match size {
        OpSize::Long | OpSize::Double => {
            debug_assert_eq!(disp & 3, 0);
            (if dest.is_fp() { MipsOpcode::Flwc1 } else { MipsOpcode::Lw }, true)
        }
        OpSize::Word | OpSize::Single => {
            debug_assert_eq!(disp & 3, 0);
            (if dest.is_fp() { MipsOpcode::Flwc1 } else { MipsOpcode::Lw }, false)
        }
        OpSize::UnsignedHalf => (MipsOpcode::Lhu, false),
        OpSize::SignedHalf => (MipsOpcode::Lh, false),
        OpSize::UnsignedByte => (MipsOpcode::Lbu, false),
        OpSize::SignedByte => (MipsOpcode::Lb, false),
    };
    let (load, load2) = if pair {
        let (lo, hi) = wide_pair(dest, dest_hi)?;
        if is_simm16_2word(disp) {
            let bo = base.to_operand();
            let l1 = cg.new_lir3(opcode, lo.to_operand(), disp + LOWORD_OFFSET, bo)?;
            let l2 = cg.new_lir3(opcode, hi.to_operand(), disp + HIWORD_OFFSET, bo)?;
            (l1, Some(l2))
        } else {
            let tmp = cg.pool.alloc_temp()?;
            cg.op_reg_reg_imm(OpKind::Add, tmp, base, disp)?;
            let to = tmp.to_operand();
            let l1 = cg.new_lir3(opcode, lo.to_operand(), LOWORD_OFFSET, to)?;
            let l2 = cg.new_lir3(opcode, hi.to_operand(), HIWORD_OFFSET, to)?;
            cg.pool.free_temp(tmp)?;
            (l1, Some(l2))
        }
    } else if is_simm16(disp) {
        let l = cg.new_lir3(opcode, dest.to_operand(), disp, base.to_operand())?;
        (l, None)
    } else {
        // The address can be formed in the destination unless it is still needed as the base, or
        // cannot hold an address.
        let tmp = if base == dest || dest.is_fp() {
            cg.pool.alloc_temp()?
        } else {
            dest
        };
        cg.op_reg_reg_imm(OpKind::Add, tmp, base, disp)?;
        let l = cg.new_lir3(opcode, dest.to_operand(), 0, tmp.to_operand())?;
        if tmp != dest {
            cg.pool.free_temp(tmp)?;
        }
        (l, None)
    };
    if base == SP {
        cg.annotate_dalvik_reg_access(load, (disp + LOWORD_OFFSET) >> 2, true, pair);
        if let Some(l2) = load2 {
            cg.annotate_dalvik_reg_access(l2, (disp + HIWORD_OFFSET) >> 2, true, pair);
        }
    }
    Ok(load)
}

/// Store `size` bytes of `src` (and `src_hi` for 64-bit values) to `base + disp`. Returns the
/// first instruction generated.
pub(super) fn store_base_disp_body(
    cg: &mut Codegen<MipsTarget>,
    base: PhysReg,
    disp: i32,
    src: PhysReg,
    src_hi: Option<PhysReg>,
    size: OpSize,
) -> Result<LirIdx, CompilationError> {
    let (opcode, pair) = match size {
        OpSize::Long | OpSize::Double => {
            debug_assert_eq!(disp & 3, 0);
            (if src.is_fp() { MipsOpcode::Fswc1 } else { MipsOpcode::Sw }, true)
        }
        OpSize::Word | OpSize::Single => {
            debug_assert_eq!(disp & 3, 0);
            (if src.is_fp() { MipsOpcode::Fswc1 } else { MipsOpcode::Sw }, false)
        }
        OpSize::UnsignedHalf | OpSize::SignedHalf => (MipsOpcode::Sh, false),
        OpSize::UnsignedByte | OpSize::SignedByte => (MipsOpcode::Sb, false),
    };
    let regs = if pair {
        let (lo, hi) = wide_pair(src, src_hi)?;
        vec![(lo, LOWORD_OFFSET), (hi, HIWORD_OFFSET)]
    } else {
        vec![(src, 0)]
    };
    let short_form = if pair {
        is_simm16_2word(disp)
    } else {
        is_simm16(disp)
    };
    let mut stores = Vec::with_capacity(2);
    let res = if short_form {
        for (r, off) in regs {
            stores.push(cg.new_lir3(opcode, r.to_operand(), disp + off, base.to_operand())?);
        }
        stores[0]
    } else {
        let scratch = cg.pool.alloc_temp()?;
        let res = cg.op_reg_reg_imm(OpKind::Add, scratch, base, disp)?;
        for (r, off) in regs {
            stores.push(cg.new_lir3(opcode, r.to_operand(), off, scratch.to_operand())?);
        }
        cg.pool.free_temp(scratch)?;
        res
    };
    if base == SP {
        for (i, st) in stores.into_iter().enumerate() {
            let off = if i == 0 { LOWORD_OFFSET } else { HIWORD_OFFSET };
            cg.annotate_dalvik_reg_access(st, (disp + off) >> 2, false, pair);
        }
    }
    Ok(res)
}

impl Codegen<MipsTarget> {
    /// `dest = src1 op value`, using the immediate form of `op` if `value` fits.
    pub fn op_reg_reg_imm(
        &mut self,
        op: OpKind,
        dest: PhysReg,
        src1: PhysReg,
        value: i32,
    ) -> Result<LirIdx, CompilationError> {
        let (opcode, value, short_form) = match op {
            OpKind::Add if is_simm16(value) => (MipsOpcode::Addiu, value, true),
            OpKind::Add => (MipsOpcode::Addu, value, false),
            OpKind::Sub if is_simm16(value.wrapping_neg()) => {
                (MipsOpcode::Addiu, value.wrapping_neg(), true)
            }
            OpKind::Sub => (MipsOpcode::Subu, value, false),
            OpKind::Lsl | OpKind::Lsr | OpKind::Asr => {
                debug_assert!((0..=31).contains(&value), "shift by {value}");
                let opcode = match op {
                    OpKind::Lsl => MipsOpcode::Sll,
                    OpKind::Lsr => MipsOpcode::Srl,
                    _ => MipsOpcode::Sra,
                };
                (opcode, value, true)
            }
            OpKind::And if is_uimm16(value) => (MipsOpcode::Andi, value, true),
            OpKind::And => (MipsOpcode::And, value, false),
            OpKind::Or if is_uimm16(value) => (MipsOpcode::Ori, value, true),
            OpKind::Or => (MipsOpcode::Or, value, false),
            OpKind::Xor if is_uimm16(value) => (MipsOpcode::Xori, value, true),
            OpKind::Xor => (MipsOpcode::Xor, value, false),
            OpKind::Mul => (MipsOpcode::Mul, value, false),
            _ => {
                return Err(CompilationError::General(format!(
                    "Bad case in OpRegRegImm: {op:?}"
                )))
            }
        };
        let (d, s) = (dest.to_operand(), src1.to_operand());
        if short_form {
            self.new_lir3(opcode, d, s, value)
        } else if dest != src1 {
            let res = self.load_constant(dest, value)?;
            self.new_lir3(opcode, d, s, d)?;
            Ok(res)
        } else {
            let scratch = self.pool.alloc_temp()?;
            let res = self.load_constant(scratch, value)?;
            self.new_lir3(opcode, d, s, scratch.to_operand())?;
            self.pool.free_temp(scratch)?;
            Ok(res)
        }
    }

    /// `dest = src1 op src2`.
    pub fn op_reg_reg_reg(
        &mut self,
        op: OpKind,
        dest: PhysReg,
        src1: PhysReg,
        src2: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        let opcode = match op {
            OpKind::Add => MipsOpcode::Addu,
            OpKind::Sub => MipsOpcode::Subu,
            OpKind::And => MipsOpcode::And,
            OpKind::Mul => MipsOpcode::Mul,
            OpKind::Or => MipsOpcode::Or,
            OpKind::Xor => MipsOpcode::Xor,
            OpKind::Lsl => MipsOpcode::Sllv,
            OpKind::Lsr => MipsOpcode::Srlv,
            OpKind::Asr => MipsOpcode::Srav,
            OpKind::Adc | OpKind::Sbc => {
                return Err(CompilationError::General("No carry bit on MIPS".into()))
            }
            _ => {
                return Err(CompilationError::General(format!(
                    "Bad case in OpRegRegReg: {op:?}"
                )))
            }
        };
        self.new_lir3(
            opcode,
            dest.to_operand(),
            src1.to_operand(),
            src2.to_operand(),
        )
    }

    /// `dest_src1 = dest_src1 op value`. Only addition and subtraction are supported.
    pub fn op_reg_imm(
        &mut self,
        op: OpKind,
        dest_src1: PhysReg,
        value: i32,
    ) -> Result<LirIdx, CompilationError> {
        match op {
            OpKind::Add | OpKind::Sub => self.op_reg_reg_imm(op, dest_src1, dest_src1, value),
            _ => Err(CompilationError::General(format!(
                "Bad case in OpRegImm: {op:?}"
            ))),
        }
    }

    /// `dest_src1 = op src2`, or `dest_src1 = dest_src1 op src2` for binary operations.
    pub fn op_reg_reg(
        &mut self,
        op: OpKind,
        dest_src1: PhysReg,
        src2: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        let (d, s) = (dest_src1.to_operand(), src2.to_operand());
        match op {
            OpKind::Mov => self.new_lir2(MipsOpcode::Move, d, s),
            OpKind::Mvn => self.new_lir3(MipsOpcode::Nor, d, s, ZERO.to_operand()),
            OpKind::Neg => self.new_lir3(MipsOpcode::Subu, d, ZERO.to_operand(), s),
            OpKind::Add | OpKind::And | OpKind::Mul | OpKind::Or | OpKind::Sub | OpKind::Xor => {
                self.op_reg_reg_reg(op, dest_src1, dest_src1, src2)
            }
            OpKind::Int2Byte => self.new_lir2(MipsOpcode::Seb, d, s),
            OpKind::Int2Short => self.new_lir2(MipsOpcode::Seh, d, s),
            OpKind::Int2Char => self.new_lir3(MipsOpcode::Andi, d, s, 0xffff),
            _ => Err(CompilationError::General(format!(
                "Bad case in OpRegReg: {op:?}"
            ))),
        }
    }

    /// Call (`Blx`) or jump to (`Bx`) the address in `reg`.
    pub fn op_reg(&mut self, op: OpKind, reg: PhysReg) -> Result<LirIdx, CompilationError> {
        match op {
            OpKind::Blx => self.new_lir2(MipsOpcode::Jalr, RA.to_operand(), reg.to_operand()),
            OpKind::Bx => self.new_lir1(MipsOpcode::Jr, reg.to_operand()),
            _ => Err(CompilationError::General(format!(
                "Bad case in OpReg: {op:?}"
            ))),
        }
    }

    pub fn op_unconditional_branch(
        &mut self,
        target: Option<LirIdx>,
    ) -> Result<LirIdx, CompilationError> {
        // The displacement is filled in by the assembler.
        let b = self.new_lir1(MipsOpcode::B, 0)?;
        self.lirs[b].target = target;
        Ok(b)
    }

    /// Branch to `target` if `src1 cond src2`. Anything but equality goes through `slt`/`sltu`
    /// into a temp.
    pub fn op_cmp_branch(
        &mut self,
        cond: ConditionCode,
        src1: PhysReg,
        src2: PhysReg,
        target: Option<LirIdx>,
    ) -> Result<LirIdx, CompilationError> {
        let (s1, s2) = (src1.to_operand(), src2.to_operand());
        let branch = match cond {
            ConditionCode::Eq => self.new_lir2(MipsOpcode::Beq, s1, s2)?,
            ConditionCode::Ne => self.new_lir2(MipsOpcode::Bne, s1, s2)?,
            _ => {
                let (slt, br, swapped) = match cond {
                    ConditionCode::Cc => (MipsOpcode::Sltu, MipsOpcode::Bnez, false),
                    ConditionCode::Cs => (MipsOpcode::Sltu, MipsOpcode::Beqz, false),
                    ConditionCode::Ge => (MipsOpcode::Slt, MipsOpcode::Beqz, false),
                    ConditionCode::Gt => (MipsOpcode::Slt, MipsOpcode::Bnez, true),
                    ConditionCode::Le => (MipsOpcode::Slt, MipsOpcode::Beqz, true),
                    ConditionCode::Lt => (MipsOpcode::Slt, MipsOpcode::Bnez, false),
                    ConditionCode::Hi => (MipsOpcode::Sltu, MipsOpcode::Bnez, true),
                    ConditionCode::Eq | ConditionCode::Ne => unreachable!(),
                };
                let t = self.pool.alloc_temp()?;
                let (a, b) = if swapped { (s2, s1) } else { (s1, s2) };
                self.new_lir3(slt, t.to_operand(), a, b)?;
                let branch = self.new_lir1(br, t.to_operand())?;
                self.pool.free_temp(t)?;
                branch
            }
        };
        self.lirs[branch].target = target;
        Ok(branch)
    }

    /// Branch to `target` if `reg cond value`. Signed comparisons against zero have their own
    /// instructions.
    pub fn op_cmp_imm_branch(
        &mut self,
        cond: ConditionCode,
        reg: PhysReg,
        value: i32,
        target: Option<LirIdx>,
    ) -> Result<LirIdx, CompilationError> {
        let opcode = match (value, cond) {
            (0, ConditionCode::Eq) => Some(MipsOpcode::Beqz),
            (0, ConditionCode::Ge) => Some(MipsOpcode::Bgez),
            (0, ConditionCode::Gt) => Some(MipsOpcode::Bgtz),
            (0, ConditionCode::Le) => Some(MipsOpcode::Blez),
            (0, ConditionCode::Lt) => Some(MipsOpcode::Bltz),
            (0, ConditionCode::Ne) => Some(MipsOpcode::Bnez),
            _ => None,
        };
        match opcode {
            Some(opcode) => {
                let branch = self.new_lir1(opcode, reg.to_operand())?;
                self.lirs[branch].target = target;
                Ok(branch)
            }
            None => {
                let t = self.pool.alloc_temp()?;
                self.load_constant(t, value)?;
                let branch = self.op_cmp_branch(cond, reg, t, target)?;
                self.pool.free_temp(t)?;
                Ok(branch)
            }
        }
    }

    /// Load `size` bytes from `base + (index << scale)` into `dest`. Returns the first instruction
    /// generated.
    pub fn load_base_indexed(
        &mut self,
        base: PhysReg,
        index: PhysReg,
        dest: PhysReg,
        scale: i32,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError> {
        let opcode = match (dest.is_fp(), size) {
            (true, OpSize::Word | OpSize::Single) => MipsOpcode::Flwc1,
            (false, OpSize::Word | OpSize::Single) => MipsOpcode::Lw,
            (false, OpSize::UnsignedHalf) => MipsOpcode::Lhu,
            (false, OpSize::SignedHalf) => MipsOpcode::Lh,
            (false, OpSize::UnsignedByte) => MipsOpcode::Lbu,
            (false, OpSize::SignedByte) => MipsOpcode::Lb,
            _ => {
                return Err(CompilationError::General(format!(
                    "Bad case in LoadBaseIndexed: {size:?} into {dest}"
                )))
            }
        };
        let t = self.pool.alloc_temp()?;
        let first = self.indexed_address(t, base, index, scale)?;
        self.new_lir3(opcode, dest.to_operand(), 0, t.to_operand())?;
        self.pool.free_temp(t)?;
        Ok(first)
    }

    /// Store `size` bytes of `src` to `base + (index << scale)`. Returns the first instruction
    /// generated.
    pub fn store_base_indexed(
        &mut self,
        base: PhysReg,
        index: PhysReg,
        src: PhysReg,
        scale: i32,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError> {
        let opcode = match (src.is_fp(), size) {
            (true, OpSize::Word | OpSize::Single) => MipsOpcode::Fswc1,
            (false, OpSize::Word | OpSize::Single) => MipsOpcode::Sw,
            (false, OpSize::UnsignedHalf | OpSize::SignedHalf) => MipsOpcode::Sh,
            (false, OpSize::UnsignedByte | OpSize::SignedByte) => MipsOpcode::Sb,
            _ => {
                return Err(CompilationError::General(format!(
                    "Bad case in StoreBaseIndexed: {size:?} from {src}"
                )))
            }
        };
        let t = self.pool.alloc_temp()?;
        let first = self.indexed_address(t, base, index, scale)?;
        self.new_lir3(opcode, src.to_operand(), 0, t.to_operand())?;
        self.pool.free_temp(t)?;
        Ok(first)
    }

    /// `t = base + (index << scale)`.
    fn indexed_address(
        &mut self,
        t: PhysReg,
        base: PhysReg,
        index: PhysReg,
        scale: i32,
    ) -> Result<LirIdx, CompilationError> {
        let to = t.to_operand();
        if scale == 0 {
            self.new_lir3(MipsOpcode::Addu, to, base.to_operand(), index.to_operand())
        } else {
            let first = self.op_reg_reg_imm(OpKind::Lsl, t, index, scale)?;
            self.new_lir3(MipsOpcode::Addu, to, base.to_operand(), to)?;
            Ok(first)
        }
    }

    /// Emit a full memory barrier, if the code may run on a multiprocessor.
    pub fn gen_mem_barrier(&mut self) -> Result<Option<LirIdx>, CompilationError> {
        if self.target.smp {
            self.new_lir1(MipsOpcode::Sync, 0).map(Some)
        } else {
            Ok(None)
        }
    }
}
