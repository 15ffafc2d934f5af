//! The interface every instruction-set backend implements.
//!
//! The register allocator, the load/store protocol and the assembler retry loop are written once
//! in terms of this trait. Most hooks are associated functions taking the [Codegen] they act on,
//! so that a backend can freely emit LIR and allocate registers while it runs.

use super::{
    codegen::Codegen,
    lir::{Lir, LirIdx},
    method::VReg,
    regalloc::{PhysReg, ValueLocation},
    CompilationError,
};
use std::fmt::Debug;

/// The width and signedness of a memory access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpSize {
    Word,
    Long,
    Single,
    Double,
    UnsignedHalf,
    SignedHalf,
    UnsignedByte,
    SignedByte,
}

/// The operations that the target's emitters lower.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpKind {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Xor,
    Mul,
    Lsl,
    Lsr,
    Asr,
    Mov,
    /// Bitwise not.
    Mvn,
    Neg,
    /// Sign-extend the low byte.
    Int2Byte,
    /// Sign-extend the low half.
    Int2Short,
    /// Zero-extend the low half.
    Int2Char,
    /// Call the address in a register.
    Blx,
    /// Jump to the address in a register.
    Bx,
}

/// The comparison a conditional branch tests, ARM style: `Cc`/`Cs`/`Hi` are unsigned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionCode {
    Eq,
    Ne,
    /// Unsigned lower.
    Cc,
    /// Unsigned higher or same.
    Cs,
    Lt,
    Ge,
    Gt,
    Le,
    /// Unsigned higher.
    Hi,
}

/// The outcome of one pass over the LIR list by [TargetCodegen::assemble_instructions].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssemblerStatus {
    /// Every instruction was encoded.
    Success,
    /// At least one instruction was expanded: offsets must be recomputed and the whole list
    /// assembled again.
    RetryAll,
}

pub trait TargetCodegen: Sized + Send {
    /// The target's machine opcodes.
    type Opcode: Copy + Debug + Eq + Send;
    /// The pseudo-opcode of a literal pool word. It is never encoded as an instruction.
    const DATA_OPCODE: Self::Opcode;

    /// Every core register, in allocation order.
    const CORE_REGS: &'static [PhysReg];
    /// Every single-precision floating point register, in allocation order. Adjacent even/odd
    /// pairs form the double-precision registers.
    const FP_REGS: &'static [PhysReg];
    /// Registers that are never allocated (e.g. the stack pointer).
    const RESERVED_REGS: &'static [PhysReg];
    /// Registers that the general allocator may hand out. Registers that are neither reserved nor
    /// temps are candidates for promotion.
    const TEMP_REGS: &'static [PhysReg];
    /// The argument registers that calls use.
    const CALL_TEMPS: &'static [PhysReg];
    /// Every register that a call to external code may trash.
    const CALLER_SAVE: &'static [PhysReg];
    /// The stack pointer.
    const SP: PhysReg;

    fn loc_c_return() -> ValueLocation;
    fn loc_c_return_wide() -> ValueLocation;
    fn loc_c_return_float() -> ValueLocation;
    fn loc_c_return_double() -> ValueLocation;

    /// Reserve a narrow return register after it has been clobbered.
    fn lock_return(cg: &mut Codegen<Self>, reg: PhysReg) -> Result<(), CompilationError> {
        cg.pool.lock_temp(reg)
    }

    /// Add any registers this target always spills to the spill mask.
    fn adjust_spill_mask(_cg: &mut Codegen<Self>) {}

    /// Record that the callee-save single `reg` now holds `vreg`. Holes in the FP vmap table are
    /// filled with `0xffff` so that the spill mask stays contiguous.
    fn mark_preserved_single(
        cg: &mut Codegen<Self>,
        vreg: VReg,
        reg: PhysReg,
    ) -> Result<(), CompilationError> {
        let base = Self::FP_REGS
            .iter()
            .filter(|r| !Self::TEMP_REGS.contains(r))
            .map(|r| r.num())
            .min()
            .ok_or_else(|| {
                CompilationError::InternalError(format!("{reg} is not a callee-save register"))
            })?;
        let idx = usize::from(reg.num().checked_sub(base).ok_or_else(|| {
            CompilationError::InternalError(format!("{reg} is not a callee-save register"))
        })?);
        if cg.fp_vmap_table.len() <= idx {
            cg.fp_vmap_table.resize(idx + 1, super::codegen::INVALID_VREG);
        }
        cg.fp_vmap_table[idx] = vreg.as_vmap();
        cg.num_fp_spills = u32::try_from(cg.fp_vmap_table.len())
            .map_err(|_| CompilationError::LimitExceeded("fp vmap table".into()))?;
        cg.fp_spill_mask = ((1u32 << cg.num_fp_spills) - 1) << base;
        Ok(())
    }

    /// The feature flags (`IS_BRANCH`, `REG_DEF0`, ...) of `op`.
    fn insn_flags(op: Self::Opcode) -> u64;
    /// The size in bytes of `op`, including any filler instruction that follows it.
    fn insn_size(op: Self::Opcode) -> u32;
    /// The resource mask bits of `reg`.
    fn reg_mask(reg: PhysReg) -> u64;
    /// Add target-specific resource bits to `lir`'s masks.
    fn setup_target_resource_masks(_lir: &mut Lir<Self::Opcode>) {}
    /// A one-line textual rendering of `lir`, located at `base_addr`.
    fn dump_insn(lir: &Lir<Self::Opcode>, base_addr: u32) -> String;
    /// The name of `reg` in assembler listings.
    fn reg_name(reg: PhysReg) -> String;

    /// Create, but do not append, a register copy `dest <- src`.
    fn op_reg_copy_no_insert(
        cg: &mut Codegen<Self>,
        dest: PhysReg,
        src: PhysReg,
    ) -> Result<LirIdx, CompilationError>;
    fn op_reg_copy_wide(
        cg: &mut Codegen<Self>,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
        src_lo: PhysReg,
        src_hi: PhysReg,
    ) -> Result<(), CompilationError>;
    /// Materialise `value` in `dest` without touching the allocator's view of `dest`.
    fn load_constant_no_clobber(
        cg: &mut Codegen<Self>,
        dest: PhysReg,
        value: i32,
    ) -> Result<LirIdx, CompilationError>;
    fn load_constant_wide(
        cg: &mut Codegen<Self>,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
        value: i64,
    ) -> Result<LirIdx, CompilationError>;
    fn load_base_disp(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        dest: PhysReg,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError>;
    fn load_base_disp_wide(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
    ) -> Result<LirIdx, CompilationError>;
    fn store_base_disp(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        src: PhysReg,
        size: OpSize,
    ) -> Result<LirIdx, CompilationError>;
    fn store_base_disp_wide(
        cg: &mut Codegen<Self>,
        base: PhysReg,
        disp: i32,
        src_lo: PhysReg,
        src_hi: PhysReg,
    ) -> Result<LirIdx, CompilationError>;

    fn inexpensive_constant_int(value: i32) -> bool;
    fn inexpensive_constant_float(value: i32) -> bool;
    fn inexpensive_constant_long(value: i64) -> bool;
    fn inexpensive_constant_double(value: i64) -> bool;

    /// Encode the whole LIR list into [Codegen::code_buffer], patching fixups. If any
    /// instruction had to be expanded, return [AssemblerStatus::RetryAll].
    fn assemble_instructions(
        cg: &mut Codegen<Self>,
        start_addr: u32,
    ) -> Result<AssemblerStatus, CompilationError>;

    /// The offset that switch table displacements are relative to, given the offset of the
    /// table's anchor label.
    fn switch_table_base(anchor_offset: u32) -> u32;
}
