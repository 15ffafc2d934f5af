//! Lowering of `packed-switch`, `sparse-switch` and `fill-array-data`.
//!
//! All three need the address of data emitted after the code. `bal .+8` (`CurrPC`) leaves the
//! address of the instruction after its delay slot in `ra`: a label there anchors a `Delta`
//! which the assembler resolves to the distance from the anchor to the table.

use super::{MipsOpcode, MipsTarget, A0, A1, RA, SELF, T9, ZERO};
use crate::{
    compile::{
        codegen::Codegen,
        lir::{DataRef, LirIdx},
        regalloc::{RegClass, ValueLocation},
        switch::{FillArrayData, FillArrayIdx, SwitchKind, SwitchTable, SwitchTableIdx},
        CompilationError, ConditionCode, OpKind, OpSize,
    },
    log::LirPhase,
};

impl Codegen<MipsTarget> {
    /// `CurrPC` with `delay_slot` emitting its delay slot, fenced by barriers, then the anchor
    /// label.
    fn gen_anchor<F>(&mut self, delay_slot: F) -> Result<LirIdx, CompilationError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompilationError>,
    {
        self.gen_barrier()?;
        self.new_lir0(MipsOpcode::CurrPC)?;
        delay_slot(self)?;
        self.gen_barrier()?;
        self.new_label()
    }

    /// `dest = address of table` via a `Delta` from `anchor`.
    fn gen_delta(
        &mut self,
        dest: i32,
        anchor: LirIdx,
        table: DataRef,
    ) -> Result<LirIdx, CompilationError> {
        let d = self.new_lir4(MipsOpcode::Delta, dest, 0, 0, 0)?;
        self.lirs[d].anchor = Some(anchor);
        self.lirs[d].table = Some(table);
        Ok(d)
    }

    /// Search the key/displacement pairs of `table` for `rl_src` and jump to the matching case.
    /// Falls through if there is no match.
    ///
    /// ```text
    ///     [lui  end, size_hi]
    ///     bal   .+8
    ///     ori   end, end|zero, size_lo
    /// anchor:
    ///     addiu base, ra, table - anchor
    ///     addu  end, end, base
    /// loop:
    ///     beq   base, end, exit
    ///     lw    key, 0(base)
    ///     addiu base, base, 8
    ///     bne   src, key, loop
    ///     lw    disp, -4(base)
    ///     addu  ra, ra, disp
    ///     jr    ra
    /// exit:
    /// ```
    pub fn gen_sparse_switch(
        &mut self,
        table: SwitchTable,
        rl_src: ValueLocation,
    ) -> Result<SwitchTableIdx, CompilationError> {
        if !matches!(table.kind, SwitchKind::Sparse { .. }) {
            return Err(CompilationError::InternalError(
                "sparse switch lowering of a packed table".into(),
            ));
        }
        let byte_size = i32::try_from(table.byte_size())
            .map_err(|_| CompilationError::LimitExceeded("switch table size".into()))?;
        let idx = self.add_switch_table(table)?;
        self.log_phase(LirPhase::Lir, |cg| cg.switch_table(idx).dump());
        let (size_hi, size_lo) = (byte_size >> 16, byte_size & 0xffff);

        let r_end = self.pool.alloc_temp()?;
        let end = r_end.to_operand();
        if size_hi != 0 {
            self.new_lir2(MipsOpcode::Lui, end, size_hi)?;
        }
        let anchor = self.gen_anchor(|cg| {
            let src = if size_hi != 0 { end } else { ZERO.to_operand() };
            cg.new_lir3(MipsOpcode::Ori, end, src, size_lo).map(|_| ())
        })?;
        self.switch_tables[idx].anchor = Some(anchor);
        let r_base = self.pool.alloc_temp()?;
        self.gen_delta(r_base.to_operand(), anchor, DataRef::Switch(idx))?;
        self.op_reg_reg_reg(OpKind::Add, r_end, r_end, r_base)?;

        let src = self.load_value(rl_src, RegClass::Core)?.low()?;
        let r_key = self.pool.alloc_temp()?;
        let loop_label = self.new_label()?;
        let exit_branch = self.op_cmp_branch(ConditionCode::Eq, r_base, r_end, None)?;
        self.load_word_disp(r_base, 0, r_key)?;
        self.op_reg_imm(OpKind::Add, r_base, 8)?;
        self.op_cmp_branch(ConditionCode::Ne, src, r_key, Some(loop_label))?;
        let r_disp = self.pool.alloc_temp()?;
        self.load_word_disp(r_base, -4, r_disp)?;
        self.op_reg_reg_reg(OpKind::Add, RA, RA, r_disp)?;
        self.op_reg(OpKind::Bx, RA)?;

        let exit = self.new_label()?;
        self.lirs[exit_branch].target = Some(exit);
        Ok(idx)
    }

    /// Index the displacements of `table` by `rl_src - low_key` and jump to the selected case.
    /// Falls through if the key is out of range.
    ///
    /// ```text
    ///     bal   .+8
    ///     addiu key, src, -low_key      ; or nop if low_key is 0
    /// anchor:
    ///     bound check -> done
    ///     addiu base, ra, table - anchor
    ///     lw    disp, base[key]
    ///     addu  ra, ra, disp
    ///     jr    ra
    /// done:
    /// ```
    pub fn gen_packed_switch(
        &mut self,
        table: SwitchTable,
        rl_src: ValueLocation,
    ) -> Result<SwitchTableIdx, CompilationError> {
        let SwitchKind::Packed { low_key } = table.kind else {
            return Err(CompilationError::InternalError(
                "packed switch lowering of a sparse table".into(),
            ));
        };
        let size = i32::try_from(table.len())
            .map_err(|_| CompilationError::LimitExceeded("switch table size".into()))?;
        let idx = self.add_switch_table(table)?;
        self.log_phase(LirPhase::Lir, |cg| cg.switch_table(idx).dump());

        let src = self.load_value(rl_src, RegClass::Core)?.low()?;
        // Keys that do not fit in 16 bits have the bias loaded before the anchor.
        let large_bias = low_key & 0xffff != low_key;
        let r_key = if low_key == 0 {
            src
        } else {
            let r = self.pool.alloc_temp()?;
            if large_bias {
                self.load_constant(r, low_key)?;
            }
            r
        };
        let anchor = self.gen_anchor(|cg| {
            if low_key == 0 {
                cg.new_lir0(MipsOpcode::Nop)?;
            } else if large_bias {
                cg.op_reg_reg_reg(OpKind::Sub, r_key, src, r_key)?;
            } else {
                cg.op_reg_reg_imm(OpKind::Sub, r_key, src, low_key)?;
            }
            Ok(())
        })?;
        self.switch_tables[idx].anchor = Some(anchor);

        // Unsigned, so negative keys are out of range too.
        let branch_over = self.op_cmp_imm_branch(ConditionCode::Hi, r_key, size - 1, None)?;
        let r_base = self.pool.alloc_temp()?;
        self.gen_delta(r_base.to_operand(), anchor, DataRef::Switch(idx))?;
        let r_disp = self.pool.alloc_temp()?;
        self.load_base_indexed(r_base, r_key, r_disp, 2, OpSize::Word)?;
        self.op_reg_reg_reg(OpKind::Add, RA, RA, r_disp)?;
        self.op_reg(OpKind::Bx, RA)?;

        let done = self.new_label()?;
        self.lirs[branch_over].target = Some(done);
        Ok(idx)
    }

    /// Call the runtime helper at `helper_offset` from the thread pointer with the array in `a0`
    /// and the address of `data` in `a1`.
    pub fn gen_fill_array_data(
        &mut self,
        data: FillArrayData,
        rl_src: ValueLocation,
        helper_offset: i32,
    ) -> Result<FillArrayIdx, CompilationError> {
        let idx = self.add_fill_array_data(data)?;
        self.flush_all_regs()?;
        self.lock_call_temps()?;
        self.load_value_direct_fixed(rl_src, A0)?;
        let anchor = self.gen_anchor(|cg| cg.load_word_disp(SELF, helper_offset, T9).map(|_| ()))?;
        self.gen_delta(A1.to_operand(), anchor, DataRef::FillArray(idx))?;
        self.clobber_callee_save();
        let call = self.op_reg(OpKind::Blx, T9)?;
        self.mark_safepoint_pc(call)?;
        Ok(idx)
    }
}
