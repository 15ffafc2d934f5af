//! Def tracking and flushing: which stores to a home slot are provably dead, and writing dirty
//! registers back before anything that may observe the frame.

use super::{LocKind, PhysReg, ValueLocation};
use crate::compile::{
    codegen::Codegen, lir::LirIdx, CompilationError, Opt, OpSize, TargetCodegen,
};

impl<T: TargetCodegen> Codegen<T> {
    /// Turn every LIR from `start` to `finish` inclusive into a nop.
    fn nullify_range(&mut self, start: LirIdx, finish: LirIdx) {
        let mut cur = Some(start);
        while let Some(x) = cur {
            self.lirs.nop(x);
            if x == finish {
                break;
            }
            cur = self.lirs[x].next();
        }
    }

    /// The first LIR after `before`, where `None` means "before the start of the list".
    fn lir_after(&self, before: Option<LirIdx>) -> Option<LirIdx> {
        match before {
            Some(x) => self.lirs[x].next(),
            None => self.lirs.first(),
        }
    }

    /// Record that the LIRs after `start` up to and including `finish` store `loc`'s register to
    /// its home slot.
    pub(crate) fn mark_def(
        &mut self,
        loc: &ValueLocation,
        start: Option<LirIdx>,
        finish: Option<LirIdx>,
    ) -> Result<(), CompilationError> {
        debug_assert!(!loc.wide);
        let def_start = self.lir_after(start);
        let info = self.pool.get_mut(loc.low()?);
        info.def_start = def_start;
        info.def_end = finish;
        Ok(())
    }

    /// The wide version of [Self::mark_def]: the range is recorded against the low register.
    pub(crate) fn mark_def_wide(
        &mut self,
        loc: &ValueLocation,
        start: Option<LirIdx>,
        finish: Option<LirIdx>,
    ) -> Result<(), CompilationError> {
        debug_assert!(loc.wide);
        let def_start = self.lir_after(start);
        self.pool.reset_def(loc.high()?);
        let info = self.pool.get_mut(loc.low()?);
        info.def_start = def_start;
        info.def_end = finish;
        Ok(())
    }

    /// `loc`'s value is about to be redefined: if its last store has not been observed, remove
    /// it.
    pub(crate) fn reset_def_loc(&mut self, loc: &ValueLocation) -> Result<(), CompilationError> {
        debug_assert!(!loc.wide);
        let reg = loc.low()?;
        let info = self.pool.get(reg);
        if info.is_temp && self.opts.enabled(Opt::SuppressLoads) {
            debug_assert!(!info.pair);
            if let (Some(start), Some(end)) = (info.def_start, info.def_end) {
                self.nullify_range(start, end);
            }
        }
        self.pool.reset_def(reg);
        Ok(())
    }

    /// The wide version of [Self::reset_def_loc].
    pub(crate) fn reset_def_loc_wide(
        &mut self,
        loc: &ValueLocation,
    ) -> Result<(), CompilationError> {
        debug_assert!(loc.wide);
        let (lo, hi) = (loc.low()?, loc.high()?);
        let info = self.pool.get(lo);
        if info.is_temp && self.opts.enabled(Opt::SuppressLoads) {
            debug_assert!(info.pair);
            if let (Some(start), Some(end)) = (info.def_start, info.def_end) {
                self.nullify_range(start, end);
            }
        }
        self.pool.reset_def(lo);
        self.pool.reset_def(hi);
        Ok(())
    }

    /// Reinterpret the wide `loc` as its low word alone.
    pub fn wide_to_narrow(&mut self, mut loc: ValueLocation) -> ValueLocation {
        debug_assert!(loc.wide);
        if loc.location == LocKind::PhysReg {
            for r in [loc.low_reg, loc.high_reg].into_iter().flatten() {
                let info = self.pool.get_mut(r);
                if info.is_temp {
                    info.pair = false;
                    info.def_start = None;
                    info.def_end = None;
                }
            }
        }
        loc.wide = false;
        loc
    }

    /// If `reg` holds a value not yet written to its home slot, write it.
    pub fn flush_reg(&mut self, reg: PhysReg) -> Result<(), CompilationError> {
        let info = self.pool.get_mut(reg);
        if info.live && info.dirty {
            info.dirty = false;
            let s_reg = info.s_reg.ok_or_else(|| {
                CompilationError::InternalError(format!("live register {reg} has no SSA name"))
            })?;
            let disp = self.sreg_offset(s_reg);
            T::store_base_disp(self, T::SP, disp, reg, OpSize::Word)?;
        }
        Ok(())
    }

    /// If either half of the pair `reg1:reg2` holds a value not yet written to its home slots,
    /// write both with a single wide store.
    pub fn flush_reg_wide(&mut self, reg1: PhysReg, reg2: PhysReg) -> Result<(), CompilationError> {
        let (info1, info2) = (self.pool.get(reg1), self.pool.get(reg2));
        if !(info1.pair
            && info2.pair
            && info1.partner == Some(reg2)
            && info2.partner == Some(reg1))
        {
            return Err(CompilationError::InternalError(format!(
                "{reg1} and {reg2} are not a register pair"
            )));
        }
        if !((info1.live && info1.dirty) || (info2.live && info2.dirty)) {
            return Ok(());
        }
        if !(info1.is_temp && info2.is_temp) {
            return Err(CompilationError::InternalError(
                "Long half-temp, half-promoted".into(),
            ));
        }
        let missing =
            |r: PhysReg| CompilationError::InternalError(format!("live register {r} has no SSA name"));
        let s1 = info1.s_reg.ok_or_else(|| missing(reg1))?;
        let s2 = info2.s_reg.ok_or_else(|| missing(reg2))?;
        self.pool.get_mut(reg1).dirty = false;
        self.pool.get_mut(reg2).dirty = false;
        let (v1, v2) = (self.ir.sreg_to_vreg(s1), self.ir.sreg_to_vreg(s2));
        let (lo, hi, vreg) = if v2.as_i32() < v1.as_i32() {
            (reg2, reg1, v2)
        } else {
            (reg1, reg2, v1)
        };
        let disp = self.vreg_offset(vreg);
        T::store_base_disp_wide(self, T::SP, disp, lo, hi)?;
        Ok(())
    }

    /// Write every dirty register to its home slot, then forget what every register holds.
    pub fn flush_all_regs(&mut self) -> Result<(), CompilationError> {
        let regs = self
            .pool
            .core_regs()
            .iter()
            .chain(self.pool.fp_regs())
            .map(|x| x.reg)
            .collect::<Vec<_>>();
        for reg in regs {
            let info = self.pool.get(reg);
            if info.live && info.dirty {
                match (info.pair, info.partner) {
                    (true, Some(partner)) => self.flush_reg_wide(reg, partner)?,
                    _ => self.flush_reg(reg)?,
                }
            }
        }
        self.pool.clobber_all();
        Ok(())
    }

    /// Forget the contents of every register a call may trash.
    pub fn clobber_callee_save(&mut self) {
        for r in T::CALLER_SAVE {
            self.pool.clobber(*r);
        }
    }

    /// Reserve the argument registers for an explicit call sequence.
    pub fn lock_call_temps(&mut self) -> Result<(), CompilationError> {
        for r in T::CALL_TEMPS {
            self.pool.lock_temp(*r)?;
        }
        Ok(())
    }

    pub fn free_call_temps(&mut self) -> Result<(), CompilationError> {
        for r in T::CALL_TEMPS {
            self.pool.free_temp(*r)?;
        }
        Ok(())
    }

    /// The location of a narrow call result, with its register reserved.
    pub fn get_return(&mut self, is_float: bool) -> Result<ValueLocation, CompilationError> {
        let res = if is_float {
            T::loc_c_return_float()
        } else {
            T::loc_c_return()
        };
        let reg = res.low()?;
        self.pool.clobber(reg);
        T::lock_return(self, reg)?;
        Ok(res)
    }

    /// The location of a wide call result, with its registers reserved and paired.
    pub fn get_return_wide(&mut self, is_double: bool) -> Result<ValueLocation, CompilationError> {
        let res = if is_double {
            T::loc_c_return_double()
        } else {
            T::loc_c_return_wide()
        };
        let (lo, hi) = (res.low()?, res.high()?);
        self.pool.clobber(lo);
        self.pool.clobber(hi);
        self.pool.lock_temp(lo)?;
        self.pool.lock_temp(hi)?;
        self.pool.mark_pair(lo, hi);
        Ok(res)
    }
}
