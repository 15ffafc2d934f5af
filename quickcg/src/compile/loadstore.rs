//! Moving values between their home slots and registers, with the allocator's bookkeeping.

use super::{
    codegen::Codegen,
    lir::LirIdx,
    regalloc::{LocKind, PhysReg, RegClass, ValueLocation},
    CompilationError, OpSize, TargetCodegen,
};

impl<T: TargetCodegen> Codegen<T> {
    /// Is `loc` a constant that is cheaper to rematerialise than to keep in a register?
    pub fn is_inexpensive_constant(&self, loc: &ValueLocation) -> bool {
        if !loc.is_const {
            return false;
        }
        let Some(s) = loc.s_reg_low else {
            return false;
        };
        if loc.wide {
            match self.ir.constant_value_wide(s) {
                Some(v) if loc.fp => T::inexpensive_constant_double(v),
                Some(v) => T::inexpensive_constant_long(v),
                None => false,
            }
        } else {
            match self.ir.constant_value(s) {
                Some(v) if loc.fp => T::inexpensive_constant_float(v),
                Some(v) => T::inexpensive_constant_int(v),
                None => false,
            }
        }
    }

    /// Materialise `value` in `dest`, which (if a temp) stops mirroring any value and is
    /// reserved.
    pub fn load_constant(&mut self, dest: PhysReg, value: i32) -> Result<LirIdx, CompilationError> {
        if self.pool.is_temp(dest) {
            self.pool.clobber(dest);
            self.pool.mark_in_use(dest);
        }
        T::load_constant_no_clobber(self, dest, value)
    }

    pub fn load_word_disp(
        &mut self,
        base: PhysReg,
        disp: i32,
        dest: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        T::load_base_disp(self, base, disp, dest, OpSize::Word)
    }

    pub fn store_word_disp(
        &mut self,
        base: PhysReg,
        disp: i32,
        src: PhysReg,
    ) -> Result<LirIdx, CompilationError> {
        T::store_base_disp(self, base, disp, src, OpSize::Word)
    }

    /// Put a copy of `src` in `dest`. The allocator's view of `dest` is not updated: that is the
    /// caller's job.
    pub fn load_value_direct(
        &mut self,
        src: ValueLocation,
        dest: PhysReg,
    ) -> Result<(), CompilationError> {
        let src = self.pool.update_loc(src)?;
        if src.location == LocKind::PhysReg {
            self.op_reg_copy(dest, src.low()?)?;
        } else if self.is_inexpensive_constant(&src) {
            let v = self.ir.constant_value(src.s_reg()?).unwrap_or(0);
            T::load_constant_no_clobber(self, dest, v)?;
        } else {
            debug_assert!(matches!(
                src.location,
                LocKind::Frame | LocKind::CompilerTemp
            ));
            let disp = self.sreg_offset(src.s_reg()?);
            self.load_word_disp(T::SP, disp, dest)?;
        }
        Ok(())
    }

    /// [Self::load_value_direct] into a fixed register (e.g. an outgoing argument), which is
    /// clobbered and reserved first.
    pub fn load_value_direct_fixed(
        &mut self,
        src: ValueLocation,
        dest: PhysReg,
    ) -> Result<(), CompilationError> {
        self.pool.clobber(dest);
        self.pool.mark_in_use(dest);
        self.load_value_direct(src, dest)
    }

    /// The wide version of [Self::load_value_direct].
    pub fn load_value_direct_wide(
        &mut self,
        src: ValueLocation,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
    ) -> Result<(), CompilationError> {
        let src = self.pool.update_loc_wide(src)?;
        if src.location == LocKind::PhysReg {
            self.op_reg_copy_wide(dest_lo, dest_hi, src.low()?, src.high()?)?;
        } else if self.is_inexpensive_constant(&src) {
            let v = self.ir.constant_value_wide(src.s_reg()?).unwrap_or(0);
            T::load_constant_wide(self, dest_lo, dest_hi, v)?;
        } else {
            debug_assert!(matches!(
                src.location,
                LocKind::Frame | LocKind::CompilerTemp
            ));
            let disp = self.sreg_offset(src.s_reg()?);
            T::load_base_disp_wide(self, T::SP, disp, dest_lo, dest_hi)?;
        }
        Ok(())
    }

    pub fn load_value_direct_wide_fixed(
        &mut self,
        src: ValueLocation,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
    ) -> Result<(), CompilationError> {
        self.pool.clobber(dest_lo);
        self.pool.clobber(dest_hi);
        self.pool.mark_in_use(dest_lo);
        self.pool.mark_in_use(dest_hi);
        self.load_value_direct_wide(src, dest_lo, dest_hi)
    }

    /// Get `src` into a register of `class`, loading it if necessary, and return its new
    /// location. The register is marked as mirroring `src`.
    pub fn load_value(
        &mut self,
        src: ValueLocation,
        class: RegClass,
    ) -> Result<ValueLocation, CompilationError> {
        let mut src = self.eval_loc(src, class, false)?;
        if self.is_inexpensive_constant(&src) || src.location != LocKind::PhysReg {
            let reg = src.low()?;
            self.load_value_direct(src, reg)?;
            src.location = LocKind::PhysReg;
            self.pool.mark_live(reg, src.s_reg_low);
        }
        Ok(src)
    }

    /// The wide version of [Self::load_value].
    pub fn load_value_wide(
        &mut self,
        src: ValueLocation,
        class: RegClass,
    ) -> Result<ValueLocation, CompilationError> {
        debug_assert!(src.wide);
        let mut src = self.eval_loc(src, class, false)?;
        if self.is_inexpensive_constant(&src) || src.location != LocKind::PhysReg {
            let (lo, hi) = (src.low()?, src.high()?);
            self.load_value_direct_wide(src, lo, hi)?;
            src.location = LocKind::PhysReg;
            self.pool.mark_live(lo, src.s_reg_low);
            self.pool.mark_live(hi, src.s_reg_low.map(|x| x.hi()));
        }
        Ok(src)
    }

    /// Two stores to the same SSA name without an intervening clobber mean the front-end has
    /// defined a value twice.
    fn check_single_def(&mut self, dest: &ValueLocation) -> Result<(), CompilationError> {
        let s = dest.s_reg()?;
        if self.pool.live_sreg == Some(s) {
            return Err(CompilationError::InternalError(format!(
                "{s} stored twice without an intervening clobber"
            )));
        }
        self.pool.live_sreg = Some(s);
        Ok(())
    }

    /// Make `dest` hold the value of `src`. `dest`'s register becomes live and, unless it is the
    /// value's permanent home, is written straight back to the home slot; that store is recorded
    /// so that it can be removed if `dest` is redefined before anything reads it.
    pub fn store_value(
        &mut self,
        dest: ValueLocation,
        src: ValueLocation,
    ) -> Result<(), CompilationError> {
        self.check_single_def(&dest)?;
        debug_assert!(!dest.wide && !src.wide);
        let src = self.pool.update_loc(src)?;
        let mut dest = self.pool.update_loc(dest)?;
        if src.location == LocKind::PhysReg {
            let src_reg = src.low()?;
            if self.pool.is_live(src_reg)
                || self.pool.is_promoted(src_reg)
                || dest.location == LocKind::PhysReg
            {
                dest = self.eval_loc(dest, RegClass::Any, false)?;
                self.op_reg_copy(dest.low()?, src_reg)?;
            } else {
                // The source is dead: hand its register over to the destination.
                dest.low_reg = Some(src_reg);
                self.pool.clobber(src_reg);
            }
        } else {
            dest = self.eval_loc(dest, RegClass::Any, false)?;
            let reg = dest.low()?;
            self.load_value_direct(src, reg)?;
        }

        let reg = dest.low()?;
        self.pool.mark_live(reg, dest.s_reg_low);
        self.pool.mark_dirty(&dest);

        self.reset_def_loc(&dest)?;
        let s = dest.s_reg()?;
        if self.pool.is_dirty(reg) && self.ir.live_out(s) {
            let def_start = self.lirs.last();
            let disp = self.sreg_offset(s);
            self.store_word_disp(T::SP, disp, reg)?;
            self.pool.mark_clean(&dest);
            let def_end = self.lirs.last();
            // References must always be visible to the collector.
            if !dest.is_ref {
                self.mark_def(&dest, def_start, def_end)?;
            }
        }
        Ok(())
    }

    /// The wide version of [Self::store_value].
    pub fn store_value_wide(
        &mut self,
        dest: ValueLocation,
        src: ValueLocation,
    ) -> Result<(), CompilationError> {
        self.check_single_def(&dest)?;
        debug_assert!(dest.wide && src.wide);
        let src = self.pool.update_loc_wide(src)?;
        let mut dest = self.pool.update_loc_wide(dest)?;
        if src.location == LocKind::PhysReg {
            let (src_lo, src_hi) = (src.low()?, src.high()?);
            if src_lo.is_fp() != src_hi.is_fp() {
                return Err(CompilationError::InternalError(format!(
                    "wide value {src} is split across register classes"
                )));
            }
            if self.pool.is_live(src_lo)
                || self.pool.is_live(src_hi)
                || self.pool.is_promoted(src_lo)
                || self.pool.is_promoted(src_hi)
                || dest.location == LocKind::PhysReg
            {
                dest = self.eval_loc(dest, RegClass::Any, false)?;
                self.op_reg_copy_wide(dest.low()?, dest.high()?, src_lo, src_hi)?;
            } else {
                dest.low_reg = Some(src_lo);
                dest.high_reg = Some(src_hi);
                self.pool.clobber(src_lo);
                self.pool.clobber(src_hi);
            }
        } else {
            dest = self.eval_loc(dest, RegClass::Any, false)?;
            let (lo, hi) = (dest.low()?, dest.high()?);
            self.load_value_direct_wide(src, lo, hi)?;
        }

        let (lo, hi) = (dest.low()?, dest.high()?);
        let s = dest.s_reg()?;
        self.pool.mark_live(lo, Some(s));
        self.pool.mark_live(hi, Some(s.hi()));
        self.pool.mark_dirty(&dest);
        self.pool.mark_pair(lo, hi);

        self.reset_def_loc_wide(&dest)?;
        if (self.pool.is_dirty(lo) || self.pool.is_dirty(hi))
            && (self.ir.live_out(s) || self.ir.live_out(s.hi()))
        {
            let def_start = self.lirs.last();
            debug_assert_eq!(
                self.ir.sreg_to_vreg(s).as_i32() + 1,
                self.ir.sreg_to_vreg(s.hi()).as_i32()
            );
            let disp = self.sreg_offset(s);
            T::store_base_disp_wide(self, T::SP, disp, lo, hi)?;
            self.pool.mark_clean(&dest);
            let def_end = self.lirs.last();
            self.mark_def_wide(&dest, def_start, def_end)?;
        }
        Ok(())
    }

    /// Load the current method pointer into the fixed register `dest`.
    pub fn load_curr_method_direct(&mut self, dest: PhysReg) -> Result<(), CompilationError> {
        let loc = self.ir.method_loc();
        self.load_value_direct_fixed(loc, dest)
    }

    /// Load the current method pointer into a core register.
    pub fn load_curr_method(&mut self) -> Result<ValueLocation, CompilationError> {
        let loc = self.ir.method_loc();
        self.load_value(loc, RegClass::Core)
    }
}

#[cfg(test)]
mod tests {
    use crate::compile::{
        codegen::tests::{match_lir, mips_codegen},
        method::{SReg, SsaReg, VReg},
        mips::{A0, A1, T0},
        regalloc::{LocKind, PhysReg, RegClass, ValueLocation},
        CompilationError, Opt,
    };

    fn s(n: usize) -> SReg {
        SReg::from(n)
    }

    #[test]
    fn load_from_frame() {
        let mut cg = mips_codegen(2, vec![]);
        cg.simple_reg_alloc().unwrap();
        let loc = cg.load_value(cg.ir.loc(s(1)), RegClass::Core).unwrap();
        assert_eq!(loc.location, LocKind::PhysReg);
        let reg = loc.low_reg.unwrap();
        assert!(cg.pool.is_live(reg));
        assert_eq!(cg.pool.get(reg).s_reg, Some(s(1)));
        match_lir(
            &cg,
            "
            00000: lw       {{r}},20(sp)
        ",
        );
        // A second load finds the value already in its register.
        let again = cg.load_value(cg.ir.loc(s(1)), RegClass::Core).unwrap();
        assert_eq!(again.low_reg, Some(reg));
        assert_eq!(cg.lirs.iter().count(), 1);
    }

    #[test]
    fn load_cheap_constant() {
        let mut cg = mips_codegen(1, vec![SsaReg::new(VReg::Dalvik(0)).constant(7)]);
        cg.simple_reg_alloc().unwrap();
        cg.load_value_direct_fixed(cg.ir.loc(s(1)), A0).unwrap();
        assert!(cg.pool.get(A0).in_use);
        match_lir(
            &cg,
            "
            00000: ori      a0,zero,0x0007(7)
        ",
        );
    }

    #[test]
    fn store_then_reload() {
        let mut cg = mips_codegen(2, vec![SsaReg::new(VReg::Dalvik(1))]);
        cg.simple_reg_alloc().unwrap();
        let src = cg.load_value(cg.ir.loc(s(0)), RegClass::Core).unwrap();
        let src_reg = src.low_reg.unwrap();
        // Kill the source so that its register can be handed over.
        cg.pool.clobber_sreg(s(0));
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
        assert_eq!(cg.pool.get(src_reg).s_reg, Some(s(2)));
        assert!(!cg.pool.is_dirty(src_reg));
        let reloaded = cg.load_value(cg.ir.loc(s(2)), RegClass::Core).unwrap();
        assert_eq!(reloaded.low_reg, Some(src_reg));
        match_lir(
            &cg,
            "
            00000: lw       {{r}},16(sp)
            00000: sw       {{r}},20(sp)
        ",
        );
    }

    #[test]
    fn store_live_source_copies() {
        let mut cg = mips_codegen(2, vec![SsaReg::new(VReg::Dalvik(1))]);
        cg.simple_reg_alloc().unwrap();
        let src = cg.load_value(cg.ir.loc(s(0)), RegClass::Core).unwrap();
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
        // The source still mirrors s0.
        assert!(cg.pool.is_live(src.low_reg.unwrap()));
        match_lir(
            &cg,
            "
            00000: lw       {{a}},16(sp)
            00000: move     {{b}},{{a}}
            00000: sw       {{b}},20(sp)
        ",
        );
    }

    /// Define s2 (a copy of s0) twice in the same register, as a loop body would.
    fn redefine(ssa: SsaReg, disable: Option<Opt>) -> bool {
        let mut cg = mips_codegen(2, vec![ssa]);
        if let Some(x) = disable {
            cg.opts.disable(x);
        }
        cg.simple_reg_alloc().unwrap();
        let src = cg.load_value(cg.ir.loc(s(0)), RegClass::Core).unwrap();
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
        let first_store = cg.lirs.last().unwrap();
        cg.pool.reset();
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
        assert_ne!(cg.lirs.last(), Some(first_store));
        cg.lirs[first_store].is_nop
    }

    #[test]
    fn redefinition_kills_dead_store() {
        assert!(redefine(SsaReg::new(VReg::Dalvik(1)), None));
    }

    #[test]
    fn references_keep_their_stores() {
        assert!(!redefine(SsaReg::new(VReg::Dalvik(1)).reference(), None));
    }

    #[test]
    fn dead_stores_kept_when_disabled() {
        assert!(!redefine(
            SsaReg::new(VReg::Dalvik(1)),
            Some(Opt::SuppressLoads)
        ));
    }

    #[test]
    fn double_store() {
        let mut cg = mips_codegen(2, vec![SsaReg::new(VReg::Dalvik(1))]);
        cg.simple_reg_alloc().unwrap();
        let src = cg.load_value(cg.ir.loc(s(0)), RegClass::Core).unwrap();
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
        assert!(matches!(
            cg.store_value(cg.ir.loc(s(2)), src),
            Err(CompilationError::InternalError(_))
        ));
        // A clobber in between makes it legitimate again.
        cg.pool.clobber_sreg(s(2));
        cg.store_value(cg.ir.loc(s(2)), src).unwrap();
    }

    #[test]
    fn wide_store_and_load() {
        let mut cg = mips_codegen(
            4,
            vec![
                SsaReg::new(VReg::Dalvik(0)).wide(),
                SsaReg::new(VReg::Dalvik(1)).high_word(),
                SsaReg::new(VReg::Dalvik(2)).wide(),
                SsaReg::new(VReg::Dalvik(3)).high_word(),
            ],
        );
        cg.simple_reg_alloc().unwrap();
        let src = cg.load_value_wide(cg.ir.loc(s(4)), RegClass::Core).unwrap();
        let (lo, hi) = (src.low_reg.unwrap(), src.high_reg.unwrap());
        assert_eq!(cg.pool.get(lo).partner, Some(hi));
        cg.pool.clobber_sreg(s(4));
        cg.pool.clobber_sreg(s(5));
        cg.store_value_wide(cg.ir.loc(s(6)), src).unwrap();
        assert_eq!(cg.pool.get(lo).s_reg, Some(s(6)));
        assert_eq!(cg.pool.get(hi).s_reg, Some(s(7)));
        match_lir(
            &cg,
            "
            00000: lw       {{lo}},8(sp)
            00000: lw       {{hi}},12(sp)
            00000: sw       {{lo}},16(sp)
            00000: sw       {{hi}},20(sp)
        ",
        );
        assert!(!cg.pool.is_dirty(lo));
    }

    #[test]
    fn wide_store_rejects_mixed_classes() {
        let mut cg = mips_codegen(
            2,
            vec![
                SsaReg::new(VReg::Dalvik(0)).wide(),
                SsaReg::new(VReg::Dalvik(1)).high_word(),
            ],
        );
        let mut src = ValueLocation::in_reg_pair(T0, PhysReg::FloatSingle(2));
        src.s_reg_low = Some(s(0));
        assert!(matches!(
            cg.store_value_wide(cg.ir.loc(s(2)), src),
            Err(CompilationError::InternalError(_))
        ));
    }

    #[test]
    fn method_pointer() {
        let mut cg = mips_codegen(1, vec![]);
        cg.simple_reg_alloc().unwrap();
        cg.load_curr_method_direct(A1).unwrap();
        let loc = cg.load_curr_method().unwrap();
        assert_eq!(loc.location, LocKind::PhysReg);
        match_lir(
            &cg,
            "
            00000: lw       a1,0(sp)
            00000: lw       {{r}},0(sp)
        ",
        );
    }
}
