//! Where a value currently lives, and moving it into a register of the right class.

use super::{PhysReg, RegClass, RegisterPool};
use crate::compile::{codegen::Codegen, method::SReg, CompilationError, TargetCodegen};
use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LocKind {
    PhysReg,
    /// The value's home slot in the Dalvik frame.
    Frame,
    /// The value's home slot in the compiler temp area.
    CompilerTemp,
}

/// Where one value currently resides.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ValueLocation {
    pub location: LocKind,
    /// Does the value occupy two 32-bit registers or slots?
    pub wide: bool,
    pub is_const: bool,
    pub fp: bool,
    pub is_ref: bool,
    /// Is this the high word of a wide value?
    pub high_word: bool,
    /// Has this value been permanently bound to its registers by promotion?
    pub home: bool,
    pub low_reg: Option<PhysReg>,
    pub high_reg: Option<PhysReg>,
    /// The SSA name of the value (of its low word, if wide).
    pub s_reg_low: Option<SReg>,
}

impl ValueLocation {
    /// A narrow value that lives in memory.
    pub fn in_memory(location: LocKind) -> Self {
        Self {
            location,
            wide: false,
            is_const: false,
            fp: false,
            is_ref: false,
            high_word: false,
            home: false,
            low_reg: None,
            high_reg: None,
            s_reg_low: None,
        }
    }

    /// A narrow value held in `reg`.
    pub fn in_reg(reg: PhysReg) -> Self {
        Self {
            location: LocKind::PhysReg,
            fp: reg.is_fp(),
            low_reg: Some(reg),
            ..Self::in_memory(LocKind::PhysReg)
        }
    }

    /// A wide value held in `lo` and `hi`.
    pub fn in_reg_pair(lo: PhysReg, hi: PhysReg) -> Self {
        Self {
            wide: true,
            high_reg: Some(hi),
            ..Self::in_reg(lo)
        }
    }

    /// The register holding the (low word of the) value.
    pub fn low(&self) -> Result<PhysReg, CompilationError> {
        self.low_reg.ok_or_else(|| {
            CompilationError::InternalError(format!("{self} has no low register"))
        })
    }

    /// The register holding the high word of the value.
    pub fn high(&self) -> Result<PhysReg, CompilationError> {
        self.high_reg.ok_or_else(|| {
            CompilationError::InternalError(format!("{self} has no high register"))
        })
    }

    pub fn s_reg(&self) -> Result<SReg, CompilationError> {
        self.s_reg_low
            .ok_or_else(|| CompilationError::InternalError(format!("{self} has no SSA name")))
    }
}

impl fmt::Display for ValueLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.s_reg_low {
            Some(s) => write!(f, "{s}")?,
            None => write!(f, "s?")?,
        }
        match self.location {
            LocKind::PhysReg => {
                match self.low_reg {
                    Some(r) => write!(f, " {r}")?,
                    None => write!(f, " ?")?,
                }
                if self.wide && !self.high_word {
                    match self.high_reg {
                        Some(r) => write!(f, "/{r}")?,
                        None => write!(f, "/?")?,
                    }
                }
            }
            LocKind::Frame => write!(f, " frame")?,
            LocKind::CompilerTemp => write!(f, " ctemp")?,
        }
        for (b, s) in [
            (self.wide, "wide"),
            (self.high_word, "hi"),
            (self.fp, "fp"),
            (self.is_ref, "ref"),
            (self.is_const, "const"),
            (self.home, "home"),
        ] {
            if b {
                write!(f, " {s}")?;
            }
        }
        Ok(())
    }
}

impl RegisterPool {
    /// Return `loc` rebound to the register that currently mirrors its value, if any. No code is
    /// generated. If the value lives in half of an older pair, the pair is clobbered instead.
    pub fn update_loc(&mut self, mut loc: ValueLocation) -> Result<ValueLocation, CompilationError> {
        debug_assert!(!loc.wide);
        if loc.location != LocKind::PhysReg {
            if let Some(reg) = self.alloc_live(loc.s_reg_low, RegClass::Any) {
                let info = self.get(reg);
                if info.pair {
                    let partner = info.partner;
                    self.clobber(reg);
                    if let Some(x) = partner {
                        self.clobber(x);
                    }
                    self.free_temp(reg)?;
                } else {
                    loc.low_reg = Some(reg);
                    loc.location = LocKind::PhysReg;
                }
            }
        }
        Ok(loc)
    }

    /// The wide version of [Self::update_loc]. Both halves must be live, of the same class, an
    /// even/odd pair if FP, and (if either was previously paired) paired with each other. If not,
    /// any registers holding either half are clobbered and freed.
    pub fn update_loc_wide(
        &mut self,
        mut loc: ValueLocation,
    ) -> Result<ValueLocation, CompilationError> {
        debug_assert!(loc.wide);
        if loc.location == LocKind::PhysReg {
            return Ok(loc);
        }
        let lo = self.alloc_live(loc.s_reg_low, RegClass::Any);
        let hi = self.alloc_live(loc.s_reg_low.map(SReg::hi), RegClass::Any);
        if let (Some(lo), Some(hi)) = (lo, hi) {
            let (info_lo, info_hi) = (self.get(lo), self.get(hi));
            let mut matched = lo.is_fp() == hi.is_fp();
            if matched && lo.is_fp() {
                matched = lo.num() % 2 == 0 && lo.num().checked_add(1) == Some(hi.num());
            }
            if matched && (info_lo.pair || info_hi.pair) {
                matched = info_lo.pair == info_hi.pair
                    && info_lo.partner == Some(hi)
                    && info_hi.partner == Some(lo);
            }
            if matched {
                loc.low_reg = Some(lo);
                loc.high_reg = Some(hi);
                loc.location = LocKind::PhysReg;
                self.mark_pair(lo, hi);
                return Ok(loc);
            }
        }
        for reg in [lo, hi].into_iter().flatten() {
            let info = self.get(reg);
            let partner = if info.pair { info.partner } else { None };
            self.clobber(reg);
            self.free_temp(reg)?;
            if let Some(x) = partner {
                self.clobber(x);
            }
        }
        Ok(loc)
    }

    /// [Self::update_loc] or [Self::update_loc_wide], depending on `loc`'s width.
    pub fn update_raw_loc(&mut self, loc: ValueLocation) -> Result<ValueLocation, CompilationError> {
        if loc.wide {
            self.update_loc_wide(loc)
        } else {
            self.update_loc(loc)
        }
    }
}

impl<T: TargetCodegen> Codegen<T> {
    /// Make sure `loc` is in a register of `class`. A value already in a register of the wrong
    /// class is copied into a new temp that takes over its identity. Otherwise a temp is
    /// allocated (but not loaded) and, if `update`, marked as mirroring the value.
    pub fn eval_loc(
        &mut self,
        loc: ValueLocation,
        class: RegClass,
        update: bool,
    ) -> Result<ValueLocation, CompilationError> {
        if loc.wide {
            return self.eval_loc_wide(loc, class, update);
        }
        let mut loc = self.pool.update_loc(loc)?;
        if loc.location == LocKind::PhysReg {
            let cur = loc.low()?;
            if !class.matches(cur) {
                let new = self.pool.alloc_typed_temp(loc.fp, class)?;
                self.op_reg_copy(new, cur)?;
                self.transfer_reg(new, cur);
                loc.low_reg = Some(new);
            }
            return Ok(loc);
        }
        let s_reg = loc.s_reg()?;
        let new = self.pool.alloc_typed_temp(loc.fp, class)?;
        loc.low_reg = Some(new);
        if update {
            loc.location = LocKind::PhysReg;
            self.pool.mark_live(new, Some(s_reg));
        }
        Ok(loc)
    }

    fn eval_loc_wide(
        &mut self,
        loc: ValueLocation,
        class: RegClass,
        update: bool,
    ) -> Result<ValueLocation, CompilationError> {
        let mut loc = self.pool.update_loc_wide(loc)?;
        if loc.location == LocKind::PhysReg {
            let (cur_lo, cur_hi) = (loc.low()?, loc.high()?);
            if cur_lo.is_fp() != cur_hi.is_fp() {
                return Err(CompilationError::InternalError(format!(
                    "wide value {loc} is split across register classes"
                )));
            }
            if !class.matches(cur_lo) {
                let (lo, hi) = self.pool.alloc_typed_temp_pair(loc.fp, class)?;
                self.op_reg_copy_wide(lo, hi, cur_lo, cur_hi)?;
                self.transfer_reg(lo, cur_lo);
                self.transfer_reg(hi, cur_hi);
                loc.low_reg = Some(lo);
                loc.high_reg = Some(hi);
                self.pool.mark_pair(lo, hi);
            }
            return Ok(loc);
        }
        let s_reg = loc.s_reg()?;
        let (lo, hi) = self.pool.alloc_typed_temp_pair(loc.fp, class)?;
        loc.low_reg = Some(lo);
        loc.high_reg = Some(hi);
        self.pool.mark_pair(lo, hi);
        if update {
            loc.location = LocKind::PhysReg;
            self.pool.mark_live(lo, Some(s_reg));
            self.pool.mark_live(hi, Some(s_reg.hi()));
        }
        Ok(loc)
    }

    /// `new` (already holding a copy of `old`'s contents) takes over `old`'s identity; `old` is
    /// clobbered.
    fn transfer_reg(&mut self, new: PhysReg, old: PhysReg) {
        self.pool.copy_reg_info(new, old);
        let info = self.pool.get_mut(old);
        info.dirty = false;
        info.pair = false;
        self.pool.clobber(old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(n: u8) -> PhysReg {
        PhysReg::Core(n)
    }

    fn fp(n: u8) -> PhysReg {
        PhysReg::FloatSingle(n)
    }

    fn pool() -> RegisterPool {
        let core_regs = (0..8).map(core).collect::<Vec<_>>();
        let fp_regs = (0..8).map(fp).collect::<Vec<_>>();
        let mut temps = (1..6).map(core).collect::<Vec<_>>();
        temps.extend((0..8).map(fp));
        RegisterPool::new(&core_regs, &fp_regs, &[core(0)], &temps)
    }

    fn frame(s: usize) -> ValueLocation {
        ValueLocation {
            s_reg_low: Some(SReg::from(s)),
            ..ValueLocation::in_memory(LocKind::Frame)
        }
    }

    fn frame_wide(s: usize) -> ValueLocation {
        ValueLocation {
            wide: true,
            ..frame(s)
        }
    }

    #[test]
    fn display() {
        let mut loc = frame_wide(3);
        loc.fp = true;
        assert_eq!(loc.to_string(), "s3 frame wide fp");
        let loc = ValueLocation {
            s_reg_low: Some(SReg::from(1)),
            ..ValueLocation::in_reg_pair(core(2), core(3))
        };
        assert_eq!(loc.to_string(), "s1 r2/r3 wide");
    }

    #[test]
    fn mark_live_then_update() {
        let mut p = pool();
        for (i, r) in [core(1), core(4), fp(3)].into_iter().enumerate() {
            p.mark_live(r, Some(SReg::from(i)));
            let loc = p.update_loc(frame(i)).unwrap();
            assert_eq!(loc.location, LocKind::PhysReg);
            assert_eq!(loc.low_reg, Some(r));
        }
        let loc = p.update_loc(frame(9)).unwrap();
        assert_eq!(loc, frame(9));
    }

    #[test]
    fn update_loc_breaks_old_pairs() {
        let mut p = pool();
        p.mark_live(core(1), Some(SReg::from(0)));
        p.mark_live(core(2), Some(SReg::from(1)));
        p.mark_pair(core(1), core(2));
        let loc = p.update_loc(frame(0)).unwrap();
        assert_eq!(loc.location, LocKind::Frame);
        assert!(!p.is_live(core(1)));
        assert!(!p.is_live(core(2)));
        assert!(!p.get(core(1)).in_use);
    }

    #[test]
    fn update_loc_wide_core() {
        let mut p = pool();
        p.mark_live(core(3), Some(SReg::from(4)));
        p.mark_live(core(1), Some(SReg::from(5)));
        let loc = p.update_loc_wide(frame_wide(4)).unwrap();
        assert_eq!(loc.location, LocKind::PhysReg);
        assert_eq!((loc.low_reg, loc.high_reg), (Some(core(3)), Some(core(1))));
        assert_eq!(p.get(core(3)).partner, Some(core(1)));
        assert_eq!(p.get(core(1)).partner, Some(core(3)));
    }

    #[test]
    fn update_loc_wide_rejects_mixed_classes() {
        let mut p = pool();
        p.mark_live(core(1), Some(SReg::from(0)));
        p.mark_live(fp(1), Some(SReg::from(1)));
        let loc = p.update_loc_wide(frame_wide(0)).unwrap();
        assert_eq!(loc.location, LocKind::Frame);
        assert!(!p.is_live(core(1)));
        assert!(!p.is_live(fp(1)));
    }

    #[test]
    fn update_loc_wide_fp_alignment() {
        let mut p = pool();
        p.mark_live(fp(1), Some(SReg::from(0)));
        p.mark_live(fp(2), Some(SReg::from(1)));
        assert_eq!(
            p.update_loc_wide(frame_wide(0)).unwrap().location,
            LocKind::Frame
        );
        p.mark_live(fp(4), Some(SReg::from(0)));
        p.mark_live(fp(5), Some(SReg::from(1)));
        let loc = p.update_loc_wide(frame_wide(0)).unwrap();
        assert_eq!((loc.low_reg, loc.high_reg), (Some(fp(4)), Some(fp(5))));
    }

    #[test]
    fn update_loc_wide_rejects_other_partners() {
        let mut p = pool();
        p.mark_live(core(1), Some(SReg::from(0)));
        p.mark_live(core(2), Some(SReg::from(1)));
        p.mark_live(core(3), Some(SReg::from(2)));
        p.mark_pair(core(2), core(3));
        let loc = p.update_loc_wide(frame_wide(0)).unwrap();
        assert_eq!(loc.location, LocKind::Frame);
        for r in [core(1), core(2), core(3)] {
            assert!(!p.is_live(r), "{r}");
        }
    }

    #[test]
    fn update_loc_wide_needs_both_halves() {
        let mut p = pool();
        p.mark_live(core(4), Some(SReg::from(0)));
        let loc = p.update_loc_wide(frame_wide(0)).unwrap();
        assert_eq!(loc.location, LocKind::Frame);
        assert!(!p.is_live(core(4)));
        assert!(!p.get(core(4)).in_use);
    }

    /// Whatever state the pool is in, a wide location that `update_loc_wide` binds to registers
    /// never mixes classes and FP halves are always an aligned pair.
    #[test]
    fn update_loc_wide_pairing() {
        let regs = [core(1), core(2), core(5), fp(0), fp(1), fp(2), fp(3), fp(6)];
        for lo in regs {
            for hi in regs {
                if lo == hi {
                    continue;
                }
                let mut p = pool();
                p.mark_live(lo, Some(SReg::from(0)));
                p.mark_live(hi, Some(SReg::from(1)));
                let loc = p.update_loc_wide(frame_wide(0)).unwrap();
                if loc.location == LocKind::PhysReg {
                    let (l, h) = (loc.low_reg.unwrap(), loc.high_reg.unwrap());
                    assert_eq!(l.is_fp(), h.is_fp());
                    if l.is_fp() {
                        assert_eq!(l.num() % 2, 0);
                        assert_eq!(h.num(), l.num() + 1);
                    }
                }
            }
        }
    }
}
