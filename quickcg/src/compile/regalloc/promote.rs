//! Promotion: binding the most frequently used values of a method to callee-save registers for
//! the whole of the method.

use super::{LocKind, PhysReg};
use crate::{
    compile::{codegen::Codegen, method::SReg, CompilationError, Opt, TargetCodegen},
    log::LirPhase,
};
use std::fmt::Write;

/// Where one Dalvik register, the method pointer or one compiler temp has been promoted to. A
/// value may have both a core and an FP home.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PromotionMap {
    pub(crate) core_location: LocKind,
    pub(crate) core_reg: Option<PhysReg>,
    pub(crate) fp_location: LocKind,
    pub(crate) fp_reg: Option<PhysReg>,
}

impl Default for PromotionMap {
    fn default() -> Self {
        Self {
            core_location: LocKind::Frame,
            core_reg: None,
            fp_location: LocKind::Frame,
            fp_reg: None,
        }
    }
}

/// The weighted use count of one promotion map slot.
#[derive(Clone, Copy, Debug)]
struct RefCount {
    /// The SSA name that stands for the slot. Slots no SSA name refers to are never promoted.
    s_reg: Option<SReg>,
    count: u32,
    /// Is this slot the low word of a double?
    double_start: bool,
}

impl<T: TargetCodegen> Codegen<T> {
    /// Bind `s_reg`'s slot to the callee-save core register `reg`.
    fn record_core_promotion(&mut self, reg: PhysReg, s_reg: SReg) {
        let p = self.ir.sreg_to_pmap(s_reg);
        let vreg = self.ir.sreg_to_vreg(s_reg);
        self.pool.get_mut(reg).in_use = true;
        self.core_spill_mask |= 1 << reg.num();
        // Include reg for later sort.
        self.core_vmap_table
            .push((u32::from(reg.num()) << 16) | u32::from(vreg.as_vmap()));
        self.num_core_spills += 1;
        self.promotion_map[p].core_location = LocKind::PhysReg;
        self.promotion_map[p].core_reg = Some(reg);
        self.regs_promoted += 1;
    }

    /// Promote `s_reg` to the first free callee-save core register, if there is one.
    fn alloc_preserved_core(&mut self, s_reg: SReg) -> Option<PhysReg> {
        let reg = self
            .pool
            .core_regs()
            .iter()
            .find(|x| !x.is_temp && !x.in_use)
            .map(|x| x.reg)?;
        self.record_core_promotion(reg, s_reg);
        Some(reg)
    }

    fn record_fp_promotion(&mut self, reg: PhysReg, s_reg: SReg) -> Result<(), CompilationError> {
        let p = self.ir.sreg_to_pmap(s_reg);
        let vreg = self.ir.sreg_to_vreg(s_reg);
        self.pool.get_mut(reg).in_use = true;
        T::mark_preserved_single(self, vreg, reg)?;
        self.promotion_map[p].fp_location = LocKind::PhysReg;
        self.promotion_map[p].fp_reg = Some(reg);
        self.regs_promoted += 1;
        Ok(())
    }

    /// Promote `s_reg` to a free callee-save single whose number is even iff `even`.
    fn alloc_preserved_single(
        &mut self,
        s_reg: SReg,
        even: bool,
    ) -> Result<Option<PhysReg>, CompilationError> {
        let reg = self
            .pool
            .fp_regs()
            .iter()
            .find(|x| !x.is_temp && !x.in_use && (x.reg.num() % 2 == 0) == even)
            .map(|x| x.reg);
        match reg {
            Some(reg) => {
                self.record_fp_promotion(reg, s_reg)?;
                Ok(Some(reg))
            }
            None => Ok(None),
        }
    }

    /// Promote the double whose low word is `s_reg` to an even/odd pair of free callee-save
    /// singles, returning the low single. If the high word has already been promoted on its own,
    /// only the single below it will do.
    fn alloc_preserved_double(&mut self, s_reg: SReg) -> Result<Option<PhysReg>, CompilationError> {
        let p = self.ir.sreg_to_pmap(s_reg);
        let vreg = self.ir.sreg_to_vreg(s_reg);
        let hi_vreg = self.ir.pmap_to_vreg(p + 1);
        let hi_home = self.promotion_map.get(p + 1).copied().unwrap_or_default();
        let pair = match (hi_home.fp_location, hi_home.fp_reg) {
            (LocKind::PhysReg, Some(hi)) => {
                // Only the single below the existing high word will do.
                let n = hi.num();
                if n % 2 == 0 {
                    return Ok(None);
                }
                let lo = PhysReg::FloatSingle(n - 1);
                match self.pool.fp_regs().iter().find(|x| x.reg == lo) {
                    Some(x) if !x.in_use && !x.is_temp => {
                        self.pool.get_mut(lo).in_use = true;
                        T::mark_preserved_single(self, vreg, lo)?;
                        (lo, hi)
                    }
                    _ => return Ok(None),
                }
            }
            _ => {
                let found = self.pool.fp_regs().windows(2).find(|w| {
                    let (lo, hi) = (&w[0], &w[1]);
                    !lo.is_temp
                        && !lo.in_use
                        && lo.reg.num() % 2 == 0
                        && !hi.is_temp
                        && !hi.in_use
                        && hi.reg.num() == lo.reg.num() + 1
                });
                match found {
                    Some(w) => {
                        let (lo, hi) = (w[0].reg, w[1].reg);
                        self.pool.get_mut(lo).in_use = true;
                        T::mark_preserved_single(self, vreg, lo)?;
                        self.pool.get_mut(hi).in_use = true;
                        T::mark_preserved_single(self, hi_vreg, hi)?;
                        (lo, hi)
                    }
                    None => return Ok(None),
                }
            }
        };
        self.promotion_map[p].fp_location = LocKind::PhysReg;
        self.promotion_map[p].fp_reg = Some(pair.0);
        if let Some(x) = self.promotion_map.get_mut(p + 1) {
            x.fp_location = LocKind::PhysReg;
            x.fp_reg = Some(pair.1);
        }
        self.regs_promoted += 1;
        Ok(Some(pair.0))
    }

    /// Promote `s_reg` to a callee-save FP register. A double start tries for a pair first. Failing
    /// that, or for a lone single, an odd register is preferred, keeping even ones free for the low
    /// words of doubles.
    fn alloc_preserved_fp(
        &mut self,
        s_reg: SReg,
        double_start: bool,
    ) -> Result<Option<PhysReg>, CompilationError> {
        if double_start {
            if let Some(r) = self.alloc_preserved_double(s_reg)? {
                return Ok(Some(r));
            }
        }
        match self.alloc_preserved_single(s_reg, false)? {
            Some(r) => Ok(Some(r)),
            None => self.alloc_preserved_single(s_reg, true),
        }
    }

    /// Count the uses of every promotion map slot, split into core and FP banks.
    fn count_refs(&self) -> (Vec<RefCount>, Vec<RefCount>) {
        let mut slots = vec![
            RefCount {
                s_reg: None,
                count: 0,
                double_start: false,
            };
            self.ir.num_pmap()
        ];
        for s in self.ir.sregs() {
            let p = self.ir.sreg_to_pmap(s);
            if slots[p].s_reg.is_none() {
                slots[p].s_reg = Some(s);
            }
        }
        let mut core = slots.clone();
        let mut fp = slots;
        for s in self.ir.sregs() {
            let loc = self.ir.loc(s);
            let p = self.ir.sreg_to_pmap(s);
            let counts = if loc.fp { &mut fp } else { &mut core };
            // Cheap constants are rematerialised rather than held in a register.
            if loc.fp || !self.is_inexpensive_constant(&loc) {
                counts[p].count = counts[p].count.saturating_add(self.ir.use_count(s));
            }
            if loc.wide && loc.fp && !loc.high_word {
                counts[p].double_start = true;
            }
        }
        // Doubles need two registers, so they must be worth twice as much.
        for x in fp.iter_mut().filter(|x| x.double_start) {
            x.count = x.count.saturating_mul(2);
        }
        (core, fp)
    }

    /// Promote the most used values to callee-save registers, then rewrite the location of every
    /// SSA name whose value now has a permanent home.
    pub fn do_promotion(&mut self) -> Result<(), CompilationError> {
        T::adjust_spill_mask(self);
        let (core, fp) = self.count_refs();
        let sort = |counts: Vec<RefCount>| {
            let mut v = counts
                .into_iter()
                .filter(|x| x.s_reg.is_some())
                .collect::<Vec<_>>();
            v.sort_by(|a, b| b.count.cmp(&a.count).then(a.s_reg.cmp(&b.s_reg)));
            v
        };
        let (core, fp) = (sort(core), sort(fp));
        self.log_phase(LirPhase::Promotion, |_| {
            let mut s = String::new();
            for (name, counts) in [("Core", &core), ("Fp", &fp)] {
                writeln!(s, "{name} regs after sort").ok();
                for x in counts.iter() {
                    if let Some(r) = x.s_reg {
                        writeln!(s, "{r}: {}", x.count).ok();
                    }
                }
            }
            s
        });

        if self.opts.enabled(Opt::PromoteRegs) {
            for x in fp.iter().take_while(|x| x.count >= 1) {
                let Some(s_reg) = x.s_reg else { continue };
                let p = self.ir.sreg_to_pmap(s_reg);
                if self.promotion_map[p].fp_location != LocKind::PhysReg
                    && self.alloc_preserved_fp(s_reg, x.double_start)?.is_none()
                {
                    // Out of callee-save FP registers.
                    break;
                }
            }
            for x in core.iter().take_while(|x| x.count >= 1) {
                let Some(s_reg) = x.s_reg else { continue };
                let p = self.ir.sreg_to_pmap(s_reg);
                if self.promotion_map[p].core_location != LocKind::PhysReg
                    && self.alloc_preserved_core(s_reg).is_none()
                {
                    break;
                }
            }
        }

        let sregs = self.ir.sregs().collect::<Vec<_>>();
        let homes = sregs
            .iter()
            .map(|s| {
                let p = self.ir.sreg_to_pmap(*s);
                let hi = self.promotion_map.get(p + 1).copied();
                (self.promotion_map[p], hi)
            })
            .collect::<Vec<_>>();
        for (loc, (home, hi_home)) in self.ir.locs_mut().zip(homes) {
            if !loc.wide {
                let (kind, reg) = if loc.fp {
                    (home.fp_location, home.fp_reg)
                } else {
                    (home.core_location, home.core_reg)
                };
                if let (LocKind::PhysReg, Some(r)) = (kind, reg) {
                    loc.location = LocKind::PhysReg;
                    loc.low_reg = Some(r);
                    loc.high_reg = None;
                    loc.home = true;
                }
            } else if !loc.high_word {
                let hi_home = hi_home.unwrap_or_default();
                let regs = if loc.fp {
                    match (home.fp_location, home.fp_reg, hi_home.fp_location, hi_home.fp_reg) {
                        (LocKind::PhysReg, Some(lo), LocKind::PhysReg, Some(hi))
                            if lo.num() % 2 == 0 && hi.num() == lo.num() + 1 =>
                        {
                            Some((lo, hi))
                        }
                        _ => None,
                    }
                } else {
                    match (
                        home.core_location,
                        home.core_reg,
                        hi_home.core_location,
                        hi_home.core_reg,
                    ) {
                        (LocKind::PhysReg, Some(lo), LocKind::PhysReg, Some(hi)) => Some((lo, hi)),
                        _ => None,
                    }
                };
                if let Some((lo, hi)) = regs {
                    loc.location = LocKind::PhysReg;
                    loc.low_reg = Some(lo);
                    loc.high_reg = Some(hi);
                    loc.home = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        codegen::tests::mips_codegen,
        method::{MethodIr, SsaReg, VReg},
        mips::{MipsTarget, FP, S2, S3, S4, S5, S6, S7, T9},
        CompilerOptions,
    };

    fn s(n: usize) -> SReg {
        SReg::from(n)
    }

    fn method(ssa: Vec<SsaReg>, num_dalvik_regs: usize) -> Codegen<MipsTarget> {
        let ir = MethodIr::new(num_dalvik_regs, 0, 0, ssa).unwrap();
        Codegen::new(MipsTarget::new(false), CompilerOptions::default(), ir)
    }

    #[test]
    fn most_used_first() {
        let mut cg = method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).uses(1),
                SsaReg::new(VReg::Dalvik(1)).uses(5),
                SsaReg::new(VReg::Dalvik(2)).uses(5),
                SsaReg::new(VReg::Dalvik(3)),
                SsaReg::new(VReg::Dalvik(0)).uses(3),
            ],
            4,
        );
        cg.do_promotion().unwrap();
        // v0 totals 4 uses across its two SSA names; v1/v2 tie and are ordered by SSA name.
        assert_eq!(cg.promotion_map[1].core_reg, Some(S2));
        assert_eq!(cg.promotion_map[2].core_reg, Some(S3));
        assert_eq!(cg.promotion_map[0].core_reg, Some(S4));
        // No uses, no promotion.
        assert_eq!(cg.promotion_map[3].core_location, LocKind::Frame);
        assert_eq!(cg.regs_promoted, 3);
        // Both of v0's SSA names share its home.
        for x in [s(0), s(4)] {
            let loc = cg.ir.loc(x);
            assert_eq!(loc.location, LocKind::PhysReg);
            assert_eq!(loc.low_reg, Some(S4));
            assert!(loc.home);
        }
        assert_eq!(cg.ir.loc(s(3)).location, LocKind::Frame);
        // ra plus three promoted registers.
        assert_eq!(cg.num_core_spills, 4);
        assert_eq!(
            cg.core_spill_mask,
            (1 << 31) | (1 << S2.num()) | (1 << S3.num()) | (1 << S4.num())
        );
    }

    #[test]
    fn deterministic() {
        let ssa = || {
            (0..10)
                .map(|i| SsaReg::new(VReg::Dalvik(i)).uses(u32::from(i % 3)))
                .collect::<Vec<_>>()
        };
        let mut a = method(ssa(), 10);
        let mut b = method(ssa(), 10);
        a.do_promotion().unwrap();
        b.do_promotion().unwrap();
        let homes = |cg: &Codegen<MipsTarget>| {
            cg.promotion_map
                .iter()
                .map(|x| x.core_reg)
                .collect::<Vec<_>>()
        };
        assert_eq!(homes(&a), homes(&b));
        assert_eq!(a.core_vmap_table, b.core_vmap_table);
    }

    #[test]
    fn runs_out_of_callee_saves() {
        let mut cg = method(
            (0..10)
                .map(|i| SsaReg::new(VReg::Dalvik(i)).uses(20 - u32::from(i)))
                .collect(),
            10,
        );
        cg.do_promotion().unwrap();
        let promoted = cg
            .promotion_map
            .iter()
            .filter_map(|x| x.core_reg)
            .collect::<Vec<_>>();
        assert_eq!(promoted, [S2, S3, S4, S5, S6, S7, T9, FP]);
        assert_eq!(cg.ir.loc(s(8)).location, LocKind::Frame);
        assert!(!cg.ir.loc(s(9)).home);
    }

    #[test]
    fn cheap_constants_stay_unpromoted() {
        let mut cg = method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).uses(9).constant(1),
                SsaReg::new(VReg::Dalvik(1)).uses(9).constant(0x12345678),
            ],
            2,
        );
        cg.do_promotion().unwrap();
        assert_eq!(cg.promotion_map[0].core_location, LocKind::Frame);
        assert_eq!(cg.promotion_map[1].core_reg, Some(S2));
    }

    #[test]
    fn wide_core_needs_both_halves() {
        let mut cg = method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).wide().uses(4),
                SsaReg::new(VReg::Dalvik(1)).high_word().uses(4),
                SsaReg::new(VReg::Dalvik(2)).wide().uses(2),
                SsaReg::new(VReg::Dalvik(3)).high_word(),
            ],
            4,
        );
        cg.do_promotion().unwrap();
        let loc = cg.ir.loc(s(0));
        assert!(loc.home);
        assert_eq!((loc.low_reg, loc.high_reg), (Some(S2), Some(S3)));
        // The high word location itself is left alone.
        assert!(!cg.ir.loc(s(1)).home);
        // v2 was promoted, but v3 wasn't, so the pair stays in memory.
        assert_eq!(cg.promotion_map[2].core_reg, Some(S4));
        assert_eq!(cg.ir.loc(s(2)).location, LocKind::Frame);
    }

    #[test]
    fn promotion_disabled() {
        let mut cg = mips_codegen(2, vec![SsaReg::new(VReg::Dalvik(0)).uses(4)]);
        cg.opts.disable(Opt::PromoteRegs);
        cg.do_promotion().unwrap();
        assert!(cg.promotion_map.iter().all(|x| x.core_reg.is_none()));
        // ra is still spilled.
        assert_eq!(cg.num_core_spills, 1);
    }

    #[test]
    fn method_and_temps_have_slots() {
        let mut cg = method(
            vec![
                SsaReg::new(VReg::Dalvik(0)),
                SsaReg::new(VReg::Method).reference().uses(2),
                SsaReg::new(VReg::Temp(0)).uses(3),
            ],
            1,
        );
        cg.do_promotion().unwrap();
        assert_eq!(cg.promotion_map[2].core_reg, Some(S2));
        assert_eq!(cg.promotion_map[1].core_reg, Some(S3));
        assert_eq!(cg.ir.method_loc().low_reg, Some(S3));
        assert_eq!(
            cg.core_vmap_table,
            [
                (u32::from(S2.num()) << 16) | u32::from(VReg::Temp(0).as_vmap()),
                (u32::from(S3.num()) << 16) | u32::from(VReg::Method.as_vmap()),
            ]
        );
    }

    /// A target identical to MIPS except that `f20..f23` are callee-save.
    mod fp_saves {
        use super::*;
        use crate::compile::{
            lir::{Lir, LirIdx},
            mips::MipsOpcode,
            regalloc::ValueLocation,
            AssemblerStatus, OpSize,
        };

        pub(super) struct FpSaveTarget;

        const FP_REGS: [PhysReg; 24] = {
            let mut regs = [PhysReg::FloatSingle(0); 24];
            let mut i = 0;
            while i < 24 {
                regs[i] = PhysReg::FloatSingle(i as u8);
                i += 1;
            }
            regs
        };

        const TEMP_REGS: [PhysReg; 20] = {
            let mut regs = [PhysReg::FloatSingle(0); 20];
            let mut i = 0;
            while i < 20 {
                regs[i] = PhysReg::FloatSingle(i as u8);
                i += 1;
            }
            regs
        };

        impl TargetCodegen for FpSaveTarget {
            type Opcode = MipsOpcode;
            const DATA_OPCODE: MipsOpcode = MipsTarget::DATA_OPCODE;
            const CORE_REGS: &'static [PhysReg] = MipsTarget::CORE_REGS;
            const FP_REGS: &'static [PhysReg] = &FP_REGS;
            const RESERVED_REGS: &'static [PhysReg] = MipsTarget::RESERVED_REGS;
            const TEMP_REGS: &'static [PhysReg] = &TEMP_REGS;
            const CALL_TEMPS: &'static [PhysReg] = MipsTarget::CALL_TEMPS;
            const CALLER_SAVE: &'static [PhysReg] = MipsTarget::CALLER_SAVE;
            const SP: PhysReg = MipsTarget::SP;

            fn loc_c_return() -> ValueLocation {
                MipsTarget::loc_c_return()
            }
            fn loc_c_return_wide() -> ValueLocation {
                MipsTarget::loc_c_return_wide()
            }
            fn loc_c_return_float() -> ValueLocation {
                MipsTarget::loc_c_return_float()
            }
            fn loc_c_return_double() -> ValueLocation {
                MipsTarget::loc_c_return_double()
            }
            fn insn_flags(op: MipsOpcode) -> u64 {
                MipsTarget::insn_flags(op)
            }
            fn insn_size(op: MipsOpcode) -> u32 {
                MipsTarget::insn_size(op)
            }
            fn reg_mask(reg: PhysReg) -> u64 {
                MipsTarget::reg_mask(reg)
            }
            fn dump_insn(lir: &Lir<MipsOpcode>, base_addr: u32) -> String {
                MipsTarget::dump_insn(lir, base_addr)
            }
            fn reg_name(reg: PhysReg) -> String {
                MipsTarget::reg_name(reg)
            }
            fn op_reg_copy_no_insert(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: PhysReg,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn op_reg_copy_wide(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: PhysReg,
                _: PhysReg,
                _: PhysReg,
            ) -> Result<(), CompilationError> {
                unreachable!()
            }
            fn load_constant_no_clobber(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: i32,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn load_constant_wide(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: PhysReg,
                _: i64,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn load_base_disp(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: i32,
                _: PhysReg,
                _: OpSize,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn load_base_disp_wide(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: i32,
                _: PhysReg,
                _: PhysReg,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn store_base_disp(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: i32,
                _: PhysReg,
                _: OpSize,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn store_base_disp_wide(
                _: &mut Codegen<Self>,
                _: PhysReg,
                _: i32,
                _: PhysReg,
                _: PhysReg,
            ) -> Result<LirIdx, CompilationError> {
                unreachable!()
            }
            fn inexpensive_constant_int(value: i32) -> bool {
                MipsTarget::inexpensive_constant_int(value)
            }
            fn inexpensive_constant_float(value: i32) -> bool {
                MipsTarget::inexpensive_constant_float(value)
            }
            fn inexpensive_constant_long(value: i64) -> bool {
                MipsTarget::inexpensive_constant_long(value)
            }
            fn inexpensive_constant_double(value: i64) -> bool {
                MipsTarget::inexpensive_constant_double(value)
            }
            fn assemble_instructions(
                _: &mut Codegen<Self>,
                _: u32,
            ) -> Result<AssemblerStatus, CompilationError> {
                unreachable!()
            }
            fn switch_table_base(anchor_offset: u32) -> u32 {
                anchor_offset
            }
        }

        pub(super) fn method(ssa: Vec<SsaReg>, num_dalvik_regs: usize) -> Codegen<FpSaveTarget> {
            let ir = MethodIr::new(num_dalvik_regs, 0, 0, ssa).unwrap();
            Codegen::new(FpSaveTarget, CompilerOptions::default(), ir)
        }
    }

    fn f(n: u8) -> PhysReg {
        PhysReg::FloatSingle(n)
    }

    #[test]
    fn fp_singles_prefer_odd() {
        let mut cg = fp_saves::method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).fp().uses(3),
                SsaReg::new(VReg::Dalvik(1)).fp().uses(2),
                SsaReg::new(VReg::Dalvik(2)).fp().uses(1),
            ],
            3,
        );
        cg.do_promotion().unwrap();
        assert_eq!(cg.promotion_map[0].fp_reg, Some(f(21)));
        assert_eq!(cg.promotion_map[1].fp_reg, Some(f(23)));
        assert_eq!(cg.promotion_map[2].fp_reg, Some(f(20)));
        assert!(cg.ir.loc(s(2)).home);
        // f20 holds v2, f21 v0, f22 nothing, f23 v1.
        assert_eq!(cg.fp_vmap_table, [2, 0, 0xffff, 1]);
        assert_eq!(cg.num_fp_spills, 4);
        assert_eq!(cg.fp_spill_mask, 0xf << 20);
    }

    #[test]
    fn fp_doubles_take_pairs() {
        let mut cg = fp_saves::method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).fp().uses(3),
                SsaReg::new(VReg::Dalvik(1)).fp().wide().uses(2),
                SsaReg::new(VReg::Dalvik(2)).fp().high_word().uses(2),
            ],
            3,
        );
        cg.do_promotion().unwrap();
        // The double's count is doubled, so it is promoted first and takes the first pair.
        assert_eq!(cg.promotion_map[1].fp_reg, Some(f(20)));
        assert_eq!(cg.promotion_map[2].fp_reg, Some(f(21)));
        assert_eq!(cg.promotion_map[0].fp_reg, Some(f(23)));
        let loc = cg.ir.loc(s(1));
        assert!(loc.home);
        assert_eq!((loc.low_reg, loc.high_reg), (Some(f(20)), Some(f(21))));
        assert_eq!(cg.fp_vmap_table, [1, 2, 0xffff, 0]);
    }

    #[test]
    fn fp_double_without_a_pair_takes_a_single() {
        let mut cg = fp_saves::method(
            vec![
                SsaReg::new(VReg::Dalvik(0)).fp().uses(10),
                SsaReg::new(VReg::Dalvik(1)).fp().uses(9),
                SsaReg::new(VReg::Dalvik(2)).fp().wide().uses(2),
                SsaReg::new(VReg::Dalvik(3)).fp().high_word().uses(2),
                SsaReg::new(VReg::Dalvik(4)).fp().uses(1),
            ],
            5,
        );
        cg.do_promotion().unwrap();
        // v0 and v1 take the odd singles, leaving no pair for v2/v3.
        let homes = cg.promotion_map.iter().map(|x| x.fp_reg).collect::<Vec<_>>();
        assert_eq!(homes, [Some(f(21)), Some(f(23)), Some(f(20)), Some(f(22)), None, None]);
        assert_eq!(cg.regs_promoted, 4);
        // The halves are not an even/odd pair, so the double itself stays in memory.
        let loc = cg.ir.loc(s(2));
        assert!(!loc.home);
        assert_eq!(loc.location, LocKind::Frame);
        assert!(cg.ir.loc(s(1)).home);
    }

    #[test]
    fn mips_has_no_fp_callee_saves() {
        let mut cg = method(vec![SsaReg::new(VReg::Dalvik(0)).fp().uses(5)], 1);
        cg.do_promotion().unwrap();
        assert_eq!(cg.promotion_map[0].fp_location, LocKind::Frame);
        assert_eq!(cg.num_fp_spills, 0);
    }
}
