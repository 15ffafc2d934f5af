//! The register file: every physical register a target offers, which of them the general
//! allocator may hand out, and which value (if any) each register currently mirrors.
//!
//! Registers come in two banks, core and floating point. Floating point doubles are not separate
//! registers: a double *is* an even/odd pair of adjacent singles (see [PhysReg::singles]), so the
//! pool only tracks singles and pairs them on demand.
//!
//! Registers that are neither reserved nor temps are left for [Codegen::do_promotion] to bind
//! permanently to a value for a whole method.
//!
//! [Codegen::do_promotion]: super::codegen::Codegen::do_promotion

use super::{lir::LirIdx, method::SReg, CompilationError};
use std::fmt::{self, Write};

mod liveness;
mod location;
mod promote;

pub use location::{LocKind, ValueLocation};
pub(crate) use promote::PromotionMap;

/// A physical register.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum PhysReg {
    Core(u8),
    FloatSingle(u8),
    /// A double: the low and high singles it is composed of.
    FloatDouble(u8, u8),
}

/// The operand encoding of a single in LIR operands.
const FP_REG_OFFSET: i32 = 32;
/// The operand encoding of a double in LIR operands (added to [FP_REG_OFFSET]).
const FP_DOUBLE: i32 = 64;

impl PhysReg {
    /// The register's number within its bank. For doubles, the number of the low single.
    pub fn num(self) -> u8 {
        match self {
            PhysReg::Core(n) | PhysReg::FloatSingle(n) | PhysReg::FloatDouble(n, _) => n,
        }
    }

    pub fn is_fp(self) -> bool {
        !matches!(self, PhysReg::Core(_))
    }

    pub fn is_double(self) -> bool {
        matches!(self, PhysReg::FloatDouble(..))
    }

    /// The singles this register overlaps.
    pub fn singles(self) -> Vec<PhysReg> {
        match self {
            PhysReg::Core(_) => vec![],
            PhysReg::FloatSingle(_) => vec![self],
            PhysReg::FloatDouble(lo, hi) => vec![PhysReg::FloatSingle(lo), PhysReg::FloatSingle(hi)],
        }
    }

    /// The double composed of the singles `lo` and `hi`.
    ///
    /// # Panics
    ///
    /// If `lo` and `hi` are not an even/odd pair of adjacent singles.
    pub fn s2d(lo: PhysReg, hi: PhysReg) -> PhysReg {
        match (lo, hi) {
            (PhysReg::FloatSingle(l), PhysReg::FloatSingle(h)) if l % 2 == 0 && h == l + 1 => {
                PhysReg::FloatDouble(l, h)
            }
            _ => panic!("{lo} and {hi} cannot form a double"),
        }
    }

    /// Encode this register as a LIR operand.
    pub fn to_operand(self) -> i32 {
        match self {
            PhysReg::Core(n) => i32::from(n),
            PhysReg::FloatSingle(n) => FP_REG_OFFSET + i32::from(n),
            PhysReg::FloatDouble(lo, _) => FP_REG_OFFSET + FP_DOUBLE + i32::from(lo),
        }
    }

    /// Decode a LIR operand produced by [Self::to_operand].
    pub fn from_operand(op: i32) -> PhysReg {
        let n = (op & 0x1f) as u8;
        if op >= FP_REG_OFFSET + FP_DOUBLE {
            PhysReg::FloatDouble(n, n + 1)
        } else if op >= FP_REG_OFFSET {
            PhysReg::FloatSingle(n)
        } else {
            PhysReg::Core(n)
        }
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysReg::Core(n) => write!(f, "r{n}"),
            PhysReg::FloatSingle(n) => write!(f, "f{n}"),
            PhysReg::FloatDouble(lo, hi) => write!(f, "f{lo}:f{hi}"),
        }
    }
}

/// The class of register an operation needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegClass {
    Core,
    Fp,
    Any,
}

impl RegClass {
    /// Does `reg` satisfy a request for this class?
    pub fn matches(self, reg: PhysReg) -> bool {
        match self {
            RegClass::Any => true,
            RegClass::Core => !reg.is_fp(),
            RegClass::Fp => reg.is_fp(),
        }
    }
}

/// The allocator's view of one physical register.
#[derive(Clone, Debug)]
pub struct RegisterInfo {
    pub reg: PhysReg,
    /// Reserved by a live computation (or permanently, for reserved and promoted registers).
    pub in_use: bool,
    /// Can the general allocator hand this register out? If not, it is reserved or promoted.
    pub is_temp: bool,
    /// Does this register hold one half of a wide value?
    pub pair: bool,
    /// If `pair`, the register holding the other half.
    pub partner: Option<PhysReg>,
    /// Does this register currently mirror `s_reg`?
    pub live: bool,
    /// Does this register hold a value not yet written to its home slot?
    pub dirty: bool,
    pub s_reg: Option<SReg>,
    /// The first LIR of the last store of this register's value to its home slot.
    pub def_start: Option<LirIdx>,
    /// The last LIR of the last store of this register's value to its home slot.
    pub def_end: Option<LirIdx>,
}

impl RegisterInfo {
    fn new(reg: PhysReg) -> Self {
        Self {
            reg,
            in_use: false,
            is_temp: false,
            pair: false,
            partner: None,
            live: false,
            dirty: false,
            s_reg: None,
            def_start: None,
            def_end: None,
        }
    }
}

/// The register file of one method.
#[derive(Debug)]
pub struct RegisterPool {
    core_regs: Vec<RegisterInfo>,
    fp_regs: Vec<RegisterInfo>,
    /// Where the next core temp search starts.
    next_core_reg: usize,
    /// Where the next FP temp search starts.
    next_fp_reg: usize,
    /// The destination of the last store, used to detect a value being stored twice without an
    /// intervening clobber.
    pub(crate) live_sreg: Option<SReg>,
}

impl RegisterPool {
    /// Build a pool over `core` and `fp`. Registers in `reserved` are permanently in use;
    /// registers in `temps` may be handed out by the general allocator. Everything else is a
    /// promotion candidate.
    ///
    /// # Panics
    ///
    /// If `reserved` or `temps` mention a register in neither `core` nor `fp`.
    pub fn new(core: &[PhysReg], fp: &[PhysReg], reserved: &[PhysReg], temps: &[PhysReg]) -> Self {
        let mut pool = Self {
            core_regs: core.iter().map(|r| RegisterInfo::new(*r)).collect(),
            fp_regs: fp.iter().map(|r| RegisterInfo::new(*r)).collect(),
            next_core_reg: 0,
            next_fp_reg: 0,
            live_sreg: None,
        };
        for r in reserved {
            pool.mark_in_use(*r);
        }
        for r in temps {
            pool.mark_temp(*r);
        }
        pool
    }

    fn bank(&self, fp: bool) -> &[RegisterInfo] {
        if fp {
            &self.fp_regs
        } else {
            &self.core_regs
        }
    }

    fn bank_mut(&mut self, fp: bool) -> &mut [RegisterInfo] {
        if fp {
            &mut self.fp_regs
        } else {
            &mut self.core_regs
        }
    }

    fn find(&self, reg: PhysReg) -> Option<&RegisterInfo> {
        self.bank(reg.is_fp()).iter().find(|x| x.reg == reg)
    }

    fn find_mut(&mut self, reg: PhysReg) -> Option<&mut RegisterInfo> {
        self.bank_mut(reg.is_fp()).iter_mut().find(|x| x.reg == reg)
    }

    /// Look up the [RegisterInfo] of `reg`.
    ///
    /// # Panics
    ///
    /// If `reg` is not in this pool (including if it is a double).
    pub fn get(&self, reg: PhysReg) -> &RegisterInfo {
        self.find(reg)
            .unwrap_or_else(|| panic!("{reg} is not in the register pool"))
    }

    /// Look up the [RegisterInfo] of `reg` mutably.
    ///
    /// # Panics
    ///
    /// If `reg` is not in this pool (including if it is a double).
    pub fn get_mut(&mut self, reg: PhysReg) -> &mut RegisterInfo {
        self.find_mut(reg)
            .unwrap_or_else(|| panic!("{reg} is not in the register pool"))
    }

    pub fn core_regs(&self) -> &[RegisterInfo] {
        &self.core_regs
    }

    pub fn fp_regs(&self) -> &[RegisterInfo] {
        &self.fp_regs
    }

    /// Free every temp. Liveness is unaffected: a temp stays live until it is clobbered or
    /// reallocated.
    pub fn reset(&mut self) {
        for x in self.core_regs.iter_mut().chain(self.fp_regs.iter_mut()) {
            if x.is_temp {
                x.in_use = false;
            }
        }
        self.live_sreg = None;
    }

    /// Mark `reg` as no longer mirroring any value. Promoted and reserved registers are
    /// unaffected. If `reg` is half of a pair, its partner is clobbered too.
    pub fn clobber(&mut self, reg: PhysReg) {
        let mut reg = reg;
        loop {
            let p = self.get_mut(reg);
            if !p.is_temp {
                return;
            }
            debug_assert!(!(p.live && p.dirty), "Live & dirty temp {reg} in clobber");
            p.live = false;
            p.s_reg = None;
            p.def_start = None;
            p.def_end = None;
            if !p.pair {
                return;
            }
            p.pair = false;
            match p.partner {
                Some(x) => reg = x,
                None => return,
            }
        }
    }

    /// Break the association between `s_reg` and any temp that mirrors it. `s_reg` may then be
    /// stored to again.
    pub fn clobber_sreg(&mut self, s_reg: SReg) {
        if self.live_sreg == Some(s_reg) {
            self.live_sreg = None;
        }
        self.unbind_sreg(s_reg);
    }

    /// Stop any register mirroring `s_reg`, without counting as a clobber of the value itself.
    fn unbind_sreg(&mut self, s_reg: SReg) {
        for x in self.core_regs.iter_mut().chain(self.fp_regs.iter_mut()) {
            if x.s_reg == Some(s_reg) {
                if x.is_temp {
                    x.live = false;
                }
                x.def_start = None;
                x.def_end = None;
            }
        }
    }

    /// Clobber every register.
    pub fn clobber_all(&mut self) {
        let regs = self
            .core_regs
            .iter()
            .chain(self.fp_regs.iter())
            .map(|x| x.reg)
            .collect::<Vec<_>>();
        for r in regs {
            self.clobber(r);
        }
    }

    /// Allocate a temp from one bank, round-robin from the last allocation. Temps that do not
    /// mirror a value are preferred over live ones.
    fn alloc_temp_body(&mut self, fp: bool) -> Result<PhysReg, CompilationError> {
        self.try_alloc_temp(fp).ok_or_else(|| {
            CompilationError::ResourceExhausted(
                format!(
                    "No free temp registers{}",
                    if fp { " (fp)" } else { "" }
                )
                .into(),
            )
        })
    }

    fn try_alloc_temp(&mut self, fp: bool) -> Option<PhysReg> {
        let n = self.bank(fp).len();
        let start = if fp {
            self.next_fp_reg
        } else {
            self.next_core_reg
        };
        for avoid_live in [true, false] {
            let mut next = start;
            for _ in 0..n {
                if next >= n {
                    next = 0;
                }
                let p = &self.bank(fp)[next];
                if p.is_temp && !p.in_use && !(avoid_live && p.live) {
                    let reg = p.reg;
                    self.clobber(reg);
                    let p = &mut self.bank_mut(fp)[next];
                    p.in_use = true;
                    p.pair = false;
                    if fp {
                        self.next_fp_reg = next + 1;
                    } else {
                        self.next_core_reg = next + 1;
                    }
                    return Some(reg);
                }
                next += 1;
            }
        }
        None
    }

    /// Allocate a core temp.
    pub fn alloc_temp(&mut self) -> Result<PhysReg, CompilationError> {
        self.alloc_temp_body(false)
    }

    /// Allocate a core temp if one is available.
    pub fn alloc_free_temp(&mut self) -> Option<PhysReg> {
        self.try_alloc_temp(false)
    }

    /// Allocate a single-precision FP temp.
    pub fn alloc_temp_float(&mut self) -> Result<PhysReg, CompilationError> {
        self.alloc_temp_body(true)
    }

    /// Allocate an even/odd pair of FP temps forming a double, returning `(low, high)`. Pairs
    /// where neither half mirrors a value are preferred; failing that, a live pair is killed.
    pub fn alloc_temp_double(&mut self) -> Result<(PhysReg, PhysReg), CompilationError> {
        let n = self.fp_regs.len();
        for avoid_live in [true, false] {
            let mut next = self.next_fp_reg & !1;
            for _ in (0..n).step_by(2) {
                if next >= n {
                    next = 0;
                }
                if next + 1 < n {
                    let (lo, hi) = (&self.fp_regs[next], &self.fp_regs[next + 1]);
                    let free = |p: &RegisterInfo| p.is_temp && !p.in_use && !(avoid_live && p.live);
                    if free(lo) && free(hi) {
                        let (lo, hi) = (lo.reg, hi.reg);
                        debug_assert!(lo.num() % 2 == 0 && hi.num() == lo.num() + 1);
                        self.clobber(lo);
                        self.clobber(hi);
                        self.fp_regs[next].in_use = true;
                        self.fp_regs[next + 1].in_use = true;
                        self.next_fp_reg = next + 2;
                        if self.next_fp_reg >= n {
                            self.next_fp_reg = 0;
                        }
                        return Ok((lo, hi));
                    }
                }
                next += 2;
            }
        }
        Err(CompilationError::ResourceExhausted(
            "No free temp registers (pair)".into(),
        ))
    }

    /// Allocate a temp of `class`. An `Any` request goes to the FP bank iff `fp_hint`.
    pub fn alloc_typed_temp(
        &mut self,
        fp_hint: bool,
        class: RegClass,
    ) -> Result<PhysReg, CompilationError> {
        if (class == RegClass::Any && fp_hint) || class == RegClass::Fp {
            self.alloc_temp_float()
        } else {
            self.alloc_temp()
        }
    }

    /// Allocate a `(low, high)` pair of temps of `class`: a double for FP, otherwise any two core
    /// temps.
    pub fn alloc_typed_temp_pair(
        &mut self,
        fp_hint: bool,
        class: RegClass,
    ) -> Result<(PhysReg, PhysReg), CompilationError> {
        if (class == RegClass::Any && fp_hint) || class == RegClass::Fp {
            self.alloc_temp_double()
        } else {
            let lo = self.alloc_temp()?;
            let hi = self.alloc_temp()?;
            Ok((lo, hi))
        }
    }

    /// If a register of `class` currently mirrors `s_reg`, reserve and return it. `Any` searches
    /// the FP bank first.
    pub fn alloc_live(&mut self, s_reg: Option<SReg>, class: RegClass) -> Option<PhysReg> {
        let s_reg = s_reg?;
        let banks: &[bool] = match class {
            RegClass::Any => &[true, false],
            RegClass::Core => &[false],
            RegClass::Fp => &[true],
        };
        for fp in banks {
            if let Some(p) = self
                .bank_mut(*fp)
                .iter_mut()
                .find(|p| p.live && p.s_reg == Some(s_reg))
            {
                if p.is_temp {
                    p.in_use = true;
                }
                return Some(p.reg);
            }
        }
        None
    }

    /// Release `reg`. Promoted registers stay in use.
    pub fn free_temp(&mut self, reg: PhysReg) -> Result<(), CompilationError> {
        let p = self.find_mut(reg).ok_or_else(|| {
            CompilationError::InternalError(format!("Tried to free a non-existent temp: {reg}"))
        })?;
        if p.is_temp {
            p.in_use = false;
        }
        p.pair = false;
        Ok(())
    }

    /// Reserve the specific temp `reg`, which stops mirroring any value. No check is made that
    /// `reg` was free.
    pub fn lock_temp(&mut self, reg: PhysReg) -> Result<(), CompilationError> {
        let p = self.find_mut(reg).ok_or_else(|| {
            CompilationError::InternalError(format!("Tried to lock a non-existent temp: {reg}"))
        })?;
        debug_assert!(p.is_temp, "{reg} is not a temp");
        p.in_use = true;
        p.live = false;
        Ok(())
    }

    /// Is `reg` mirroring a value? Registers outside the pool never are.
    pub fn is_live(&self, reg: PhysReg) -> bool {
        self.find(reg).map(|p| p.live).unwrap_or(false)
    }

    pub fn is_temp(&self, reg: PhysReg) -> bool {
        self.get(reg).is_temp
    }

    pub fn is_promoted(&self, reg: PhysReg) -> bool {
        !self.get(reg).is_temp
    }

    pub fn is_dirty(&self, reg: PhysReg) -> bool {
        self.get(reg).dirty
    }

    pub fn mark_in_use(&mut self, reg: PhysReg) {
        self.get_mut(reg).in_use = true;
    }

    pub fn mark_temp(&mut self, reg: PhysReg) {
        self.get_mut(reg).is_temp = true;
    }

    pub fn unmark_temp(&mut self, reg: PhysReg) {
        self.get_mut(reg).is_temp = false;
    }

    pub fn mark_pair(&mut self, lo: PhysReg, hi: PhysReg) {
        let info_lo = self.get_mut(lo);
        info_lo.pair = true;
        info_lo.partner = Some(hi);
        let info_hi = self.get_mut(hi);
        info_hi.pair = true;
        info_hi.partner = Some(lo);
    }

    /// Record that `reg` mirrors `s_reg`. Any other register mirroring `s_reg` stops doing so.
    /// Promoted registers record `s_reg` but are never considered live.
    pub fn mark_live(&mut self, reg: PhysReg, s_reg: Option<SReg>) {
        let info = self.get(reg);
        if info.s_reg == s_reg && info.live {
            return;
        }
        match s_reg {
            Some(s) => {
                self.unbind_sreg(s);
                let info = self.get_mut(reg);
                if info.is_temp {
                    info.live = true;
                }
            }
            None => {
                let info = self.get_mut(reg);
                debug_assert!(info.is_temp);
                info.live = false;
            }
        }
        self.get_mut(reg).s_reg = s_reg;
    }

    pub fn mark_clean(&mut self, loc: &ValueLocation) {
        for r in [loc.low_reg, if loc.wide { loc.high_reg } else { None }]
            .into_iter()
            .flatten()
        {
            self.get_mut(r).dirty = false;
        }
    }

    /// Mark the registers of `loc` dirty, unless `loc` is its value's permanent home.
    pub fn mark_dirty(&mut self, loc: &ValueLocation) {
        if loc.home {
            return;
        }
        for r in [loc.low_reg, if loc.wide { loc.high_reg } else { None }]
            .into_iter()
            .flatten()
        {
            self.get_mut(r).dirty = true;
        }
    }

    /// Make `new` a copy of `old`'s state, except that `new` keeps its own temp status.
    pub fn copy_reg_info(&mut self, new: PhysReg, old: PhysReg) {
        let mut info = self.get(old).clone();
        let new_info = self.get_mut(new);
        info.is_temp = new_info.is_temp;
        info.reg = new;
        *new_info = info;
    }

    pub fn reset_def(&mut self, reg: PhysReg) {
        let p = self.get_mut(reg);
        p.def_start = None;
        p.def_end = None;
    }

    pub fn reset_def_tracking(&mut self) {
        for x in self.core_regs.iter_mut().chain(self.fp_regs.iter_mut()) {
            x.def_start = None;
            x.def_end = None;
        }
    }

    /// Free the registers of `free` unless any of them are shared with `keep`.
    pub fn free_reg_loc_temps(
        &mut self,
        keep: &ValueLocation,
        free: &ValueLocation,
    ) -> Result<(), CompilationError> {
        if free.low_reg != keep.low_reg
            && free.low_reg != keep.high_reg
            && free.high_reg != keep.low_reg
            && free.high_reg != keep.high_reg
        {
            for r in [free.low_reg, free.high_reg].into_iter().flatten() {
                self.free_temp(r)?;
            }
        }
        Ok(())
    }

    /// A textual rendering of both banks.
    pub fn dump(&self) -> String {
        let mut s = String::new();
        for p in self.core_regs.iter().chain(self.fp_regs.iter()) {
            let opt = |x: Option<LirIdx>| x.map(|x| x.to_u32().to_string()).unwrap_or("-".into());
            writeln!(
                s,
                "{}: T:{}, U:{}, P:{}, p:{}, LV:{}, D:{}, SR:{}, ST:{}, EN:{}",
                p.reg,
                u8::from(p.is_temp),
                u8::from(p.in_use),
                u8::from(p.pair),
                p.partner.map(|x| x.to_string()).unwrap_or("-".into()),
                u8::from(p.live),
                u8::from(p.dirty),
                p.s_reg.map(|x| x.to_string()).unwrap_or("-".into()),
                opt(p.def_start),
                opt(p.def_end),
            )
            .ok();
        }
        s
    }
}
