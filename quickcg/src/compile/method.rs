//! The front-end's description of a method: its Dalvik registers and the SSA names flowing
//! through them.

use super::{
    regalloc::{LocKind, ValueLocation},
    CompilationError,
};
use std::fmt;
use typed_index_collections::TiVec;

/// An SSA name: the stable identity of one value flowing through a method.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SReg(u32);
index_32bit!(SReg);

impl SReg {
    /// The SSA name of the high word of the wide value whose low word is `self`.
    pub fn hi(self) -> SReg {
        SReg(self.0 + 1)
    }
}

impl fmt::Display for SReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The Dalvik-level register an SSA name belongs to.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum VReg {
    /// An ordinary Dalvik register: locals first, then ins.
    Dalvik(u16),
    /// The current method pointer.
    Method,
    /// The `n`th compiler temporary.
    Temp(u16),
}

impl VReg {
    /// The signed numbering used in frame metadata: Dalvik registers are non-negative, the method
    /// pointer is -2 and compiler temps count down from -3.
    pub fn as_i32(self) -> i32 {
        match self {
            VReg::Dalvik(n) => i32::from(n),
            VReg::Method => -2,
            VReg::Temp(i) => -3 - i32::from(i),
        }
    }

    /// The low 16 bits of [Self::as_i32], as recorded in vmap tables.
    pub fn as_vmap(self) -> u16 {
        (self.as_i32() & 0xffff) as u16
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VReg::Dalvik(n) => write!(f, "v{n}"),
            VReg::Method => write!(f, "method"),
            VReg::Temp(i) => write!(f, "t{i}"),
        }
    }
}

/// One entry of a method's SSA table.
#[derive(Clone, Debug)]
pub struct SsaReg {
    pub vreg: VReg,
    /// The location template: its qualifiers (`wide`, `fp`, `is_ref`, `high_word`) describe the
    /// value and, after promotion, its home.
    pub loc: ValueLocation,
    /// A static use count, weighted by loop depth if the front-end knows it.
    pub use_count: u32,
    /// If the value is a compile-time constant, its (low word) value.
    pub const_value: Option<i32>,
}

impl SsaReg {
    pub fn new(vreg: VReg) -> Self {
        let kind = match vreg {
            VReg::Temp(_) => LocKind::CompilerTemp,
            _ => LocKind::Frame,
        };
        Self {
            vreg,
            loc: ValueLocation::in_memory(kind),
            use_count: 0,
            const_value: None,
        }
    }

    pub fn uses(mut self, n: u32) -> Self {
        self.use_count = n;
        self
    }

    pub fn constant(mut self, v: i32) -> Self {
        self.const_value = Some(v);
        self
    }

    pub fn fp(mut self) -> Self {
        self.loc.fp = true;
        self
    }

    /// The low word of a wide value.
    pub fn wide(mut self) -> Self {
        self.loc.wide = true;
        self
    }

    /// The high word of a wide value.
    pub fn high_word(mut self) -> Self {
        self.loc.wide = true;
        self.loc.high_word = true;
        self
    }

    pub fn reference(mut self) -> Self {
        self.loc.is_ref = true;
        self
    }
}

#[derive(Debug)]
pub struct MethodIr {
    /// Locals plus ins.
    num_dalvik_regs: usize,
    num_ins: usize,
    num_outs: usize,
    num_compiler_temps: usize,
    method_sreg: SReg,
    ssa: TiVec<SReg, SsaReg>,
}

impl MethodIr {
    /// Describe a method with `num_dalvik_regs` Dalvik registers, the last `num_ins` of which are
    /// its incoming arguments.
    ///
    /// SSA names `0..num_dalvik_regs` must be the incoming values of the Dalvik registers with the
    /// same number, and the entry after the low word of a wide value must be its high word. If no
    /// entry names the method pointer, one is appended.
    pub fn new(
        num_dalvik_regs: usize,
        num_ins: usize,
        num_outs: usize,
        ssa: Vec<SsaReg>,
    ) -> Result<Self, CompilationError> {
        if num_ins > num_dalvik_regs {
            return Err(CompilationError::General(format!(
                "{num_ins} ins but only {num_dalvik_regs} Dalvik registers"
            )));
        }
        if ssa.len() < num_dalvik_regs {
            return Err(CompilationError::General(format!(
                "{} SSA names cannot cover {num_dalvik_regs} Dalvik registers",
                ssa.len()
            )));
        }
        let mut ssa = TiVec::<SReg, SsaReg>::from(ssa);
        for (i, x) in ssa.iter().enumerate().take(num_dalvik_regs) {
            if x.vreg != VReg::Dalvik(u16::try_from(i).map_err(|_| {
                CompilationError::LimitExceeded(format!("too many Dalvik registers: {i}"))
            })?) {
                return Err(CompilationError::General(format!(
                    "SSA name {i} must be the incoming value of v{i}, not {}",
                    x.vreg
                )));
            }
        }
        let num_compiler_temps = ssa
            .iter()
            .filter_map(|x| match x.vreg {
                VReg::Temp(i) => Some(usize::from(i) + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        for x in ssa.iter() {
            if let VReg::Dalvik(n) = x.vreg {
                if usize::from(n) >= num_dalvik_regs {
                    return Err(CompilationError::General(format!(
                        "{} is not one of the method's {num_dalvik_regs} Dalvik registers",
                        x.vreg
                    )));
                }
            }
        }
        let method_sreg = match ssa.iter().position(|x| x.vreg == VReg::Method) {
            Some(i) => SReg::new(i)?,
            None => {
                let s = SReg::new(ssa.len())?;
                ssa.push(SsaReg::new(VReg::Method).reference());
                s
            }
        };
        for (s, x) in ssa.iter_enumerated() {
            if x.loc.wide && !x.loc.high_word {
                match ssa.get(s.hi()) {
                    Some(hi) if hi.loc.wide && hi.loc.high_word => (),
                    _ => {
                        return Err(CompilationError::General(format!(
                            "the entry after wide value {s} is not its high word"
                        )))
                    }
                }
            }
        }
        for (i, x) in ssa.iter_mut().enumerate() {
            x.loc.s_reg_low = Some(SReg::new(i)?);
            x.loc.is_const = x.const_value.is_some();
        }
        Ok(Self {
            num_dalvik_regs,
            num_ins,
            num_outs,
            num_compiler_temps,
            method_sreg,
            ssa,
        })
    }

    pub fn num_dalvik_regs(&self) -> usize {
        self.num_dalvik_regs
    }

    pub fn num_ins(&self) -> usize {
        self.num_ins
    }

    pub fn num_outs(&self) -> usize {
        self.num_outs
    }

    /// The number of locals, i.e. Dalvik registers that are not ins.
    pub fn num_regs(&self) -> usize {
        self.num_dalvik_regs - self.num_ins
    }

    pub fn num_compiler_temps(&self) -> usize {
        self.num_compiler_temps
    }

    pub fn num_ssa_regs(&self) -> usize {
        self.ssa.len()
    }

    /// The number of promotion map slots: one per Dalvik register, the method pointer, and one
    /// per compiler temp.
    pub fn num_pmap(&self) -> usize {
        self.num_dalvik_regs + 1 + self.num_compiler_temps
    }

    /// The Dalvik-level register that promotion map slot `idx` stands for.
    pub fn pmap_to_vreg(&self, idx: usize) -> VReg {
        if idx < self.num_dalvik_regs {
            // Checked against `u16` in `new`.
            VReg::Dalvik(idx as u16)
        } else if idx == self.num_dalvik_regs {
            VReg::Method
        } else {
            VReg::Temp((idx - self.num_dalvik_regs - 1) as u16)
        }
    }

    pub fn sregs(&self) -> impl Iterator<Item = SReg> + '_ {
        self.ssa.keys()
    }

    pub fn method_sreg(&self) -> SReg {
        self.method_sreg
    }

    pub fn method_loc(&self) -> ValueLocation {
        self.ssa[self.method_sreg].loc
    }

    /// The current location template of `s`.
    pub fn loc(&self, s: SReg) -> ValueLocation {
        self.ssa[s].loc
    }

    pub(crate) fn locs_mut(&mut self) -> impl Iterator<Item = &mut ValueLocation> {
        self.ssa.iter_mut().map(|x| &mut x.loc)
    }

    pub fn use_count(&self, s: SReg) -> u32 {
        self.ssa[s].use_count
    }

    pub fn sreg_to_vreg(&self, s: SReg) -> VReg {
        self.ssa[s].vreg
    }

    /// The promotion map slot of `s`: every SSA name of a Dalvik register shares that register's
    /// slot.
    pub fn sreg_to_pmap(&self, s: SReg) -> usize {
        match self.ssa[s].vreg {
            VReg::Dalvik(n) => usize::from(n),
            VReg::Method => self.num_dalvik_regs,
            VReg::Temp(i) => self.num_dalvik_regs + 1 + usize::from(i),
        }
    }

    /// The constant value of `s`, if it has one.
    pub fn constant_value(&self, s: SReg) -> Option<i32> {
        self.ssa[s].const_value
    }

    /// The constant value of the wide value whose low word is `s`.
    pub fn constant_value_wide(&self, s: SReg) -> Option<i64> {
        let lo = self.ssa[s].const_value?;
        let hi = self.ssa.get(s.hi())?.const_value?;
        Some(i64::from(lo as u32) | (i64::from(hi) << 32))
    }

    /// Is `s` live out of the instruction that defines it? Without liveness information, always.
    pub fn live_out(&self, _s: SReg) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dalvik(n: u16) -> SsaReg {
        SsaReg::new(VReg::Dalvik(n))
    }

    #[test]
    fn vreg_numbering() {
        assert_eq!(VReg::Dalvik(3).as_i32(), 3);
        assert_eq!(VReg::Method.as_i32(), -2);
        assert_eq!(VReg::Temp(0).as_i32(), -3);
        assert_eq!(VReg::Temp(2).as_i32(), -5);
        assert_eq!(VReg::Method.as_vmap(), 0xfffe);
        assert_eq!(VReg::Dalvik(7).as_vmap(), 7);
    }

    #[test]
    fn pmap_and_method() {
        let ir = MethodIr::new(
            3,
            1,
            0,
            vec![
                dalvik(0),
                dalvik(1),
                dalvik(2),
                SsaReg::new(VReg::Temp(0)),
                dalvik(0).uses(2),
            ],
        )
        .unwrap();
        assert_eq!(ir.num_regs(), 2);
        assert_eq!(ir.num_compiler_temps(), 1);
        assert_eq!(ir.num_ssa_regs(), 6);
        assert_eq!(ir.method_sreg(), SReg::from(5));
        assert!(ir.method_loc().is_ref);
        assert_eq!(ir.num_pmap(), 5);
        assert_eq!(ir.sreg_to_pmap(SReg::from(4)), 0);
        assert_eq!(ir.sreg_to_pmap(SReg::from(5)), 3);
        assert_eq!(ir.sreg_to_pmap(SReg::from(3)), 4);
        assert_eq!(ir.loc(SReg::from(3)).location, LocKind::CompilerTemp);
        assert_eq!(ir.loc(SReg::from(4)).s_reg_low, Some(SReg::from(4)));
    }

    #[test]
    fn constants() {
        let ir = MethodIr::new(
            2,
            0,
            0,
            vec![
                dalvik(0).wide().constant(-1),
                dalvik(1).high_word().constant(0x12),
            ],
        )
        .unwrap();
        assert!(ir.loc(SReg::from(0)).is_const);
        assert_eq!(ir.constant_value(SReg::from(0)), Some(-1));
        assert_eq!(
            ir.constant_value_wide(SReg::from(0)),
            Some(0x0000_0012_ffff_ffff)
        );
    }

    #[test]
    fn bad_methods() {
        assert!(matches!(
            MethodIr::new(2, 0, 0, vec![dalvik(1), dalvik(0)]),
            Err(CompilationError::General(_))
        ));
        assert!(matches!(
            MethodIr::new(2, 0, 0, vec![dalvik(0)]),
            Err(CompilationError::General(_))
        ));
        assert!(matches!(
            MethodIr::new(2, 0, 0, vec![dalvik(0).wide(), dalvik(1)]),
            Err(CompilationError::General(_))
        ));
        assert!(matches!(
            MethodIr::new(1, 0, 0, vec![dalvik(0), dalvik(3)]),
            Err(CompilationError::General(_))
        ));
    }
}
