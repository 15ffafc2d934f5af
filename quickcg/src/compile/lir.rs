//! The low-level IR: one node per target instruction, pseudo-instruction or label.
//!
//! Nodes live in an arena ([LirList]) and are threaded into program order by `prev`/`next`
//! indices. Nodes are never removed: an instruction that is no longer wanted is marked `is_nop`,
//! which keeps every [LirIdx] (e.g. branch targets) valid across assembler retries.

use super::{
    switch::{FillArrayIdx, SwitchTableIdx},
    CompilationError,
};
use std::ops::{Index, IndexMut};
use typed_index_collections::TiVec;

/// An index into a [LirList].
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LirIdx(u32);
index_32bit!(LirIdx);

// Instruction feature flags.
pub const IS_BRANCH: u64 = 1 << 0;
pub const NEEDS_FIXUP: u64 = 1 << 1;
pub const IS_LOAD: u64 = 1 << 2;
pub const IS_STORE: u64 = 1 << 3;
pub const NO_OPERAND: u64 = 1 << 4;
pub const IS_UNARY_OP: u64 = 1 << 5;
pub const IS_BINARY_OP: u64 = 1 << 6;
pub const IS_TERTIARY_OP: u64 = 1 << 7;
pub const IS_QUAD_OP: u64 = 1 << 8;
pub const REG_DEF0: u64 = 1 << 9;
pub const REG_DEF1: u64 = 1 << 10;
pub const REG_USE0: u64 = 1 << 11;
pub const REG_USE1: u64 = 1 << 12;
pub const REG_USE2: u64 = 1 << 13;
pub const REG_USE3: u64 = 1 << 14;
pub const REG_DEF_SP: u64 = 1 << 15;
pub const REG_USE_SP: u64 = 1 << 16;
pub const REG_DEF_LR: u64 = 1 << 17;
pub const REG_USE_LR: u64 = 1 << 18;
pub const SETS_CCODES: u64 = 1 << 19;
pub const USES_CCODES: u64 = 1 << 20;

pub const REG_DEF01: u64 = REG_DEF0 | REG_DEF1;
pub const REG_USE01: u64 = REG_USE0 | REG_USE1;
pub const REG_USE02: u64 = REG_USE0 | REG_USE2;
pub const REG_USE12: u64 = REG_USE1 | REG_USE2;
pub const REG_USE23: u64 = REG_USE2 | REG_USE3;
pub const REG_DEF0_USE0: u64 = REG_DEF0 | REG_USE0;
pub const REG_DEF0_USE1: u64 = REG_DEF0 | REG_USE1;
pub const REG_DEF0_USE2: u64 = REG_DEF0 | REG_USE2;
pub const REG_DEF0_USE12: u64 = REG_DEF0 | REG_USE12;

// Resource mask bits above the register bits.
pub const ENCODE_CCODE: u64 = 1 << 56;
pub const ENCODE_FP_STATUS: u64 = 1 << 57;
pub const ENCODE_DALVIK_REG: u64 = 1 << 58;
pub const ENCODE_LITERAL: u64 = 1 << 59;
pub const ENCODE_HEAP_REF: u64 = 1 << 60;
pub const ENCODE_MUST_NOT_ALIAS: u64 = 1 << 61;
pub const ENCODE_MEM: u64 = ENCODE_DALVIK_REG | ENCODE_LITERAL | ENCODE_HEAP_REF;
pub const ENCODE_ALL: u64 = !0;

/// Opcodes that have no machine encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pseudo {
    /// A branch target.
    TargetLabel,
    /// The target of one switch case. `operands[0]` holds the case key.
    CaseLabel,
    /// The native return address of a call: recorded in the pc-to-dex mapping table.
    SafepointPC,
    /// A native pc recorded in the dex-to-pc mapping table.
    ExportedPC,
    /// Pads the following instruction to a 4-byte boundary. `operands[0]` is set to 1 by offset
    /// assignment if padding was inserted.
    Align4,
    /// The first LIR generated for a bytecode instruction.
    DalvikByteCodeBoundary,
    /// A scheduling barrier.
    Barrier,
    MethodEntry,
    MethodExit,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LirOp<O> {
    Pseudo(Pseudo),
    Target(O),
}

impl<O> From<Pseudo> for LirOp<O> {
    fn from(p: Pseudo) -> Self {
        LirOp::Pseudo(p)
    }
}

/// A deferred data table that a LIR refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataRef {
    Switch(SwitchTableIdx),
    FillArray(FillArrayIdx),
}

#[derive(Clone, Debug)]
pub struct Lir<O> {
    pub op: LirOp<O>,
    pub operands: [i32; 4],
    /// The label a branch (or a pc-relative computation) refers to.
    pub target: Option<LirIdx>,
    /// For pc-relative computations, the label the displacement is measured from.
    pub anchor: Option<LirIdx>,
    /// For pc-relative computations against a data table, the table.
    pub table: Option<DataRef>,
    /// The bytecode offset this LIR was generated for.
    pub dalvik_offset: u32,
    /// The byte offset from the start of the method, valid after offsets have been assigned.
    pub offset: u32,
    pub is_nop: bool,
    /// Does this instruction need patching once offsets are known?
    pub pc_rel_fixup: bool,
    /// The encoded size in bytes.
    pub size: u32,
    pub use_mask: u64,
    pub def_mask: u64,
    /// For accesses to a Dalvik register's home slot: the register's slot number, with the top
    /// bit set for 64-bit accesses.
    pub alias_info: u32,
    prev: Option<LirIdx>,
    next: Option<LirIdx>,
}

impl<O> Lir<O> {
    pub fn new(dalvik_offset: u32, op: LirOp<O>, operands: [i32; 4]) -> Self {
        Self {
            op,
            operands,
            target: None,
            anchor: None,
            table: None,
            dalvik_offset,
            offset: 0,
            is_nop: false,
            pc_rel_fixup: false,
            size: 0,
            use_mask: 0,
            def_mask: 0,
            alias_info: 0,
            prev: None,
            next: None,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self.op, LirOp::Pseudo(_))
    }

    pub fn next(&self) -> Option<LirIdx> {
        self.next
    }

    pub fn prev(&self) -> Option<LirIdx> {
        self.prev
    }
}

/// The arena of LIR nodes of one method.
///
/// Nodes that are never linked in (e.g. literal pool entries) share the arena: they use `next`
/// to form their own chains.
#[derive(Debug)]
pub struct LirList<O> {
    lirs: TiVec<LirIdx, Lir<O>>,
    first: Option<LirIdx>,
    last: Option<LirIdx>,
}

impl<O> LirList<O> {
    pub fn new() -> Self {
        Self {
            lirs: TiVec::new(),
            first: None,
            last: None,
        }
    }

    /// Add `lir` to the arena without linking it into the instruction list.
    pub fn raw(&mut self, lir: Lir<O>) -> Result<LirIdx, CompilationError> {
        let idx = LirIdx::new(self.lirs.len())?;
        self.lirs.push(lir);
        Ok(idx)
    }

    /// Link the unlinked node `idx` at the end of the instruction list.
    pub fn append(&mut self, idx: LirIdx) {
        match self.last {
            Some(last) => {
                self.lirs[last].next = Some(idx);
                self.lirs[idx].prev = Some(last);
                self.lirs[idx].next = None;
                self.last = Some(idx);
            }
            None => {
                self.lirs[idx].prev = None;
                self.lirs[idx].next = None;
                self.first = Some(idx);
                self.last = Some(idx);
            }
        }
    }

    /// Link the unlinked node `new` immediately before `at`.
    pub fn insert_before(&mut self, at: LirIdx, new: LirIdx) {
        let prev = self.lirs[at].prev;
        self.lirs[new].op_link(prev, Some(at));
        match prev {
            Some(p) => self.lirs[p].next = Some(new),
            None => self.first = Some(new),
        }
        self.lirs[at].prev = Some(new);
    }

    /// Link the unlinked node `new` immediately after `at`.
    pub fn insert_after(&mut self, at: LirIdx, new: LirIdx) {
        let next = self.lirs[at].next;
        self.lirs[new].op_link(Some(at), next);
        self.lirs[at].next = Some(new);
        match next {
            Some(n) => self.lirs[n].prev = Some(new),
            None => self.last = Some(new),
        }
    }

    /// Turn `idx` into a nop. Nops take no space and are not encoded.
    pub fn nop(&mut self, idx: LirIdx) {
        self.lirs[idx].is_nop = true;
    }

    pub fn first(&self) -> Option<LirIdx> {
        self.first
    }

    pub fn last(&self) -> Option<LirIdx> {
        self.last
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Iterate over the linked nodes in program order.
    pub fn iter(&self) -> impl Iterator<Item = LirIdx> + '_ {
        let mut cur = self.first;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.lirs[idx].next;
            Some(idx)
        })
    }

    /// Iterate over a chain of unlinked nodes starting at `head` (e.g. a literal pool).
    pub fn iter_chain(&self, head: Option<LirIdx>) -> impl Iterator<Item = LirIdx> + '_ {
        let mut cur = head;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.lirs[idx].next;
            Some(idx)
        })
    }

    /// Prepend the unlinked node `idx` to the chain starting at `*head`.
    pub fn push_chain(&mut self, head: &mut Option<LirIdx>, idx: LirIdx) {
        self.lirs[idx].next = *head;
        *head = Some(idx);
    }
}

impl<O> Default for LirList<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Lir<O> {
    fn op_link(&mut self, prev: Option<LirIdx>, next: Option<LirIdx>) {
        self.prev = prev;
        self.next = next;
    }
}

impl<O> Index<LirIdx> for LirList<O> {
    type Output = Lir<O>;

    fn index(&self, idx: LirIdx) -> &Self::Output {
        &self.lirs[idx]
    }
}

impl<O> IndexMut<LirIdx> for LirList<O> {
    fn index_mut(&mut self, idx: LirIdx) -> &mut Self::Output {
        &mut self.lirs[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(l: &mut LirList<u8>) -> LirIdx {
        l.raw(Lir::new(0, LirOp::Pseudo(Pseudo::TargetLabel), [0; 4]))
            .unwrap()
    }

    fn insn(l: &mut LirList<u8>, op: u8) -> LirIdx {
        l.raw(Lir::new(0, LirOp::Target(op), [0; 4])).unwrap()
    }

    fn ops(l: &LirList<u8>) -> Vec<LirOp<u8>> {
        l.iter().map(|x| l[x].op).collect()
    }

    #[test]
    fn append_and_splice() {
        let mut l = LirList::new();
        assert!(l.is_empty());
        let a = insn(&mut l, 1);
        let b = insn(&mut l, 2);
        l.append(a);
        l.append(b);
        let c = insn(&mut l, 3);
        l.insert_before(b, c);
        let d = label(&mut l);
        l.insert_after(b, d);
        let e = insn(&mut l, 4);
        l.insert_after(a, e);
        assert_eq!(
            ops(&l),
            [
                LirOp::Target(1),
                LirOp::Target(4),
                LirOp::Target(3),
                LirOp::Target(2),
                LirOp::Pseudo(Pseudo::TargetLabel)
            ]
        );
        assert_eq!(l.first(), Some(a));
        assert_eq!(l.last(), Some(d));
        assert_eq!(l[d].prev(), Some(b));
        assert_eq!(l[c].next(), Some(b));
    }

    #[test]
    fn insert_before_first() {
        let mut l = LirList::new();
        let a = insn(&mut l, 1);
        l.append(a);
        let b = insn(&mut l, 2);
        l.insert_before(a, b);
        assert_eq!(l.first(), Some(b));
        assert_eq!(ops(&l), [LirOp::Target(2), LirOp::Target(1)]);
    }

    #[test]
    fn nop_keeps_links() {
        let mut l = LirList::new();
        let a = insn(&mut l, 1);
        let b = insn(&mut l, 2);
        l.append(a);
        l.append(b);
        l.nop(a);
        assert!(l[a].is_nop);
        assert_eq!(l.iter().count(), 2);
    }

    #[test]
    fn chains() {
        let mut l = LirList::new();
        let mut head = None;
        let a = insn(&mut l, 1);
        let b = insn(&mut l, 2);
        l.push_chain(&mut head, a);
        l.push_chain(&mut head, b);
        assert_eq!(l.iter_chain(head).collect::<Vec<_>>(), [b, a]);
        assert!(l.is_empty());
    }
}
