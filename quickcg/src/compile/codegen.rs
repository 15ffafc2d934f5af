//! The code generation state of one method, and the LIR building blocks that every target shares.
//!
//! A [Codegen] is created per method and is driven by the front-end through
//! [Codegen::materialize]: it owns the register pool, the LIR list, the literal pools and the
//! deferred data tables until the method has been assembled. Nothing in it is shared with any
//! other method being compiled.

use super::{
    lir::{
        Lir, LirIdx, LirList, LirOp, Pseudo, ENCODE_ALL, ENCODE_CCODE, ENCODE_DALVIK_REG,
        ENCODE_FP_STATUS, ENCODE_HEAP_REF, ENCODE_LITERAL, ENCODE_MEM, ENCODE_MUST_NOT_ALIAS,
        IS_BINARY_OP, IS_BRANCH, IS_LOAD, IS_QUAD_OP, IS_STORE, IS_TERTIARY_OP, IS_UNARY_OP,
        NEEDS_FIXUP, NO_OPERAND, REG_DEF0, REG_DEF1, REG_USE0, SETS_CCODES, USES_CCODES,
    },
    method::{MethodIr, SReg, VReg},
    push_uleb128,
    regalloc::{LocKind, PhysReg, PromotionMap, RegisterPool},
    switch::{FillArrayData, FillArrayIdx, SwitchTable, SwitchTableIdx},
    CompilationError, CompiledMethod, CompilerOptions, LiteralPatch, TargetCodegen,
};
use crate::log::{self, LirPhase};
use std::{collections::HashMap, fmt::Write};
use typed_index_collections::TiVec;

/// The vmap entry that stands for "no Dalvik register" (e.g. the return address slot).
pub const INVALID_VREG: u16 = 0xffff;

/// The stack alignment of every frame.
const STACK_ALIGNMENT: u32 = 16;

/// Which literal pool a data word belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LiteralPool {
    /// Plain 32-bit constants.
    Data,
    /// Code addresses of other methods, patched by the loader.
    Code,
    /// Method objects, patched by the loader.
    Method,
}

pub struct Codegen<T: TargetCodegen> {
    pub target: T,
    pub(crate) opts: CompilerOptions,
    pub ir: MethodIr,
    pub pool: RegisterPool,
    pub lirs: LirList<T::Opcode>,
    /// Where each Dalvik register, the method pointer and each compiler temp has been promoted
    /// to, indexed by [MethodIr::sreg_to_pmap].
    pub(crate) promotion_map: Vec<PromotionMap>,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub num_core_spills: u32,
    pub num_fp_spills: u32,
    /// `(reg << 16) | vreg` for each promoted core register, in promotion order.
    pub(crate) core_vmap_table: Vec<u32>,
    /// The vreg held by each callee-save FP register, in register order.
    pub(crate) fp_vmap_table: Vec<u16>,
    pub frame_size: u32,
    /// The bytecode offset that newly created LIRs are attributed to.
    pub current_dalvik_offset: u32,
    /// The first boundary LIR of each bytecode offset.
    boundary_map: HashMap<u32, LirIdx>,
    pub(crate) literal_list: Option<LirIdx>,
    pub(crate) code_literal_list: Option<LirIdx>,
    pub(crate) method_literal_list: Option<LirIdx>,
    pub(crate) switch_tables: TiVec<SwitchTableIdx, SwitchTable>,
    pub(crate) fill_array_data: TiVec<FillArrayIdx, FillArrayData>,
    pub(crate) code_buffer: Vec<u8>,
    /// The offset of the first literal, valid after offsets have been assigned.
    pub(crate) data_offset: u32,
    pub(crate) total_size: u32,
    pub(crate) mapping_table: Vec<u8>,
    pub(crate) patches: Vec<LiteralPatch>,
    pub(crate) assembler_retries: u32,
    pub(crate) long_branches: u32,
    pub(crate) regs_promoted: u32,
}

impl<T: TargetCodegen> Codegen<T> {
    pub fn new(target: T, opts: CompilerOptions, ir: MethodIr) -> Self {
        let pool = RegisterPool::new(T::CORE_REGS, T::FP_REGS, T::RESERVED_REGS, T::TEMP_REGS);
        let promotion_map = vec![PromotionMap::default(); ir.num_pmap()];
        Self {
            target,
            opts,
            ir,
            pool,
            lirs: LirList::new(),
            promotion_map,
            core_spill_mask: 0,
            fp_spill_mask: 0,
            num_core_spills: 0,
            num_fp_spills: 0,
            core_vmap_table: Vec::new(),
            fp_vmap_table: Vec::new(),
            frame_size: 0,
            current_dalvik_offset: 0,
            boundary_map: HashMap::new(),
            literal_list: None,
            code_literal_list: None,
            method_literal_list: None,
            switch_tables: TiVec::new(),
            fill_array_data: TiVec::new(),
            code_buffer: Vec::new(),
            data_offset: 0,
            total_size: 0,
            mapping_table: Vec::new(),
            patches: Vec::new(),
            assembler_retries: 0,
            long_branches: 0,
            regs_promoted: 0,
        }
    }

    pub fn opts(&self) -> &CompilerOptions {
        &self.opts
    }

    /// Log the output of `f` if the `phase` dump was requested.
    pub(crate) fn log_phase<F>(&self, phase: LirPhase, f: F)
    where
        F: FnOnce(&Self) -> String,
    {
        if self.opts.verbose && log::should_log_lir(phase) {
            log::log_lir(&f(self));
        }
    }

    /// Create, but do not link in, a LIR.
    pub fn raw_lir(
        &mut self,
        dalvik_offset: u32,
        op: LirOp<T::Opcode>,
        operands: [i32; 4],
        target: Option<LirIdx>,
    ) -> Result<LirIdx, CompilationError> {
        let idx = self.lirs.raw(Lir::new(dalvik_offset, op, operands))?;
        self.lirs[idx].target = target;
        self.setup_resource_masks(idx);
        if let LirOp::Pseudo(Pseudo::TargetLabel | Pseudo::SafepointPC | Pseudo::ExportedPC) = op {
            // Labels are scheduling barriers.
            let lir = &mut self.lirs[idx];
            lir.use_mask = ENCODE_ALL;
            lir.def_mask = ENCODE_ALL;
        }
        Ok(idx)
    }

    fn new_lir(
        &mut self,
        op: LirOp<T::Opcode>,
        operands: [i32; 4],
        num_operands: usize,
    ) -> Result<LirIdx, CompilationError> {
        if let LirOp::Target(x) = op {
            let flags = T::insn_flags(x);
            let expected = [NO_OPERAND, IS_UNARY_OP, IS_BINARY_OP, IS_TERTIARY_OP, IS_QUAD_OP];
            debug_assert!(
                flags & expected[num_operands] != 0,
                "{x:?} does not take {num_operands} operands"
            );
        }
        let idx = self.raw_lir(self.current_dalvik_offset, op, operands, None)?;
        self.lirs.append(idx);
        Ok(idx)
    }

    pub fn new_lir0(
        &mut self,
        op: impl Into<LirOp<T::Opcode>>,
    ) -> Result<LirIdx, CompilationError> {
        self.new_lir(op.into(), [0; 4], 0)
    }

    pub fn new_lir1(
        &mut self,
        op: impl Into<LirOp<T::Opcode>>,
        a: i32,
    ) -> Result<LirIdx, CompilationError> {
        self.new_lir(op.into(), [a, 0, 0, 0], 1)
    }

    pub fn new_lir2(
        &mut self,
        op: impl Into<LirOp<T::Opcode>>,
        a: i32,
        b: i32,
    ) -> Result<LirIdx, CompilationError> {
        self.new_lir(op.into(), [a, b, 0, 0], 2)
    }

    pub fn new_lir3(
        &mut self,
        op: impl Into<LirOp<T::Opcode>>,
        a: i32,
        b: i32,
        c: i32,
    ) -> Result<LirIdx, CompilationError> {
        self.new_lir(op.into(), [a, b, c, 0], 3)
    }

    pub fn new_lir4(
        &mut self,
        op: impl Into<LirOp<T::Opcode>>,
        a: i32,
        b: i32,
        c: i32,
        d: i32,
    ) -> Result<LirIdx, CompilationError> {
        self.new_lir(op.into(), [a, b, c, d], 4)
    }

    /// Derive the size, fixup flag and resource masks of `idx` from the target's encoding table
    /// and `idx`'s operands.
    pub(crate) fn setup_resource_masks(&mut self, idx: LirIdx) {
        let lir = &mut self.lirs[idx];
        let op = match lir.op {
            LirOp::Target(x) if x != T::DATA_OPCODE => x,
            _ => {
                lir.use_mask = 0;
                lir.def_mask = 0;
                return;
            }
        };
        let flags = T::insn_flags(op);
        if flags & NEEDS_FIXUP != 0 {
            lir.pc_rel_fixup = true;
        }
        lir.size = T::insn_size(op);
        if flags & (IS_LOAD | IS_STORE) != 0 {
            set_mem_ref_type(lir, flags & IS_LOAD != 0, ENCODE_HEAP_REF);
        }
        // A branch may leave the method altogether.
        if flags & IS_BRANCH != 0 {
            lir.def_mask = ENCODE_ALL;
            lir.use_mask = ENCODE_ALL;
            return;
        }
        if flags & REG_DEF0 != 0 {
            lir.def_mask |= T::reg_mask(PhysReg::from_operand(lir.operands[0]));
        }
        if flags & REG_DEF1 != 0 {
            lir.def_mask |= T::reg_mask(PhysReg::from_operand(lir.operands[1]));
        }
        if flags & SETS_CCODES != 0 {
            lir.def_mask |= ENCODE_CCODE;
        }
        for i in 0..4 {
            if flags & (REG_USE0 << i) != 0 {
                lir.use_mask |= T::reg_mask(PhysReg::from_operand(lir.operands[i]));
            }
        }
        if flags & USES_CCODES != 0 {
            lir.use_mask |= ENCODE_CCODE;
        }
        T::setup_target_resource_masks(lir);
    }

    /// Record that the load or store `idx` accesses the home slot of Dalvik register `reg_id`.
    pub fn annotate_dalvik_reg_access(
        &mut self,
        idx: LirIdx,
        reg_id: i32,
        is_load: bool,
        is64bit: bool,
    ) {
        let lir = &mut self.lirs[idx];
        set_mem_ref_type(lir, is_load, ENCODE_DALVIK_REG);
        lir.alias_info = (reg_id as u32 & 0xffff) | if is64bit { 0x8000_0000 } else { 0 };
    }

    /// Start the code of the bytecode instruction at `offset`.
    pub fn mark_boundary(&mut self, offset: u32) -> Result<LirIdx, CompilationError> {
        self.current_dalvik_offset = offset;
        let idx = self.new_lir1(Pseudo::DalvikByteCodeBoundary, 0)?;
        self.boundary_map.entry(offset).or_insert(idx);
        Ok(idx)
    }

    pub(crate) fn boundary(&self, offset: u32) -> Option<LirIdx> {
        self.boundary_map.get(&offset).copied()
    }

    /// Record the instruction after the call `inst` as a safepoint.
    pub fn mark_safepoint_pc(&mut self, inst: LirIdx) -> Result<LirIdx, CompilationError> {
        self.lirs[inst].def_mask = ENCODE_ALL;
        let idx = self.new_lir0(Pseudo::SafepointPC)?;
        debug_assert_eq!(self.lirs[idx].def_mask, ENCODE_ALL);
        Ok(idx)
    }

    /// Record the current native pc in the dex-to-pc table (e.g. for a catch entry).
    pub fn mark_exported_pc(&mut self) -> Result<LirIdx, CompilationError> {
        self.new_lir0(Pseudo::ExportedPC)
    }

    /// Stop any code motion across this point.
    pub fn gen_barrier(&mut self) -> Result<LirIdx, CompilationError> {
        let idx = self.new_lir0(Pseudo::Barrier)?;
        self.lirs[idx].def_mask = ENCODE_ALL;
        Ok(idx)
    }

    /// Emit a label for branches to refer to.
    pub fn new_label(&mut self) -> Result<LirIdx, CompilationError> {
        self.new_lir0(Pseudo::TargetLabel)
    }

    fn literal_head(&self, pool: LiteralPool) -> Option<LirIdx> {
        match pool {
            LiteralPool::Data => self.literal_list,
            LiteralPool::Code => self.code_literal_list,
            LiteralPool::Method => self.method_literal_list,
        }
    }

    /// Find a literal in `pool` whose value is in `value - delta..=value`.
    pub fn scan_literal_pool(&self, pool: LiteralPool, value: i32, delta: u32) -> Option<LirIdx> {
        self.lirs
            .iter_chain(self.literal_head(pool))
            .find(|x| (value.wrapping_sub(self.lirs[*x].operands[0]) as u32) <= delta)
    }

    /// Find adjacent literals in `pool` holding `lo` followed by `hi`. The high word is also
    /// recorded in the low literal's second operand.
    pub fn scan_literal_pool_wide(&mut self, pool: LiteralPool, lo: i32, hi: i32) -> Option<LirIdx> {
        let head = self.literal_head(pool);
        let mut lo_target = None;
        let mut found = None;
        for x in self.lirs.iter_chain(head) {
            let v = self.lirs[x].operands[0];
            if lo_target.is_some() && v == hi {
                found = lo_target;
                break;
            }
            lo_target = if v == lo { Some(x) } else { None };
        }
        let x = found?;
        self.lirs[x].operands[1] = hi;
        Some(x)
    }

    /// Prepend a 32-bit word to `pool`.
    pub fn add_word_data(&mut self, pool: LiteralPool, value: i32) -> Result<LirIdx, CompilationError> {
        let idx = self.lirs.raw(Lir::new(
            self.current_dalvik_offset,
            LirOp::Target(T::DATA_OPCODE),
            [value, 0, 0, 0],
        ))?;
        let head = match pool {
            LiteralPool::Data => &mut self.literal_list,
            LiteralPool::Code => &mut self.code_literal_list,
            LiteralPool::Method => &mut self.method_literal_list,
        };
        self.lirs.push_chain(head, idx);
        Ok(idx)
    }

    /// Prepend a 64-bit value to `pool`, returning its low word.
    pub fn add_wide_data(
        &mut self,
        pool: LiteralPool,
        lo: i32,
        hi: i32,
    ) -> Result<LirIdx, CompilationError> {
        self.add_word_data(pool, hi)?;
        self.add_word_data(pool, lo)
    }

    /// Emit a register copy `dest <- src`.
    pub fn op_reg_copy(&mut self, dest: PhysReg, src: PhysReg) -> Result<LirIdx, CompilationError> {
        let idx = T::op_reg_copy_no_insert(self, dest, src)?;
        self.lirs.append(idx);
        Ok(idx)
    }

    /// Emit a copy of the pair `src_lo:src_hi` into `dest_lo:dest_hi`, in whichever order stops
    /// an overlapping half from being overwritten before it is read.
    pub fn op_reg_copy_wide(
        &mut self,
        dest_lo: PhysReg,
        dest_hi: PhysReg,
        src_lo: PhysReg,
        src_hi: PhysReg,
    ) -> Result<(), CompilationError> {
        T::op_reg_copy_wide(self, dest_lo, dest_hi, src_lo, src_hi)
    }

    pub fn compute_frame_size(&self) -> Result<u32, CompilationError> {
        let words = u32::try_from(
            1 + self.ir.num_regs() + self.ir.num_outs() + self.ir.num_compiler_temps() + 1,
        )
        .ok()
        .and_then(|x| x.checked_add(self.num_core_spills))
        .and_then(|x| x.checked_add(self.num_fp_spills))
        .and_then(|x| x.checked_mul(4))
        .ok_or_else(|| CompilationError::LimitExceeded("frame size".into()))?;
        Ok((words + STACK_ALIGNMENT - 1) & !(STACK_ALIGNMENT - 1))
    }

    /// The offset from the stack pointer of `vreg`'s home slot.
    pub fn vreg_offset(&self, vreg: VReg) -> i32 {
        let num_spills = self.core_spill_mask.count_ones() + self.fp_spill_mask.count_ones() + 1;
        let num_regs = self.ir.num_regs() as i32;
        let frame_size = self.frame_size as i32;
        let locals_start = frame_size - (num_spills as i32 + num_regs) * 4;
        match vreg {
            VReg::Method => 0,
            VReg::Dalvik(n) if i32::from(n) < num_regs => locals_start + i32::from(n) * 4,
            VReg::Dalvik(n) => frame_size + (i32::from(n) - num_regs) * 4 + 4,
            VReg::Temp(i) => locals_start - (i32::from(i) + 1) * 4,
        }
    }

    pub fn sreg_offset(&self, s: SReg) -> i32 {
        self.vreg_offset(self.ir.sreg_to_vreg(s))
    }

    /// Promote values to callee-save registers and lay out the frame.
    pub fn simple_reg_alloc(&mut self) -> Result<(), CompilationError> {
        self.do_promotion()?;
        self.frame_size = self.compute_frame_size()?;
        self.log_phase(LirPhase::Promotion, |cg| cg.promotion_map_dump());
        self.log_phase(LirPhase::RegPool, |cg| cg.pool.dump());
        Ok(())
    }

    /// Compile the method: allocate, run `gen` to emit its LIR, then assemble.
    pub fn materialize<F>(&mut self, gen: F) -> Result<CompiledMethod, CompilationError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompilationError>,
    {
        self.simple_reg_alloc()?;
        gen(self)?;
        self.assemble_method()?;
        self.get_compiled_method()
    }

    /// Resolve switch case labels and assemble. An empty method produces no code.
    pub fn assemble_method(&mut self) -> Result<(), CompilationError> {
        if !self.lirs.is_empty() {
            self.process_switch_tables()?;
            self.assemble_lir()?;
            self.log_phase(LirPhase::Lir, |cg| cg.codegen_dump(false));
            self.log_phase(LirPhase::LirFull, |cg| cg.codegen_dump(true));
        }
        Ok(())
    }

    pub fn get_compiled_method(&self) -> Result<CompiledMethod, CompilationError> {
        let mut core_vmap = self.core_vmap_table.clone();
        core_vmap.sort_unstable();
        let mut raw_vmap = core_vmap
            .iter()
            .map(|x| (x & 0xffff) as u16)
            .collect::<Vec<_>>();
        if self.frame_size > 0 {
            // Stands in for the return address.
            raw_vmap.push(INVALID_VREG);
        } else {
            debug_assert_eq!(self.core_spill_mask, 0);
            debug_assert_eq!(self.fp_spill_mask, 0);
        }
        raw_vmap.extend(&self.fp_vmap_table);
        let mut vmap_table = Vec::new();
        push_uleb128(
            &mut vmap_table,
            u32::try_from(raw_vmap.len())
                .map_err(|_| CompilationError::LimitExceeded("vmap table".into()))?,
        );
        for x in raw_vmap {
            push_uleb128(&mut vmap_table, u32::from(x));
        }
        Ok(CompiledMethod {
            code: self.code_buffer.clone(),
            frame_size: self.frame_size,
            core_spill_mask: self.core_spill_mask,
            fp_spill_mask: self.fp_spill_mask,
            mapping_table: self.mapping_table.clone(),
            vmap_table,
            patches: self.patches.clone(),
        })
    }

    /// A textual rendering of the LIR list. If `full`, nop'd instructions and resource masks are
    /// included.
    pub fn lir_listing(&self, full: bool) -> String {
        let mut s = String::new();
        for idx in self.lirs.iter() {
            let lir = &self.lirs[idx];
            let line = match lir.op {
                LirOp::Pseudo(p) => match p {
                    Pseudo::MethodEntry => "-------- method entry".to_owned(),
                    Pseudo::MethodExit => "-------- Method_Exit".to_owned(),
                    Pseudo::Barrier => "-------- BARRIER".to_owned(),
                    Pseudo::DalvikByteCodeBoundary => {
                        format!("-------- dalvik offset: 0x{:x}", lir.dalvik_offset)
                    }
                    Pseudo::Align4 => format!("0x{:x}: .align4", lir.offset),
                    Pseudo::TargetLabel => format!("L{}:", idx.to_u32()),
                    Pseudo::SafepointPC => {
                        format!("LsafepointPC_0x{:x}_{:x}:", lir.offset, lir.dalvik_offset)
                    }
                    Pseudo::ExportedPC => {
                        format!("LexportedPC_0x{:x}_{:x}:", lir.offset, lir.dalvik_offset)
                    }
                    Pseudo::CaseLabel => format!(
                        "LC{}: Case target 0x{:x}|{}",
                        idx.to_u32(),
                        lir.operands[0],
                        lir.operands[0]
                    ),
                },
                LirOp::Target(_) => {
                    if lir.is_nop && !full {
                        continue;
                    }
                    T::dump_insn(lir, 0)
                }
            };
            writeln!(s, "{line}").ok();
            if full {
                for (mask, prefix) in [(lir.use_mask, "use"), (lir.def_mask, "def")] {
                    if mask != 0 {
                        writeln!(s, "  {prefix}: {}", dump_resource_mask(lir, mask)).ok();
                    }
                }
            }
        }
        for idx in self.lirs.iter_chain(self.literal_list) {
            let lir = &self.lirs[idx];
            writeln!(
                s,
                "{:x} ({:04x}): .word ({:#x})",
                lir.offset, lir.offset, lir.operands[0]
            )
            .ok();
        }
        s
    }

    /// Where each promotion map slot lives.
    pub fn promotion_map_dump(&self) -> String {
        let mut s = String::new();
        let num_dalvik = self.ir.num_dalvik_regs();
        for (i, v) in self.promotion_map.iter().enumerate() {
            let name = if i < num_dalvik {
                format!("{i:02}")
            } else if i == num_dalvik {
                "Method*".to_owned()
            } else {
                format!("ct{}", i - num_dalvik - 1)
            };
            let home = match (v.core_location, v.core_reg) {
                (LocKind::PhysReg, Some(r)) => format!("r{}", r.num()),
                _ => format!("SP+{}", self.vreg_offset(self.ir.pmap_to_vreg(i))),
            };
            let fp = match (v.fp_location, v.fp_reg) {
                (LocKind::PhysReg, Some(r)) => format!(" : s{}", r.num()),
                _ => String::new(),
            };
            writeln!(s, "V[{name}] -> {home}{fp}").ok();
        }
        s
    }

    fn codegen_dump(&self, full: bool) -> String {
        let mut s = String::new();
        writeln!(s, "Regs (excluding ins) : {}", self.ir.num_regs()).ok();
        writeln!(s, "Ins          : {}", self.ir.num_ins()).ok();
        writeln!(s, "Outs         : {}", self.ir.num_outs()).ok();
        writeln!(s, "CoreSpills       : {}", self.num_core_spills).ok();
        writeln!(s, "FPSpills       : {}", self.num_fp_spills).ok();
        writeln!(s, "CompilerTemps    : {}", self.ir.num_compiler_temps()).ok();
        writeln!(s, "Frame size       : {}", self.frame_size).ok();
        writeln!(s, "code size is {} bytes", self.total_size).ok();
        s.push_str(&self.promotion_map_dump());
        s.push_str(&self.lir_listing(full));
        s
    }
}

impl<T: TargetCodegen> std::fmt::Debug for Codegen<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codegen")
            .field("frame_size", &self.frame_size)
            .field("core_spill_mask", &format_args!("{:#x}", self.core_spill_mask))
            .field("fp_spill_mask", &format_args!("{:#x}", self.fp_spill_mask))
            .finish()
    }
}

/// Replace the memory bits of `lir`'s use (if `is_load`) or def mask with `mem`.
pub(crate) fn set_mem_ref_type<O>(lir: &mut Lir<O>, is_load: bool, mem: u64) {
    let mask = if is_load {
        &mut lir.use_mask
    } else {
        &mut lir.def_mask
    };
    *mask &= !(ENCODE_MEM | ENCODE_MUST_NOT_ALIAS);
    *mask |= mem;
}

fn dump_resource_mask<O>(lir: &Lir<O>, mask: u64) -> String {
    if mask == ENCODE_ALL {
        return "all".to_owned();
    }
    let mut s = String::new();
    for i in 0..56 {
        if mask & (1 << i) != 0 {
            write!(s, "{i} ").ok();
        }
    }
    if mask & ENCODE_CCODE != 0 {
        s.push_str("cc ");
    }
    if mask & ENCODE_FP_STATUS != 0 {
        s.push_str("fpcc ");
    }
    if mask & ENCODE_DALVIK_REG != 0 {
        write!(
            s,
            "dr{}{} ",
            lir.alias_info & 0xffff,
            if lir.alias_info & 0x8000_0000 != 0 {
                "(+1)"
            } else {
                ""
            }
        )
        .ok();
    }
    if mask & ENCODE_LITERAL != 0 {
        s.push_str("lit ");
    }
    if mask & ENCODE_HEAP_REF != 0 {
        s.push_str("heap ");
    }
    if mask & ENCODE_MUST_NOT_ALIAS != 0 {
        s.push_str("noalias ");
    }
    s.trim_end().to_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compile::{
        method::SsaReg,
        mips::{MipsOpcode, MipsTarget},
    };
    use fm::FMBuilder;
    use regex::Regex;

    /// A Mips code generator for a method with `num_dalvik_regs` registers and one SSA name per
    /// register, plus `extra` SSA names.
    pub(crate) fn mips_codegen(num_dalvik_regs: u16, extra: Vec<SsaReg>) -> Codegen<MipsTarget> {
        let mut ssa = (0..num_dalvik_regs)
            .map(|i| SsaReg::new(VReg::Dalvik(i)))
            .collect::<Vec<_>>();
        ssa.extend(extra);
        let ir = MethodIr::new(usize::from(num_dalvik_regs), 0, 0, ssa).unwrap();
        Codegen::new(MipsTarget::new(false), CompilerOptions::default(), ir)
    }

    /// Check that the LIR listing of `cg` matches the `fm` pattern `ptn`. `{{name}}` matches a
    /// register name and must match the same name wherever it reoccurs.
    pub(crate) fn match_lir<T: TargetCodegen>(cg: &Codegen<T>, ptn: &str) {
        let listing = cg.lir_listing(false);
        match FMBuilder::new(ptn)
            .unwrap()
            .name_matcher(
                Regex::new(r"\{\{.+?\}\}").unwrap(),
                Regex::new(r"[a-z0-9$]+").unwrap(),
            )
            .build()
            .unwrap()
            .matches(&listing)
        {
            Ok(()) => (),
            Err(e) => panic!("{e}"),
        }
    }

    #[test]
    fn frame_layout() {
        let ir = MethodIr::new(
            5,
            2,
            1,
            vec![
                SsaReg::new(VReg::Dalvik(0)),
                SsaReg::new(VReg::Dalvik(1)),
                SsaReg::new(VReg::Dalvik(2)),
                SsaReg::new(VReg::Dalvik(3)),
                SsaReg::new(VReg::Dalvik(4)),
                SsaReg::new(VReg::Temp(0)),
            ],
        )
        .unwrap();
        let mut cg = Codegen::new(MipsTarget::new(false), CompilerOptions::default(), ir);
        cg.num_core_spills = 1;
        cg.core_spill_mask = 1 << 31;
        // (1 spill + filler + 3 locals + 1 out + 1 temp + method) * 4 = 32.
        assert_eq!(cg.compute_frame_size().unwrap(), 32);
        cg.frame_size = 32;
        // locals_start = 32 - (2 + 3) * 4 = 12.
        assert_eq!(cg.vreg_offset(VReg::Method), 0);
        assert_eq!(cg.vreg_offset(VReg::Dalvik(0)), 12);
        assert_eq!(cg.vreg_offset(VReg::Dalvik(2)), 20);
        assert_eq!(cg.vreg_offset(VReg::Dalvik(3)), 36);
        assert_eq!(cg.vreg_offset(VReg::Dalvik(4)), 40);
        assert_eq!(cg.vreg_offset(VReg::Temp(0)), 8);
        assert_eq!(cg.sreg_offset(SReg::from(1)), 16);
    }

    #[test]
    fn literal_pools() {
        let mut cg = mips_codegen(1, vec![]);
        let a = cg.add_word_data(LiteralPool::Data, 100).unwrap();
        let lo = cg.add_wide_data(LiteralPool::Data, 7, 9).unwrap();
        assert_eq!(cg.scan_literal_pool(LiteralPool::Data, 100, 0), Some(a));
        assert_eq!(cg.scan_literal_pool(LiteralPool::Data, 103, 4), Some(a));
        assert_eq!(cg.scan_literal_pool(LiteralPool::Data, 99, 4), None);
        assert_eq!(cg.scan_literal_pool(LiteralPool::Code, 100, 0), None);
        assert_eq!(cg.scan_literal_pool_wide(LiteralPool::Data, 7, 9), Some(lo));
        assert_eq!(cg.lirs[lo].operands[1], 9);
        let hi = cg.lirs[lo].next();
        assert_eq!(cg.scan_literal_pool_wide(LiteralPool::Data, 9, 100), hi);
        assert_eq!(cg.scan_literal_pool_wide(LiteralPool::Data, 7, 100), None);
        assert!(cg.lirs.is_empty());
    }

    #[test]
    fn resource_masks() {
        let mut cg = mips_codegen(1, vec![]);
        let l = cg.new_label().unwrap();
        assert_eq!(cg.lirs[l].use_mask, ENCODE_ALL);
        let b = cg.gen_barrier().unwrap();
        assert_eq!(cg.lirs[b].def_mask, ENCODE_ALL);
        assert_eq!(cg.lirs[b].use_mask, 0);
        let x = cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        let lir = &cg.lirs[x];
        assert_eq!(lir.def_mask, 1 << 2);
        assert_eq!(lir.use_mask, (1 << 4) | (1 << 5));
        assert_eq!(lir.size, 4);
        let x = cg.new_lir3(MipsOpcode::Lw, 2, 8, 29).unwrap();
        assert_ne!(cg.lirs[x].use_mask & ENCODE_HEAP_REF, 0);
        cg.annotate_dalvik_reg_access(x, 2, true, false);
        assert_eq!(cg.lirs[x].use_mask & ENCODE_MEM, ENCODE_DALVIK_REG);
        assert_eq!(cg.lirs[x].alias_info, 2);
        let x = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        assert_eq!(cg.lirs[x].def_mask, ENCODE_ALL);
        assert!(cg.lirs[x].pc_rel_fixup);
        assert_eq!(cg.lirs[x].size, 8);
    }

    #[test]
    fn boundaries_and_safepoints() {
        let mut cg = mips_codegen(1, vec![]);
        let a = cg.mark_boundary(4).unwrap();
        let b = cg.mark_boundary(4).unwrap();
        assert_ne!(a, b);
        assert_eq!(cg.boundary(4), Some(a));
        let call = cg.new_lir2(MipsOpcode::Jalr, 31, 25).unwrap();
        let sp = cg.mark_safepoint_pc(call).unwrap();
        assert_eq!(cg.lirs[call].def_mask, ENCODE_ALL);
        assert_eq!(cg.lirs[sp].dalvik_offset, 4);
        match_lir(
            &cg,
            "
            -------- dalvik offset: 0x4
            -------- dalvik offset: 0x4
            00000: jalr     ra,t9;  nop
            LsafepointPC_0x0_4:
        ",
        );
    }

    #[test]
    fn empty_method() {
        let mut cg = mips_codegen(1, vec![]);
        let m = cg.materialize(|_| Ok(())).unwrap();
        assert!(m.code.is_empty());
        assert_eq!(m.frame_size, 16);
        // One entry: the return address marker.
        assert_eq!(m.vmap_table, [1, 0xff, 0xff, 0x03]);
    }
}
