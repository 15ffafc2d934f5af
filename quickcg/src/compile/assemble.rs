//! Laying out and encoding a method: offset assignment, the assembler retry loop, and the data
//! that follows the instructions.

use super::{
    codegen::Codegen,
    lir::{LirIdx, LirOp, Pseudo},
    push_uleb128,
    switch::SwitchKind,
    AssemblerStatus, CompilationError, LiteralPatch, PatchKind, TargetCodegen,
};
use byteorder::{LittleEndian, WriteBytesExt};

/// How many times the whole method may be re-encoded after branch expansions before giving up.
pub(crate) const MAX_ASSEMBLER_RETRIES: u32 = 50;

/// Append the little-endian word `v` to `buf`.
pub(crate) fn push_word(buf: &mut Vec<u8>, v: u32) -> Result<(), CompilationError> {
    buf.write_u32::<LittleEndian>(v)
        .map_err(|e| CompilationError::InternalError(e.to_string()))
}

/// Pad `buf` with zeros up to `offset`.
fn align_buffer(buf: &mut Vec<u8>, offset: u32) {
    let offset = offset as usize;
    if buf.len() < offset {
        buf.resize(offset, 0);
    }
}

fn word_align(offset: u32) -> u32 {
    (offset + 3) & !3
}

impl<T: TargetCodegen> Codegen<T> {
    /// Give every LIR its offset from the start of the method, returning the size of the
    /// instructions. Nops and pseudo-instructions take no space, except for [Pseudo::Align4]
    /// which pads to a 4-byte boundary.
    fn assign_insn_offsets(&mut self) -> u32 {
        let mut offset = 0;
        let mut cur = self.lirs.first();
        while let Some(idx) = cur {
            let lir = &mut self.lirs[idx];
            lir.offset = offset;
            match lir.op {
                LirOp::Target(_) => {
                    if !lir.is_nop {
                        offset += lir.size;
                    }
                }
                LirOp::Pseudo(Pseudo::Align4) => {
                    if offset & 2 != 0 {
                        offset += 2;
                        lir.operands[0] = 1;
                    } else {
                        lir.operands[0] = 0;
                    }
                }
                LirOp::Pseudo(_) => (),
            }
            cur = lir.next();
        }
        offset
    }

    fn assign_chain_offsets(&mut self, head: Option<LirIdx>, mut offset: u32) -> u32 {
        let mut cur = head;
        while let Some(idx) = cur {
            self.lirs[idx].offset = offset;
            offset += 4;
            cur = self.lirs[idx].next();
        }
        offset
    }

    /// Lay out the method: instructions, then (word aligned) the literal pools, the switch tables
    /// and the fill-array data.
    pub(crate) fn assign_offsets(&mut self) -> Result<(), CompilationError> {
        let offset = word_align(self.assign_insn_offsets());
        self.data_offset = offset;
        let mut offset = self.assign_chain_offsets(self.literal_list, offset);
        offset = self.assign_chain_offsets(self.code_literal_list, offset);
        offset = self.assign_chain_offsets(self.method_literal_list, offset);
        let overflow = || CompilationError::LimitExceeded("method size".into());
        for tab in self.switch_tables.iter_mut() {
            tab.offset = offset;
            offset = u32::try_from(tab.byte_size())
                .ok()
                .and_then(|x| offset.checked_add(x))
                .ok_or_else(overflow)?;
        }
        for tab in self.fill_array_data.iter_mut() {
            tab.offset = offset;
            offset = offset
                .checked_add(tab.size)
                .and_then(|x| x.checked_add(3))
                .ok_or_else(overflow)?
                & !3;
        }
        self.total_size = offset;
        Ok(())
    }

    /// Encode the method, re-laying it out each time the target has to expand an instruction
    /// whose operand did not fit, then append the data and build the mapping tables.
    pub(crate) fn assemble_lir(&mut self) -> Result<(), CompilationError> {
        self.assign_offsets()?;
        let mut retries = 0;
        while T::assemble_instructions(self, 0)? == AssemblerStatus::RetryAll {
            retries += 1;
            if retries > MAX_ASSEMBLER_RETRIES {
                return Err(CompilationError::LimitExceeded(
                    "Assembler error - too many retries".into(),
                ));
            }
            self.assign_offsets()?;
            self.code_buffer.clear();
        }
        self.assembler_retries += retries;
        self.install_literal_pools()?;
        self.install_switch_tables()?;
        self.install_fill_array_data();
        self.create_mapping_tables();
        Ok(())
    }

    fn install_literal_pools(&mut self) -> Result<(), CompilationError> {
        align_buffer(&mut self.code_buffer, self.data_offset);
        for idx in self.lirs.iter_chain(self.literal_list) {
            push_word(&mut self.code_buffer, self.lirs[idx].operands[0] as u32)?;
        }
        for (head, kind) in [
            (self.code_literal_list, PatchKind::Code),
            (self.method_literal_list, PatchKind::Method),
        ] {
            for idx in self.lirs.iter_chain(head) {
                let target_idx = self.lirs[idx].operands[0] as u32;
                let literal_offset = u32::try_from(self.code_buffer.len())
                    .map_err(|_| CompilationError::LimitExceeded("method size".into()))?;
                self.patches.push(LiteralPatch {
                    kind,
                    target_idx,
                    literal_offset,
                });
                // The loader overwrites this with the real reference.
                push_word(&mut self.code_buffer, target_idx)?;
            }
        }
        Ok(())
    }

    fn install_switch_tables(&mut self) -> Result<(), CompilationError> {
        for tab in self.switch_tables.iter() {
            align_buffer(&mut self.code_buffer, tab.offset);
            let anchor = tab.anchor.ok_or_else(|| {
                CompilationError::InternalError(format!(
                    "switch table at 0x{:x} has no anchor",
                    tab.vaddr
                ))
            })?;
            let base = T::switch_table_base(self.lirs[anchor].offset);
            for (i, label) in tab.labels.iter().enumerate() {
                let disp = self.lirs[*label].offset.wrapping_sub(base);
                if let SwitchKind::Sparse { keys } = &tab.kind {
                    push_word(&mut self.code_buffer, keys[i] as u32)?;
                }
                push_word(&mut self.code_buffer, disp)?;
            }
        }
        Ok(())
    }

    fn install_fill_array_data(&mut self) {
        for tab in self.fill_array_data.iter() {
            align_buffer(&mut self.code_buffer, tab.offset);
            for x in tab.table.iter().take(tab.size.div_ceil(2) as usize) {
                self.code_buffer.extend_from_slice(&x.to_le_bytes());
            }
        }
    }

    /// Build the pc-to-dex (from safepoints) and dex-to-pc (from exported pcs) tables.
    fn create_mapping_tables(&mut self) {
        let mut pc2dex = Vec::new();
        let mut dex2pc = Vec::new();
        for idx in self.lirs.iter() {
            let lir = &self.lirs[idx];
            if lir.is_nop {
                continue;
            }
            match lir.op {
                LirOp::Pseudo(Pseudo::SafepointPC) => pc2dex.push((lir.offset, lir.dalvik_offset)),
                LirOp::Pseudo(Pseudo::ExportedPC) => dex2pc.push((lir.offset, lir.dalvik_offset)),
                _ => (),
            }
        }
        let mut table = Vec::new();
        push_uleb128(&mut table, (pc2dex.len() + dex2pc.len()) as u32);
        push_uleb128(&mut table, pc2dex.len() as u32);
        for (native, dex) in pc2dex.into_iter().chain(dex2pc) {
            push_uleb128(&mut table, native);
            push_uleb128(&mut table, dex);
        }
        self.mapping_table = table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{
        codegen::{tests::mips_codegen, LiteralPool},
        mips::MipsOpcode,
        switch::{FillArrayData, SwitchTable},
    };

    #[test]
    fn offsets() {
        let mut cg = mips_codegen(1, vec![]);
        let a = cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        let n = cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        cg.lirs.nop(n);
        let l = cg.new_label().unwrap();
        let b = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        cg.lirs[b].target = Some(l);
        cg.add_word_data(LiteralPool::Data, 1).unwrap();
        cg.add_word_data(LiteralPool::Method, 2).unwrap();
        let tab = cg
            .add_switch_table(SwitchTable::new(
                SwitchKind::Sparse { keys: vec![1, 2] },
                vec![0, 0],
                0,
            ))
            .unwrap();
        cg.add_fill_array_data(
            FillArrayData::from_payload(0, &[0x0300, 1, 3, 0, 0x0201, 0x03]).unwrap(),
        )
        .unwrap();
        cg.assign_offsets().unwrap();
        assert_eq!(cg.lirs[a].offset, 0);
        assert_eq!(cg.lirs[l].offset, 4);
        assert_eq!(cg.lirs[b].offset, 4);
        // b is 8 bytes with its delay slot.
        assert_eq!(cg.data_offset, 12);
        // Two literals, a 16 byte sparse table, then 11 bytes of fill data, word aligned.
        assert_eq!(cg.switch_table(tab).offset, 20);
        assert_eq!(cg.total_size, 48);
    }

    #[test]
    fn align4() {
        let mut cg = mips_codegen(1, vec![]);
        let a = cg.new_lir0(Pseudo::Align4).unwrap();
        cg.assign_offsets().unwrap();
        assert_eq!(cg.lirs[a].operands[0], 0);
        // Instruction sizes are always multiples of 4 on Mips, so fake a 2 byte one.
        let mut cg = mips_codegen(1, vec![]);
        let x = cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        cg.lirs[x].size = 2;
        let a = cg.new_lir0(Pseudo::Align4).unwrap();
        let y = cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        cg.assign_offsets().unwrap();
        assert_eq!(cg.lirs[a].operands[0], 1);
        assert_eq!(cg.lirs[y].offset, 4);
    }

    #[test]
    fn mapping_table() {
        let mut cg = mips_codegen(1, vec![]);
        cg.mark_boundary(3).unwrap();
        let call = cg.new_lir2(MipsOpcode::Jalr, 31, 25).unwrap();
        cg.mark_safepoint_pc(call).unwrap();
        cg.mark_boundary(0x90).unwrap();
        cg.mark_exported_pc().unwrap();
        let dead = cg.mark_exported_pc().unwrap();
        cg.lirs.nop(dead);
        cg.assemble_lir().unwrap();
        // 2 entries, 1 pc2dex: (8, 3); then dex2pc: (8, 0x90).
        assert_eq!(cg.mapping_table, [2, 1, 8, 3, 8, 0x90, 0x01]);
    }

    #[test]
    fn data_after_code() {
        let mut cg = mips_codegen(1, vec![]);
        cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.add_word_data(LiteralPool::Data, 0x1234_5678).unwrap();
        cg.add_word_data(LiteralPool::Code, 7).unwrap();
        cg.add_fill_array_data(
            FillArrayData::from_payload(0, &[0x0300, 1, 1, 0, 0xaa]).unwrap(),
        )
        .unwrap();
        cg.assemble_lir().unwrap();
        assert_eq!(
            cg.code_buffer,
            [
                0, 0, 0, 0, // nop
                0x78, 0x56, 0x34, 0x12, // literal
                7, 0, 0, 0, // code patch
                0x00, 0x03, 1, 0, 1, 0, 0, 0, 0xaa, 0, // fill data
            ]
        );
        assert_eq!(
            cg.patches,
            [LiteralPatch {
                kind: PatchKind::Code,
                target_idx: 7,
                literal_offset: 8
            }]
        );
        assert_eq!(cg.total_size, 24);
    }
}
