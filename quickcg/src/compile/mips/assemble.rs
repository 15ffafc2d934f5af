//! Resolving pc-relative operands and encoding the LIR list into machine words.
//!
//! Branches only reach +/-128KiB. A branch whose target is further away is rewritten into an
//! indirect jump through `at` (see [convert_short_to_long_branch]) and the whole method is laid
//! out again.

use super::{encoding::encode_operands, MipsOpcode, MipsTarget, AT, RA};
use crate::compile::{
    assemble::push_word,
    codegen::Codegen,
    lir::{DataRef, LirIdx, LirOp, Pseudo},
    AssemblerStatus, CompilationError,
};

/// The largest forward and backward branch displacements, in bytes.
const MAX_BRANCH_FORWARD: i32 = 131068;
const MAX_BRANCH_BACKWARD: i32 = -131069;

fn missing(what: &str, idx: LirIdx) -> CompilationError {
    CompilationError::InternalError(format!("LIR {} has no {what}", idx.to_u32()))
}

/// The displacement from the anchor of the pc-relative computation `idx` to its table (if any)
/// or target label.
fn anchored_delta(cg: &Codegen<MipsTarget>, idx: LirIdx) -> Result<i32, CompilationError> {
    let lir = &cg.lirs[idx];
    let anchor = lir.anchor.ok_or_else(|| missing("anchor", idx))?;
    let to = match lir.table {
        Some(DataRef::Switch(t)) => cg.switch_tables[t].offset,
        Some(DataRef::FillArray(t)) => cg.fill_array_data[t].offset,
        None => cg.lirs[lir.target.ok_or_else(|| missing("target", idx))?].offset,
    };
    Ok(to.wrapping_sub(cg.lirs[anchor].offset) as i32)
}

/// The displacement of the branch `idx`, measured from its delay slot.
fn branch_delta(cg: &Codegen<MipsTarget>, idx: LirIdx) -> Result<i32, CompilationError> {
    let lir = &cg.lirs[idx];
    let target = lir.target.ok_or_else(|| missing("target", idx))?;
    Ok(cg.lirs[target].offset.wrapping_sub(lir.offset + 4) as i32)
}

/// The operands `idx` is encoded with. `jal` targets and `lalo` immediates are absolute, so they
/// are resolved here on every pass rather than written back into the LIR.
fn resolved_operands(
    cg: &Codegen<MipsTarget>,
    idx: LirIdx,
    op: MipsOpcode,
    start_addr: u32,
) -> Result<[i32; 4], CompilationError> {
    let lir = &cg.lirs[idx];
    let mut operands = lir.operands;
    match op {
        MipsOpcode::Jal => {
            let target = operands[0];
            if target & 3 != 0 {
                return Err(CompilationError::LimitExceeded(format!(
                    "Jump target not multiple of 4: {target}"
                )));
            }
            operands[0] = ((target as u32) >> 2) as i32;
        }
        MipsOpcode::Lalo => {
            let target = lir.target.ok_or_else(|| missing("target", idx))?;
            let addr = start_addr.wrapping_add(cg.lirs[target].offset);
            operands[2] = operands[2].wrapping_add(addr as i32);
        }
        _ => (),
    }
    Ok(operands)
}

/// Insert a fresh copy of `op` (with `operands`) before `at`, returning it.
fn insert(
    cg: &mut Codegen<MipsTarget>,
    at: LirIdx,
    op: LirOp<MipsOpcode>,
    operands: [i32; 4],
    target: Option<LirIdx>,
) -> Result<LirIdx, CompilationError> {
    let idx = cg.raw_lir(cg.lirs[at].dalvik_offset, op, operands, target)?;
    cg.lirs.insert_before(at, idx);
    Ok(idx)
}

/// Replace the out of range branch `idx` with a jump through `at`:
///
/// ```text
///     <inverted branch> hop     ; conditional branches only
///     bal   .+8                 ; ra = anchor
///     lui   at, hi(target - anchor)
/// anchor:
///     ori   at, at, lo(target - anchor)
///     addu  at, at, ra
///     jr    at
/// hop:
/// ```
fn convert_short_to_long_branch(
    cg: &mut Codegen<MipsTarget>,
    idx: LirIdx,
) -> Result<(), CompilationError> {
    let LirOp::Target(op) = cg.lirs[idx].op else {
        return Err(CompilationError::InternalError(
            "long branch conversion of a pseudo-op".into(),
        ));
    };
    let inverted = match op {
        MipsOpcode::Bal => {
            return Err(CompilationError::General(
                "long branch and link unsupported".into(),
            ))
        }
        MipsOpcode::B => None,
        MipsOpcode::Beq => Some(MipsOpcode::Bne),
        MipsOpcode::Bne => Some(MipsOpcode::Beq),
        MipsOpcode::Beqz => Some(MipsOpcode::Bnez),
        MipsOpcode::Bnez => Some(MipsOpcode::Beqz),
        MipsOpcode::Bgez => Some(MipsOpcode::Bltz),
        MipsOpcode::Bltz => Some(MipsOpcode::Bgez),
        MipsOpcode::Bgtz => Some(MipsOpcode::Blez),
        MipsOpcode::Blez => Some(MipsOpcode::Bgtz),
        x => {
            return Err(CompilationError::InternalError(format!(
                "Unexpected branch kind {x:?}"
            )))
        }
    };
    let dalvik_offset = cg.lirs[idx].dalvik_offset;
    let target = cg.lirs[idx].target;
    let hop = match inverted {
        Some(inverted) => {
            let hop = cg.raw_lir(dalvik_offset, Pseudo::TargetLabel.into(), [0; 4], None)?;
            let [a, b, ..] = cg.lirs[idx].operands;
            insert(cg, idx, inverted.into(), [a, b, 0, 0], Some(hop))?;
            Some(hop)
        }
        None => None,
    };
    insert(cg, idx, MipsOpcode::CurrPC.into(), [0; 4], None)?;
    let anchor = cg.raw_lir(dalvik_offset, Pseudo::TargetLabel.into(), [0; 4], None)?;
    let at = AT.to_operand();
    let hi = insert(cg, idx, MipsOpcode::DeltaHi.into(), [at, 0, 0, 0], target)?;
    cg.lirs[hi].anchor = Some(anchor);
    cg.lirs.insert_before(idx, anchor);
    let lo = insert(cg, idx, MipsOpcode::DeltaLo.into(), [at, 0, 0, 0], target)?;
    cg.lirs[lo].anchor = Some(anchor);
    insert(cg, idx, MipsOpcode::Addu.into(), [at, at, RA.to_operand(), 0], None)?;
    insert(cg, idx, MipsOpcode::Jr.into(), [at, 0, 0, 0], None)?;
    if let Some(hop) = hop {
        cg.lirs.insert_before(idx, hop);
    }
    cg.lirs.nop(idx);
    cg.long_branches += 1;
    Ok(())
}

/// Split the `Delta` at `idx`, whose displacement does not fit in its 16-bit immediate, into a
/// `lui`/`ori` pair added to `ra`.
fn expand_delta(cg: &mut Codegen<MipsTarget>, idx: LirIdx) -> Result<(), CompilationError> {
    let (reg, anchor, table, target) = {
        let lir = &cg.lirs[idx];
        (lir.operands[0], lir.anchor, lir.table, lir.target)
    };
    for op in [MipsOpcode::DeltaHi, MipsOpcode::DeltaLo] {
        let x = insert(cg, idx, op.into(), [reg, 0, 0, 0], target)?;
        cg.lirs[x].anchor = anchor;
        cg.lirs[x].table = table;
    }
    insert(cg, idx, MipsOpcode::Addu.into(), [reg, reg, RA.to_operand(), 0], None)?;
    cg.lirs.nop(idx);
    Ok(())
}

/// Resolve the pc-relative operand of `idx`, possibly rewriting it into a longer sequence (in
/// which case offsets are stale and [AssemblerStatus::RetryAll] is returned).
fn fixup(
    cg: &mut Codegen<MipsTarget>,
    idx: LirIdx,
    op: MipsOpcode,
    start_addr: u32,
) -> Result<AssemblerStatus, CompilationError> {
    match op {
        MipsOpcode::Delta => {
            let delta = anchored_delta(cg, idx)?;
            if (0..0x8000).contains(&delta) {
                cg.lirs[idx].operands[1] = delta;
            } else {
                expand_delta(cg, idx)?;
                return Ok(AssemblerStatus::RetryAll);
            }
        }
        MipsOpcode::DeltaLo => cg.lirs[idx].operands[1] = anchored_delta(cg, idx)? & 0xffff,
        MipsOpcode::DeltaHi => {
            cg.lirs[idx].operands[1] = (anchored_delta(cg, idx)? >> 16) & 0xffff
        }
        MipsOpcode::B
        | MipsOpcode::Bal
        | MipsOpcode::Beqz
        | MipsOpcode::Bgez
        | MipsOpcode::Bgtz
        | MipsOpcode::Blez
        | MipsOpcode::Bltz
        | MipsOpcode::Bnez
        | MipsOpcode::Beq
        | MipsOpcode::Bne => {
            let delta = branch_delta(cg, idx)?;
            if !(MAX_BRANCH_BACKWARD..=MAX_BRANCH_FORWARD).contains(&delta) {
                convert_short_to_long_branch(cg, idx)?;
                return Ok(AssemblerStatus::RetryAll);
            }
            if delta & 3 != 0 {
                return Err(CompilationError::LimitExceeded(format!(
                    "PC-rel offset not multiple of 4: {delta}"
                )));
            }
            let slot = match op {
                MipsOpcode::B | MipsOpcode::Bal => 0,
                MipsOpcode::Beq | MipsOpcode::Bne => 2,
                _ => 1,
            };
            cg.lirs[idx].operands[slot] = delta >> 2;
        }
        MipsOpcode::Jal | MipsOpcode::Lalo => {
            resolved_operands(cg, idx, op, start_addr)?;
        }
        MipsOpcode::Lahi => {
            let target = cg.lirs[idx].target.ok_or_else(|| missing("target", idx))?;
            let addr = start_addr.wrapping_add(cg.lirs[target].offset);
            cg.lirs[idx].operands[1] = (addr >> 16) as i32;
        }
        _ => (),
    }
    Ok(AssemblerStatus::Success)
}

/// Resolve every pc-relative operand and, if nothing had to be expanded, encode the method into
/// `cg.code_buffer`.
pub(super) fn assemble_instructions(
    cg: &mut Codegen<MipsTarget>,
    start_addr: u32,
) -> Result<AssemblerStatus, CompilationError> {
    let mut status = AssemblerStatus::Success;
    let mut cur = cg.lirs.first();
    while let Some(idx) = cur {
        // Expansions insert before `idx`, so the successor is unaffected.
        cur = cg.lirs[idx].next();
        let lir = &cg.lirs[idx];
        let op = match lir.op {
            LirOp::Target(op) if !lir.is_nop && op != MipsOpcode::Data32 => op,
            _ => continue,
        };
        if lir.pc_rel_fixup && fixup(cg, idx, op, start_addr)? == AssemblerStatus::RetryAll {
            status = AssemblerStatus::RetryAll;
        }
        // Once something has expanded, encoding is pointless until the next pass.
        if status != AssemblerStatus::Success {
            continue;
        }
        let operands = resolved_operands(cg, idx, op, start_addr)?;
        push_word(&mut cg.code_buffer, encode_operands(op, &operands))?;
        // The delay slot.
        if op.encoding().size == 8 {
            push_word(&mut cg.code_buffer, 0)?;
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{codegen::tests::mips_codegen, mips::A1};

    fn words(cg: &Codegen<MipsTarget>) -> Vec<u32> {
        cg.code_buffer
            .chunks(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    #[test]
    fn short_branch() {
        let mut cg = mips_codegen(1, vec![]);
        let b = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);
        cg.assemble_lir().unwrap();
        assert_eq!(cg.lirs[b].operands[0], 2);
        assert_eq!(words(&cg), [0x1000_0002, 0, 0x0085_1021]);
        assert_eq!(cg.long_branches, 0);
    }

    #[test]
    fn backward_branch() {
        let mut cg = mips_codegen(1, vec![]);
        let l = cg.new_label().unwrap();
        cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        let b = cg.new_lir1(MipsOpcode::Bnez, 2).unwrap();
        cg.lirs[b].target = Some(l);
        cg.assemble_lir().unwrap();
        // From the delay slot at 8 back to 0.
        assert_eq!(cg.lirs[b].operands[1], -2);
        assert_eq!(words(&cg)[1], 0x1440_fffe);
    }

    #[test]
    fn long_branch() {
        let mut cg = mips_codegen(1, vec![]);
        let b = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 131066;
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);

        cg.assign_offsets().unwrap();
        assert_eq!(
            assemble_instructions(&mut cg, 0).unwrap(),
            AssemblerStatus::RetryAll
        );
        assert!(cg.lirs[b].is_nop);
        assert_eq!(cg.long_branches, 1);
        assert!(cg.code_buffer.is_empty());

        cg.assemble_lir().unwrap();
        // The anchor is at 8 and the target at 24 + 131066.
        assert_eq!(cg.lirs[l].offset, 131090);
        assert_eq!(
            words(&cg)[..7],
            [
                0x0411_0001, // bal .+8
                0x3C01_0002, // lui at,2
                0x3421_000A, // ori at,at,0xa
                0x003F_0821, // addu at,at,ra
                0x0020_0008, // jr at
                0,
                0, // the filler
            ]
        );
        assert_eq!(cg.long_branches, 1);
    }

    #[test]
    fn long_conditional_branch() {
        let mut cg = mips_codegen(1, vec![]);
        let b = cg.new_lir2(MipsOpcode::Beq, 4, 5).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 0x20000;
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);
        cg.assemble_lir().unwrap();
        assert!(cg.lirs[b].is_nop);
        // bne a0,a1,hop; bal; lui; ori; addu; jr; hop:
        let w = words(&cg);
        assert_eq!(w[0], 0x1485_0007);
        assert_eq!(w[2], 0x0411_0001);
        // The hop is at 32, the anchor at 16 and the target at 32 + 0x20000.
        assert_eq!(w[3], 0x3C01_0002);
        assert_eq!(w[4], 0x3421_0010);
    }

    #[test]
    fn long_branch_and_link() {
        let mut cg = mips_codegen(1, vec![]);
        let b = cg.new_lir1(MipsOpcode::Bal, 0).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 0x20000;
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);
        assert!(matches!(
            cg.assemble_lir(),
            Err(CompilationError::General(_))
        ));
    }

    #[test]
    fn misaligned_branch() {
        let mut cg = mips_codegen(1, vec![]);
        let b = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 2;
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);
        assert!(matches!(
            cg.assemble_lir(),
            Err(CompilationError::LimitExceeded(_))
        ));

        let mut cg = mips_codegen(1, vec![]);
        cg.new_lir1(MipsOpcode::B, 0).unwrap();
        assert!(matches!(
            cg.assemble_lir(),
            Err(CompilationError::InternalError(_))
        ));
    }

    #[test]
    fn delta() {
        let mut cg = mips_codegen(1, vec![]);
        let anchor = cg.new_label().unwrap();
        let d = cg.new_lir4(MipsOpcode::Delta, A1.to_operand(), 0, 0, 0).unwrap();
        cg.new_lir3(MipsOpcode::Addu, 2, 4, 5).unwrap();
        let l = cg.new_label().unwrap();
        cg.lirs[d].anchor = Some(anchor);
        cg.lirs[d].target = Some(l);
        cg.assemble_lir().unwrap();
        // addiu a1,ra,8
        assert_eq!(words(&cg), [0x27e5_0008, 0x0085_1021]);
    }

    #[test]
    fn delta_expansion() {
        let mut cg = mips_codegen(1, vec![]);
        let anchor = cg.new_label().unwrap();
        let d = cg.new_lir4(MipsOpcode::Delta, A1.to_operand(), 0, 0, 0).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 0x8000;
        let l = cg.new_label().unwrap();
        cg.lirs[d].anchor = Some(anchor);
        cg.lirs[d].target = Some(l);
        cg.assemble_lir().unwrap();
        assert!(cg.lirs[d].is_nop);
        assert_eq!(cg.assembler_retries, 1);
        assert_eq!(
            words(&cg)[..3],
            [
                0x3C05_0000, // lui a1,0
                0x34A5_800C, // ori a1,a1,0x800c
                0x00BF_2821, // addu a1,a1,ra
            ]
        );
    }

    #[test]
    fn missing_anchor() {
        let mut cg = mips_codegen(1, vec![]);
        let d = cg.new_lir4(MipsOpcode::Delta, A1.to_operand(), 0, 0, 0).unwrap();
        let l = cg.new_label().unwrap();
        cg.lirs[d].target = Some(l);
        assert!(matches!(
            cg.assemble_lir(),
            Err(CompilationError::InternalError(_))
        ));
    }

    #[test]
    fn absolute_addresses() {
        let mut cg = mips_codegen(1, vec![]);
        let hi = cg.new_lir2(MipsOpcode::Lahi, A1.to_operand(), 0).unwrap();
        let lo = cg
            .new_lir3(MipsOpcode::Lalo, A1.to_operand(), A1.to_operand(), 0)
            .unwrap();
        let l = cg.new_label().unwrap();
        cg.lirs[hi].target = Some(l);
        cg.lirs[lo].target = Some(l);
        cg.assign_offsets().unwrap();
        assert_eq!(
            assemble_instructions(&mut cg, 0x0012_0000).unwrap(),
            AssemblerStatus::Success
        );
        assert_eq!(cg.lirs[hi].operands[1], 0x12);
        // The immediate is resolved into the encoding only.
        assert_eq!(cg.lirs[lo].operands[2], 0);
        // lui a1,0x12; ori a1,a1,0x8
        assert_eq!(words(&cg), [0x3C05_0012, 0x34A5_0008]);

        let mut cg = mips_codegen(1, vec![]);
        cg.new_lir1(MipsOpcode::Jal, 0x1002).unwrap();
        assert!(matches!(
            cg.assemble_lir(),
            Err(CompilationError::LimitExceeded(_))
        ));
        let mut cg = mips_codegen(1, vec![]);
        let j = cg.new_lir1(MipsOpcode::Jal, 0x1000).unwrap();
        cg.assemble_lir().unwrap();
        assert_eq!(cg.lirs[j].operands[0], 0x1000);
        assert_eq!(words(&cg), [0x0c00_0400, 0]);
    }

    #[test]
    fn absolute_addresses_survive_retries() {
        let mut cg = mips_codegen(1, vec![]);
        let j = cg.new_lir1(MipsOpcode::Jal, 0x1000).unwrap();
        let hi = cg.new_lir2(MipsOpcode::Lahi, A1.to_operand(), 0).unwrap();
        let lo = cg
            .new_lir3(MipsOpcode::Lalo, A1.to_operand(), A1.to_operand(), 4)
            .unwrap();
        let b = cg.new_lir1(MipsOpcode::B, 0).unwrap();
        let filler = cg.new_lir0(MipsOpcode::Nop).unwrap();
        cg.lirs[filler].size = 0x20000;
        let l = cg.new_label().unwrap();
        cg.lirs[b].target = Some(l);
        cg.lirs[hi].target = Some(l);
        cg.lirs[lo].target = Some(l);
        cg.assemble_lir().unwrap();
        assert_eq!(cg.assembler_retries, 1);
        assert_eq!(cg.long_branches, 1);
        // jal (8 bytes), lui, ori, then bal/lui/ori/addu/jr (24 bytes) before the filler.
        assert_eq!(cg.lirs[l].offset, 0x20028);
        let w = words(&cg);
        assert_eq!(w[0], 0x0c00_0400);
        assert_eq!(w[2], 0x3C05_0002);
        assert_eq!(w[3], 0x34A5_002C);
        assert_eq!(cg.lirs[j].operands[0], 0x1000);
        assert_eq!(cg.lirs[lo].operands[2], 4);
    }
}
