//! Switch tables and fill-array-data payloads: data that is emitted after the literal pools and
//! addressed relative to a label in the code.

use super::{
    codegen::Codegen,
    lir::{LirIdx, Pseudo},
    CompilationError, TargetCodegen,
};
use std::fmt::Write;

/// The index of a [SwitchTable] in a method.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SwitchTableIdx(u32);
index_32bit!(SwitchTableIdx);

/// The index of a [FillArrayData] payload in a method.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FillArrayIdx(u32);
index_32bit!(FillArrayIdx);

const PACKED_SWITCH_SIGNATURE: u16 = 0x0100;
const SPARSE_SWITCH_SIGNATURE: u16 = 0x0200;
const FILL_ARRAY_DATA_SIGNATURE: u16 = 0x0300;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SwitchKind {
    /// Case `i` matches the key `low_key + i`.
    Packed { low_key: i32 },
    /// Case `i` matches `keys[i]`. Keys are sorted low to high.
    Sparse { keys: Vec<i32> },
}

#[derive(Clone, Debug)]
pub struct SwitchTable {
    pub kind: SwitchKind,
    /// The bytecode offset of each case, relative to `vaddr`.
    pub targets: Vec<i32>,
    /// The bytecode offset of the switch instruction.
    pub vaddr: u32,
    /// The label that the emitted displacements are relative to.
    pub anchor: Option<LirIdx>,
    /// The case label of each target, once [Codegen::process_switch_tables] has run.
    pub(crate) labels: Vec<LirIdx>,
    /// The table's offset from the start of the method, valid after offsets have been assigned.
    pub(crate) offset: u32,
}

fn read_i32(units: &[u16], at: usize) -> Option<i32> {
    let lo = u32::from(*units.get(at)?);
    let hi = u32::from(*units.get(at + 1)?);
    Some((lo | (hi << 16)) as i32)
}

fn truncated(what: &str) -> CompilationError {
    CompilationError::General(format!("truncated {what} payload"))
}

impl SwitchTable {
    /// Decode a `packed-switch-payload` or `sparse-switch-payload` from its 16-bit code units.
    pub fn from_payload(vaddr: u32, units: &[u16]) -> Result<Self, CompilationError> {
        let entries = usize::from(*units.get(1).ok_or_else(|| truncated("switch"))?);
        let (kind, targets_at) = match units[0] {
            PACKED_SWITCH_SIGNATURE => {
                let low_key = read_i32(units, 2).ok_or_else(|| truncated("packed-switch"))?;
                (SwitchKind::Packed { low_key }, 4)
            }
            SPARSE_SWITCH_SIGNATURE => {
                let keys = (0..entries)
                    .map(|i| read_i32(units, 2 + i * 2))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| truncated("sparse-switch"))?;
                (SwitchKind::Sparse { keys }, 2 + entries * 2)
            }
            x => {
                return Err(CompilationError::General(format!(
                    "unknown switch payload signature {x:#06x}"
                )))
            }
        };
        let targets = (0..entries)
            .map(|i| read_i32(units, targets_at + i * 2))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| truncated("switch"))?;
        Ok(Self::new(kind, targets, vaddr))
    }

    pub fn new(kind: SwitchKind, targets: Vec<i32>, vaddr: u32) -> Self {
        Self {
            kind,
            targets,
            vaddr,
            anchor: None,
            labels: Vec::new(),
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The key of case `i`.
    pub fn key(&self, i: usize) -> i32 {
        match &self.kind {
            SwitchKind::Packed { low_key } => low_key.wrapping_add(i as i32),
            SwitchKind::Sparse { keys } => keys[i],
        }
    }

    /// The size in bytes of the emitted table: key/displacement pairs for sparse tables, bare
    /// displacements for packed ones.
    pub fn byte_size(&self) -> usize {
        match self.kind {
            SwitchKind::Packed { .. } => self.len() * 4,
            SwitchKind::Sparse { .. } => self.len() * 8,
        }
    }

    pub fn dump(&self) -> String {
        let mut s = String::new();
        match &self.kind {
            SwitchKind::Packed { low_key } => writeln!(
                s,
                "Packed switch table - entries: {}, low_key: {low_key}",
                self.len()
            ),
            SwitchKind::Sparse { .. } => {
                writeln!(s, "Sparse switch table - entries: {}", self.len())
            }
        }
        .ok();
        for (i, t) in self.targets.iter().enumerate() {
            writeln!(s, "  Key[{}] -> 0x{:x}", self.key(i), t).ok();
        }
        s
    }
}

/// An array initialiser, emitted verbatim (header included) after the switch tables.
#[derive(Clone, Debug)]
pub struct FillArrayData {
    /// The bytecode offset of the `fill-array-data` instruction.
    pub vaddr: u32,
    /// The payload's 16-bit code units.
    pub table: Vec<u16>,
    /// The payload size in bytes: the elements plus the 8-byte header.
    pub size: u32,
    pub(crate) offset: u32,
}

impl FillArrayData {
    /// Wrap a `fill-array-data-payload`: `ident, element_width, size_lo, size_hi, data...`.
    pub fn from_payload(vaddr: u32, units: &[u16]) -> Result<Self, CompilationError> {
        if units.len() < 4 {
            return Err(truncated("fill-array-data"));
        }
        if units[0] != FILL_ARRAY_DATA_SIGNATURE {
            return Err(CompilationError::General(format!(
                "unknown fill-array-data signature {:#06x}",
                units[0]
            )));
        }
        let width = u32::from(units[1]);
        let elems = u32::from(units[2]) | (u32::from(units[3]) << 16);
        let size = elems
            .checked_mul(width)
            .and_then(|x| x.checked_add(8))
            .ok_or_else(|| CompilationError::LimitExceeded("fill-array-data size".into()))?;
        let needed = usize::try_from(size.div_ceil(2))
            .map_err(|_| CompilationError::LimitExceeded("fill-array-data size".into()))?;
        if units.len() < needed {
            return Err(truncated("fill-array-data"));
        }
        Ok(Self {
            vaddr,
            table: units[..needed].to_vec(),
            size,
            offset: 0,
        })
    }
}

impl<T: TargetCodegen> Codegen<T> {
    pub fn add_switch_table(&mut self, table: SwitchTable) -> Result<SwitchTableIdx, CompilationError> {
        let idx = SwitchTableIdx::new(self.switch_tables.len())?;
        self.switch_tables.push(table);
        Ok(idx)
    }

    pub fn switch_table(&self, idx: SwitchTableIdx) -> &SwitchTable {
        &self.switch_tables[idx]
    }

    pub fn add_fill_array_data(&mut self, data: FillArrayData) -> Result<FillArrayIdx, CompilationError> {
        let idx = FillArrayIdx::new(self.fill_array_data.len())?;
        self.fill_array_data.push(data);
        Ok(idx)
    }

    /// Insert a case label at the start of the code for the bytecode at `vaddr`.
    fn insert_case_label(&mut self, vaddr: u32, key: i32) -> Result<LirIdx, CompilationError> {
        let boundary = self.boundary(vaddr).ok_or_else(|| {
            CompilationError::InternalError(format!("Error: didn't find vaddr 0x{vaddr:x}"))
        })?;
        let label = self.raw_lir(vaddr, Pseudo::CaseLabel.into(), [key, 0, 0, 0], None)?;
        self.lirs.insert_after(boundary, label);
        Ok(label)
    }

    /// Give every case of every switch table a label to resolve its displacement against.
    pub(crate) fn process_switch_tables(&mut self) -> Result<(), CompilationError> {
        for i in 0..self.switch_tables.len() {
            let idx = SwitchTableIdx::new(i)?;
            let tab = &self.switch_tables[idx];
            let cases = (0..tab.len())
                .map(|j| {
                    let vaddr = i64::from(tab.vaddr) + i64::from(tab.targets[j]);
                    u32::try_from(vaddr).map(|v| (v, tab.key(j))).map_err(|_| {
                        CompilationError::InternalError(format!(
                            "switch target 0x{vaddr:x} is outside the method"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut labels = Vec::with_capacity(cases.len());
            for (vaddr, key) in cases {
                labels.push(self.insert_case_label(vaddr, key)?);
            }
            self.switch_tables[idx].labels = labels;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::codegen::tests::{match_lir, mips_codegen};

    #[test]
    fn decode_payloads() {
        let t = SwitchTable::from_payload(4, &[0x0100, 3, 0xfffe, 0xffff, 6, 0, 8, 0, 10, 0])
            .unwrap();
        assert_eq!(t.kind, SwitchKind::Packed { low_key: -2 });
        assert_eq!(t.targets, [6, 8, 10]);
        assert_eq!((t.key(0), t.key(2)), (-2, 0));
        assert_eq!(t.byte_size(), 12);

        let t = SwitchTable::from_payload(0, &[0x0200, 2, 1, 0, 0, 1, 4, 0, 0xfffc, 0xffff])
            .unwrap();
        assert_eq!(
            t.kind,
            SwitchKind::Sparse {
                keys: vec![1, 0x10000]
            }
        );
        assert_eq!(t.targets, [4, -4]);
        assert_eq!(t.byte_size(), 16);

        assert!(matches!(
            SwitchTable::from_payload(0, &[0x0200, 2, 1, 0]),
            Err(CompilationError::General(_))
        ));
        assert!(matches!(
            SwitchTable::from_payload(0, &[0x0700, 0]),
            Err(CompilationError::General(_))
        ));
    }

    #[test]
    fn fill_array_payload() {
        // Three 2-byte elements: 8 + 6 bytes.
        let f = FillArrayData::from_payload(2, &[0x0300, 2, 3, 0, 1, 2, 3, 0xdead]).unwrap();
        assert_eq!(f.size, 14);
        assert_eq!(f.table, [0x0300, 2, 3, 0, 1, 2, 3]);
        assert!(FillArrayData::from_payload(2, &[0x0300, 4, 3, 0, 1]).is_err());
    }

    #[test]
    fn case_labels() {
        let mut cg = mips_codegen(1, vec![]);
        cg.mark_boundary(0).unwrap();
        cg.mark_boundary(6).unwrap();
        cg.mark_boundary(10).unwrap();
        let t = SwitchTable::new(SwitchKind::Packed { low_key: 5 }, vec![6, 10, 6], 0);
        let idx = cg.add_switch_table(t).unwrap();
        cg.process_switch_tables().unwrap();
        assert_eq!(cg.switch_table(idx).labels.len(), 3);
        match_lir(
            &cg,
            "
            -------- dalvik offset: 0x0
            -------- dalvik offset: 0x6
            LC{{a}}: Case target 0x7|7
            LC{{b}}: Case target 0x5|5
            -------- dalvik offset: 0xa
            LC{{c}}: Case target 0x6|6
        ",
        );
    }

    #[test]
    fn missing_case_boundary() {
        let mut cg = mips_codegen(1, vec![]);
        cg.mark_boundary(0).unwrap();
        cg.add_switch_table(SwitchTable::new(
            SwitchKind::Sparse { keys: vec![3] },
            vec![2],
            0,
        ))
        .unwrap();
        assert!(matches!(
            cg.process_switch_tables(),
            Err(CompilationError::InternalError(_))
        ));
    }
}
