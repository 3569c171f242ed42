//! Per-instruction PC records pushed into the `.bbtrace_inst` section.
//!
//! Each instrumented load, store, and call contributes one record via an
//! inline-assembly statement placed at the instrumentation site: the asm
//! pushes `(func_id, bb_id, inst_id, 0)` plus a relocation to a local label
//! it defines right at the insertion point. After linking, the section is a
//! stream of records whose final field is the instruction's PC in the image.
//!
//! The asm sits at the same insertion point as the hook call but before it,
//! so later code motion cannot separate the label from the instruction it
//! describes.

use std::fmt::Write;

use crate::errors::EmitError;
use crate::ir::Inst;

/// Section the records are pushed into.
pub const INSTPC_SECTION: &str = ".bbtrace_inst";

/// On-disk size of one record: four `u32` fields plus a `u64` label address.
pub const INSTPC_RECORD_SIZE: usize = 24;

/// One decoded `.bbtrace_inst` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstPcRecord {
    pub func_id: u32,
    pub bb_id: u32,
    pub inst_id: u32,
    /// Always zero; keeps the label address naturally aligned.
    pub reserved: u32,
    pub label_pc: u64,
}

/// The asm template that pushes one record and defines its label.
pub fn asm_template(func_id: u32, bb_id: u32, inst_id: u32) -> String {
    let mut template = String::new();
    let _ = writeln!(template, ".pushsection {INSTPC_SECTION},\"a\",@progbits");
    let _ = writeln!(template, ".long {func_id}");
    let _ = writeln!(template, ".long {bb_id}");
    let _ = writeln!(template, ".long {inst_id}");
    let _ = writeln!(template, ".long 0");
    let _ = writeln!(template, ".quad 1f");
    let _ = writeln!(template, ".popsection");
    let _ = writeln!(template, "1:");
    template
}

/// The side-effecting asm instruction inserted at an instrumentation site.
pub fn record_asm(func_id: u32, bb_id: u32, inst_id: u32) -> Inst {
    Inst::Asm {
        template: asm_template(func_id, bb_id, inst_id),
        sideeffect: true,
    }
}

/// Encode records as the linker would lay them out (little-endian).
pub fn encode(records: &[InstPcRecord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(records.len() * INSTPC_RECORD_SIZE);
    for record in records {
        bytes.extend_from_slice(&record.func_id.to_le_bytes());
        bytes.extend_from_slice(&record.bb_id.to_le_bytes());
        bytes.extend_from_slice(&record.inst_id.to_le_bytes());
        bytes.extend_from_slice(&record.reserved.to_le_bytes());
        bytes.extend_from_slice(&record.label_pc.to_le_bytes());
    }
    bytes
}

/// Decode a `.bbtrace_inst` section blob extracted from a binary.
pub fn decode(bytes: &[u8]) -> Result<Vec<InstPcRecord>, EmitError> {
    if bytes.len() % INSTPC_RECORD_SIZE != 0 {
        return Err(EmitError::TruncatedSection {
            section: INSTPC_SECTION,
            len: bytes.len(),
            record: INSTPC_RECORD_SIZE,
        });
    }
    let mut records = Vec::with_capacity(bytes.len() / INSTPC_RECORD_SIZE);
    for chunk in bytes.chunks_exact(INSTPC_RECORD_SIZE) {
        records.push(InstPcRecord {
            func_id: u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
            bb_id: u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
            inst_id: u32::from_le_bytes(chunk[8..12].try_into().unwrap()),
            reserved: u32::from_le_bytes(chunk[12..16].try_into().unwrap()),
            label_pc: u64::from_le_bytes(chunk[16..24].try_into().unwrap()),
        });
    }
    Ok(records)
}

/// Parse the ids back out of an emitted asm template, if it is one of ours.
///
/// Used by consumers (and tests) that scan rewritten IR for record sites.
pub fn parse_template(template: &str) -> Option<(u32, u32, u32)> {
    let mut lines = template.lines();
    let first = lines.next()?;
    if !first.starts_with(".pushsection ") || !first.contains(INSTPC_SECTION) {
        return None;
    }
    let mut ids = [0u32; 3];
    for slot in &mut ids {
        let line = lines.next()?;
        *slot = line.strip_prefix(".long ")?.parse().ok()?;
    }
    Some((ids[0], ids[1], ids[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_shape() {
        let template = asm_template(1, 2, 3);
        let lines: Vec<&str> = template.lines().collect();
        assert_eq!(
            lines,
            vec![
                ".pushsection .bbtrace_inst,\"a\",@progbits",
                ".long 1",
                ".long 2",
                ".long 3",
                ".long 0",
                ".quad 1f",
                ".popsection",
                "1:",
            ]
        );
    }

    #[test]
    fn test_parse_template_round_trip() {
        assert_eq!(parse_template(&asm_template(7, 8, 9)), Some((7, 8, 9)));
        assert_eq!(parse_template("mov x0, x1"), None);
    }

    #[test]
    fn test_record_asm_is_side_effecting() {
        match record_asm(0, 0, 0) {
            Inst::Asm { sideeffect, .. } => assert!(sideeffect),
            other => panic!("expected asm, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let records = vec![
            InstPcRecord {
                func_id: 0,
                bb_id: 0,
                inst_id: 0,
                reserved: 0,
                label_pc: 0x401010,
            },
            InstPcRecord {
                func_id: 0,
                bb_id: 0,
                inst_id: 1,
                reserved: 0,
                label_pc: 0x401018,
            },
        ];
        let bytes = encode(&records);
        assert_eq!(bytes.len(), 48);
        assert_eq!(decode(&bytes).unwrap(), records);
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let err = decode(&[0u8; 30]).unwrap_err();
        assert!(matches!(err, EmitError::TruncatedSection { len: 30, .. }));
    }
}
