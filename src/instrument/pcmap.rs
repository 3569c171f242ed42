//! The block-level PC map embedded in the final binary.
//!
//! A private constant array of `{u32 func_id, u32 bb_id, uintptr address}`
//! triples is placed in the `.bbtrace_map` section, aligned to the pointer
//! size and marked retained so link-time dead-stripping keeps it. The
//! address field is a relocation: the function pointer for entry blocks, a
//! block-address constant for every other block. A profiler attributes a PC
//! sample to its block by interval containment over this table.

use crate::errors::EmitError;
use crate::ir::{BlockRef, Const, DataLayout, FuncRef, Global, GlobalRef, Linkage, Module};

/// Section the map is placed in.
pub const PCMAP_SECTION: &str = ".bbtrace_map";

/// Symbol name of the emitted array.
pub const PCMAP_GLOBAL: &str = "__bbtrace_pcmap";

/// The link-time address a map entry resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddress {
    /// The function's own symbol address (entry blocks only).
    FunctionEntry(FuncRef),
    /// A block-address constant (every non-entry block).
    Block { func: FuncRef, block: BlockRef },
}

/// One `.bbtrace_map` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcMapEntry {
    pub func_id: u32,
    pub bb_id: u32,
    pub address: BlockAddress,
}

/// A decoded entry with the address resolved to a concrete PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPcMapEntry {
    pub func_id: u32,
    pub bb_id: u32,
    pub address: u64,
}

/// Size in bytes of one entry under `dl`: two `u32`s plus a pointer.
pub fn entry_size(dl: &DataLayout) -> usize {
    8 + dl.pointer_bytes() as usize
}

/// Append the PC-map global to `module`. Returns `None` for an empty map.
pub fn append_pc_map(module: &mut Module, entries: &[PcMapEntry]) -> Option<GlobalRef> {
    if entries.is_empty() {
        return None;
    }

    let pointer_bits = module.data_layout.pointer_bits;
    let rows = entries
        .iter()
        .map(|entry| {
            let address = match entry.address {
                BlockAddress::FunctionEntry(func) => Const::FunctionAddr(func),
                BlockAddress::Block { func, block } => Const::BlockAddr { func, block },
            };
            Const::Struct(vec![
                Const::Int {
                    bits: 32,
                    value: u64::from(entry.func_id),
                },
                Const::Int {
                    bits: 32,
                    value: u64::from(entry.bb_id),
                },
                Const::PtrToInt {
                    value: Box::new(address),
                    bits: pointer_bits,
                },
            ])
        })
        .collect();

    Some(module.add_global(Global {
        name: PCMAP_GLOBAL.to_string(),
        linkage: Linkage::Private,
        is_constant: true,
        init: Const::Array(rows),
        section: Some(PCMAP_SECTION.to_string()),
        align: module.data_layout.pointer_bytes(),
        retained: true,
        unnamed_addr: false,
    }))
}

/// Encode the section image, resolving relocations through `resolve`.
///
/// Little-endian, packed at the pointer type's natural alignment (no
/// padding: the pointer field starts at offset 8).
pub fn encode(
    entries: &[PcMapEntry],
    dl: &DataLayout,
    mut resolve: impl FnMut(BlockAddress) -> u64,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * entry_size(dl));
    for entry in entries {
        bytes.extend_from_slice(&entry.func_id.to_le_bytes());
        bytes.extend_from_slice(&entry.bb_id.to_le_bytes());
        let address = resolve(entry.address);
        match dl.pointer_bits {
            32 => bytes.extend_from_slice(&(address as u32).to_le_bytes()),
            _ => bytes.extend_from_slice(&address.to_le_bytes()),
        }
    }
    bytes
}

/// Decode a `.bbtrace_map` section blob extracted from a binary.
pub fn decode(bytes: &[u8], dl: &DataLayout) -> Result<Vec<ResolvedPcMapEntry>, EmitError> {
    let record = entry_size(dl);
    if bytes.len() % record != 0 {
        return Err(EmitError::TruncatedSection {
            section: PCMAP_SECTION,
            len: bytes.len(),
            record,
        });
    }
    let mut entries = Vec::with_capacity(bytes.len() / record);
    for chunk in bytes.chunks_exact(record) {
        let func_id = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
        let bb_id = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
        let address = match dl.pointer_bits {
            32 => u64::from(u32::from_le_bytes(chunk[8..12].try_into().unwrap())),
            _ => u64::from_le_bytes(chunk[8..16].try_into().unwrap()),
        };
        entries.push(ResolvedPcMapEntry {
            func_id,
            bb_id,
            address,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<PcMapEntry> {
        vec![
            PcMapEntry {
                func_id: 0,
                bb_id: 0,
                address: BlockAddress::FunctionEntry(FuncRef(0)),
            },
            PcMapEntry {
                func_id: 0,
                bb_id: 1,
                address: BlockAddress::Block {
                    func: FuncRef(0),
                    block: BlockRef(1),
                },
            },
        ]
    }

    #[test]
    fn test_entry_size_tracks_pointer_width() {
        assert_eq!(entry_size(&DataLayout::default()), 16);
        assert_eq!(entry_size(&DataLayout { pointer_bits: 32 }), 12);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let dl = DataLayout::default();
        let entries = sample_entries();
        let bytes = encode(&entries, &dl, |addr| match addr {
            BlockAddress::FunctionEntry(_) => 0x401000,
            BlockAddress::Block { .. } => 0x401040,
        });
        assert_eq!(bytes.len(), 32);

        let decoded = decode(&bytes, &dl).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].func_id, 0);
        assert_eq!(decoded[0].bb_id, 0);
        assert_eq!(decoded[0].address, 0x401000);
        assert_eq!(decoded[1].bb_id, 1);
        assert_eq!(decoded[1].address, 0x401040);
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let dl = DataLayout::default();
        let err = decode(&[0u8; 17], &dl).unwrap_err();
        assert!(matches!(err, EmitError::TruncatedSection { len: 17, .. }));
    }

    #[test]
    fn test_empty_map_appends_no_global() {
        let mut module = Module::new("unit.ir");
        assert!(append_pc_map(&mut module, &[]).is_none());
        assert!(module.globals.is_empty());
    }

    #[test]
    fn test_global_attributes() {
        let mut module = Module::new("unit.ir");
        let global = append_pc_map(&mut module, &sample_entries()).unwrap();
        let g = module.global(global);
        assert_eq!(g.section.as_deref(), Some(PCMAP_SECTION));
        assert_eq!(g.align, 8);
        assert!(g.retained);
        assert!(g.is_constant);
        assert_eq!(g.linkage, Linkage::Private);
        match &g.init {
            Const::Array(rows) => assert_eq!(rows.len(), 2),
            other => panic!("expected array initializer, got {other:?}"),
        }
    }
}
