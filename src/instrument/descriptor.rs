//! The per-block static descriptor file (`*.bbinfo.jsonl`).
//!
//! One JSON object per eligible block, in (function, block) traversal order.
//! Consumers join the descriptor against the `.bbtrace_map` section and the
//! runtime event stream, so record content is fully determined by the
//! module's static structure: no hashing, no randomness, no timestamps.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::EmitError;

/// Directory created next to the module for descriptor files.
pub const STATIC_DIR: &str = "bbtrace_static";

/// Classification of an instruction within a block record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstKind {
    Generic,
    Load,
    Store,
    Branch,
    Call,
}

/// One instruction of a block record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstRecord {
    /// Printed IR of the instruction, indented by two spaces.
    pub text: String,
    pub kind: InstKind,
    /// Dense per-kind-class id; present iff `kind` is not generic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<u32>,
    /// Successor `bb_id`s in `{true, false}` order; present iff branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<u32>>,
}

impl InstRecord {
    pub fn generic(text: String) -> Self {
        Self {
            text,
            kind: InstKind::Generic,
            inst_id: None,
            targets: None,
        }
    }
}

/// One descriptor line: a block and its instruction listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub func_id: u32,
    pub func_name: String,
    pub bb_id: u32,
    pub bb_name: String,
    /// Block label with trailing colon.
    pub header: String,
    pub insts: Vec<InstRecord>,
}

/// Where the descriptor for `module_id` is written:
/// `<dirname(module_id)>/bbtrace_static/<basename(module_id)>.bbinfo.jsonl`.
pub fn descriptor_path(module_id: &str) -> PathBuf {
    let module_path = Path::new(module_id);
    let parent = match module_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = module_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    parent.join(STATIC_DIR).join(format!("{base}.bbinfo.jsonl"))
}

/// Write the descriptor file for `module_id`.
///
/// Returns the path written, or `None` when there are no records (no file is
/// created). Directory creation is idempotent; the file is truncated.
pub fn write_descriptor(
    module_id: &str,
    records: &[BlockRecord],
) -> Result<Option<PathBuf>, EmitError> {
    if records.is_empty() {
        return Ok(None);
    }

    let path = descriptor_path(module_id);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| EmitError::CreateDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let file = File::create(&path).map_err(|source| EmitError::Write {
        path: path.clone(),
        source,
    })?;
    let mut out = BufWriter::new(file);
    for record in records {
        let line = serde_json::to_string(record)?;
        out.write_all(line.as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .map_err(|source| EmitError::Write {
                path: path.clone(),
                source,
            })?;
    }
    out.flush().map_err(|source| EmitError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(Some(path))
}
