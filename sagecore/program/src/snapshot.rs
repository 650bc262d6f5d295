//! Serialisable execution state. A snapshot is only meaningful at a step
//! boundary; restoration rejects program counters that point into the
//! interior of a fused run.
use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use sage_common::{Result, SageError};
use sage_ast::Value;

/// One suspended call frame. `function` is the global-function name that
/// identifies the frame's executable; `None` marks the host's entry block,
/// which the host recompiles and supplies on restore. `args` is fixed at
/// frame entry; `local` is the frame's mutable scratch. The shared env is
/// ambient and supplied afresh on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameState {
    pub function: Option<String>,
    pub pc: i64,
    pub args: HashMap<String, Value>,
    pub local: HashMap<String, Value>,
}

/// An ordered call stack, outermost frame first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub frames: Vec<FrameState>,
}

pub fn serialize_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(snapshot).map_err(|e| SageError(format!("serialize snapshot: {}", e)))
}

pub fn deserialize_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    serde_json::from_slice(bytes).map_err(|e| SageError(format!("deserialize snapshot: {}", e)))
}
