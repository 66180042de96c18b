/// Whole-archive processing.
pub mod archive;
/// Stage ordering.
pub mod chain;
pub mod class_identity;
/// Run and per-class state.
pub mod context;
pub mod control_flow;
/// Common-super resolution that understands renames.
pub mod frame_resolver;
pub mod frame_safety;
/// The run's class graph.
pub mod hierarchy;
/// Rename tables.
pub mod mapping;
pub mod mappings_export;
/// Include patterns.
pub mod matcher;
pub mod member_name;
pub mod method_identity;
pub mod method_order;
/// Generated names.
pub mod naming;
/// Configuration and the per-class engine.
pub mod obfuscator;
pub mod stats;
pub mod string_encoding;
/// The decompiler trap class.
pub mod trap;
/// Reference rewriting helpers shared by the rename stages.
pub mod util;

use context::ClassContext;
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;

/// What one stage did to one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// The class was modified.
    pub changed: bool,
    /// References that could not be rewritten and were left as they were.
    pub recovered: usize,
}

impl StageOutcome {
    pub const fn unchanged() -> Self {
        Self {
            changed: false,
            recovered: 0,
        }
    }
}

/// A class-level obfuscation stage.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Rewrites `unit` in place.
    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError>;
}
