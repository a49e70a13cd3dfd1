//! Instruction-kind classification
//!
//! Single source of truth for how each instruction kind relates to control
//! flow. The graph builder and the code injector both key off these two
//! predicates, so a kind has exactly one classification across the
//! pipeline.
//!
//! Kinds whose control-flow effect has not been categorized (`If`,
//! `Select`) are errors, not "inert": guessing wrong would let a control
//! transfer slip through block-splitting.

use wasm_ir::InstrKind;

use crate::error::ClassifyError;

/// Does this instruction kind affect the block-level flow of control?
///
/// `Call`/`CallIndirect` transfer control but always resume at the next
/// instruction, so for block splitting they are straight-line.
/// `Unreachable` traps; flow never proceeds past it, and splitting does not
/// need to know about it.
pub fn is_effective_control_flow(kind: InstrKind) -> Result<bool, ClassifyError> {
    match kind {
        InstrKind::Block
        | InstrKind::Loop
        | InstrKind::Br
        | InstrKind::BrIf
        | InstrKind::BrTable
        | InstrKind::Return => Ok(true),

        InstrKind::Call
        | InstrKind::CallIndirect
        | InstrKind::Unreachable
        | InstrKind::Nop
        | InstrKind::Drop
        | InstrKind::LocalGet
        | InstrKind::LocalSet
        | InstrKind::LocalTee
        | InstrKind::GlobalGet
        | InstrKind::GlobalSet
        | InstrKind::Load
        | InstrKind::Store
        | InstrKind::MemorySize
        | InstrKind::MemoryGrow
        | InstrKind::Const
        | InstrKind::Binary
        | InstrKind::Compare
        | InstrKind::Unary => Ok(false),

        InstrKind::If | InstrKind::Select => Err(ClassifyError(kind)),
    }
}

/// Does this instruction kind open a nested structured scope?
pub fn is_scope_opener(kind: InstrKind) -> Result<bool, ClassifyError> {
    if is_effective_control_flow(kind)? {
        Ok(matches!(kind, InstrKind::Block | InstrKind::Loop))
    } else {
        Ok(false)
    }
}
