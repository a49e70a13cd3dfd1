// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for classification and graph construction.

use thiserror::Error;
use wasm_ir::InstrKind;

/// An instruction kind whose effect on control flow has not been
/// categorized.
///
/// Classification fails closed: an uncategorized kind could hide a control
/// transfer, so it is never assumed inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("instruction kind {0:?} has no control-flow classification")]
pub struct ClassifyError(pub InstrKind);

/// Errors that can occur while building a block graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Unclassified(#[from] ClassifyError),

    /// A control-flow instruction the builder has no linking rule for.
    #[error("unsupported control-flow instruction {0:?}")]
    Unsupported(InstrKind),

    /// A numeric branch target beyond the active scope stack.
    #[error("branch depth {depth} exceeds the {available} enclosing scopes")]
    BranchDepth { depth: u32, available: usize },

    /// A named branch target no enclosing scope carries.
    #[error("branch label `{0}` not found in any enclosing scope")]
    UndefinedLabel(String),
}
