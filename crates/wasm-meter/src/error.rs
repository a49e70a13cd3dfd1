// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the metering pass.
//!
//! Every variant is fatal to the transform: nothing is retried, and a
//! module that produced an error may already be partially rewritten.

use cfg::{BuildError, ClassifyError};
use thiserror::Error;

/// Errors that can occur while instrumenting a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeterError {
    /// Control-flow recovery failed for some function body.
    #[error("failed to build block graph: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Unclassified(#[from] ClassifyError),

    /// The module already carries an accounting global, i.e. it has been
    /// instrumented before.
    #[error("module already contains accounting global `{name}`")]
    AccountingGlobalPresent { name: String },

    /// The budget-exceeded callback import is absent.
    #[error("could not find import `{module}.{field}`")]
    ExceedImportMissing { module: String, field: String },

    /// More than one import carries the budget-exceeded callback name.
    #[error("more than one import of `{module}.{field}`")]
    ExceedImportDuplicated { module: String, field: String },

    /// The exceed import declares locals, so its signature cannot be
    /// rewritten safely.
    #[error("import `{module}.{field}` declares {count} locals and cannot be coerced")]
    ExceedImportLocals {
        module: String,
        field: String,
        count: usize,
    },

    /// A block reached injection before its weight was computed.
    #[error("block weight used before it was computed")]
    WeightNotComputed,

    /// The mutated module failed final validation; the caller must discard
    /// it.
    #[error("instrumented module failed validation: {}", diagnostics.join("; "))]
    Validation { diagnostics: Vec<String> },
}
