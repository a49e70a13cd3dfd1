// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for binary encoding.

use thiserror::Error;

/// Errors that prevent a module from being encoded to binary form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A branch names a label that no enclosing scope carries.
    #[error("branch label `{0}` is not bound by any enclosing scope")]
    UndefinedLabel(String),

    /// Imported functions cannot carry locals in the binary format.
    #[error("imported function `{module}.{name}` declares {count} locals")]
    ImportLocals {
        module: String,
        name: String,
        count: usize,
    },

    /// Global initializers must be a single constant instruction.
    #[error("global {index} has a non-constant initializer")]
    NonConstGlobalInit { index: usize },
}
