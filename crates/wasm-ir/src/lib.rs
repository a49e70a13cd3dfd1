// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory WebAssembly module representation
//!
//! This crate carries the mutable module model that transformation passes
//! operate on: nested instruction lists, function/import/global/type tables,
//! and the two exits out of the model, binary encoding (`encode`) and
//! structural validation (`validate`).
//!
//! Parsing a text or binary module *into* this representation is out of
//! scope; producers construct modules programmatically.

pub mod encode;
pub mod error;
pub mod instr;
pub mod module;
pub mod validate;

pub use encode::encode;
pub use error::EncodeError;
pub use instr::{
    list_at, list_at_mut, BinOp, BlockBody, BrTarget, CmpOp, IfBody, Instr, InstrKind, MemOp,
    UnOp, Val,
};
pub use module::{
    Export, ExportKind, Func, FuncImport, FuncType, Global, MemoryLimits, Module, ValType,
};
pub use validate::validate;
