// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Module-level containers: functions, imports, globals, memories, exports,
//! and the function-signature table.
//!
//! The function index space is imports first, then defined functions, in
//! declaration order.

use crate::instr::Instr;

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

/// A function signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        Self { params, results }
    }
}

/// An imported function.
///
/// `locals` is a producer artifact: toolkits that model imports as function
/// declarations may attach a locals list to one. An import carrying locals
/// cannot be encoded, and passes that rewrite an import's signature must
/// refuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncImport {
    pub module: String,
    pub name: String,
    pub sig: FuncType,
    pub locals: Vec<ValType>,
}

/// A function defined in the module.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: Option<String>,
    pub sig: FuncType,
    pub locals: Vec<ValType>,
    pub body: Vec<Instr>,
}

/// A module global. `init` must be a single constant instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: Option<String>,
    pub ty: ValType,
    pub mutable: bool,
    pub init: Vec<Instr>,
}

/// Linear-memory limits, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub min: u64,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Global,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// An in-memory module. All lists are appendable by passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<FuncImport>,
    pub funcs: Vec<Func>,
    pub globals: Vec<Global>,
    pub memories: Vec<MemoryLimits>,
    pub exports: Vec<Export>,
}

impl Module {
    /// Number of imported functions (the start of the defined-function range
    /// in the function index space).
    pub fn num_func_imports(&self) -> u32 {
        self.imports.len() as u32
    }

    /// The function index a newly appended defined function would receive.
    pub fn next_func_index(&self) -> u32 {
        (self.imports.len() + self.funcs.len()) as u32
    }

    /// Index of a structurally identical signature in the type table.
    pub fn find_type(&self, sig: &FuncType) -> Option<u32> {
        self.types.iter().position(|t| t == sig).map(|i| i as u32)
    }

    /// Register `sig` in the type table unless a structurally identical
    /// entry is already present. Returns the entry's index either way.
    pub fn ensure_type(&mut self, sig: &FuncType) -> u32 {
        match self.find_type(sig) {
            Some(idx) => idx,
            None => {
                self.types.push(sig.clone());
                (self.types.len() - 1) as u32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_type_deduplicates_structurally() {
        let mut module = Module::default();
        let sig = FuncType::new(vec![ValType::I64], vec![]);

        let a = module.ensure_type(&sig);
        let b = module.ensure_type(&FuncType::new(vec![ValType::I64], vec![]));
        assert_eq!(a, b);
        assert_eq!(module.types.len(), 1);

        let c = module.ensure_type(&FuncType::new(vec![], vec![ValType::I64]));
        assert_ne!(a, c);
        assert_eq!(module.types.len(), 2);
    }

    #[test]
    fn func_index_space_counts_imports_first() {
        let mut module = Module::default();
        module.imports.push(FuncImport {
            module: "env".into(),
            name: "h".into(),
            sig: FuncType::default(),
            locals: vec![],
        });
        assert_eq!(module.num_func_imports(), 1);
        assert_eq!(module.next_func_index(), 1);

        module.funcs.push(Func {
            name: None,
            sig: FuncType::default(),
            locals: vec![],
            body: vec![],
        });
        assert_eq!(module.next_func_index(), 2);
    }
}
