// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Structural well-formedness validation.
//!
//! `validate` returns a list of human-readable diagnostics; an empty list
//! means the module is acceptable. Cheap IR-level index checks run first so
//! that several problems can be reported at once; if those pass, the module
//! is encoded and handed to `wasmparser` for full binary validation.

use crate::encode::encode;
use crate::instr::Instr;
use crate::module::{ExportKind, Module};

/// Validate `module`, returning all diagnostics found (empty on success).
pub fn validate(module: &Module) -> Vec<String> {
    let mut diagnostics = ir_diagnostics(module);
    if !diagnostics.is_empty() {
        return diagnostics;
    }

    match encode(module) {
        Ok(bytes) => {
            if let Err(err) = wasmparser::validate(&bytes) {
                diagnostics.push(format!(
                    "validation failed at offset {}: {}",
                    err.offset(),
                    err.message()
                ));
            }
        }
        Err(err) => diagnostics.push(format!("module cannot be encoded: {err}")),
    }
    diagnostics
}

fn ir_diagnostics(module: &Module) -> Vec<String> {
    let mut diagnostics = Vec::new();
    let num_funcs = module.next_func_index();
    let num_globals = module.globals.len() as u32;

    for imp in &module.imports {
        if !imp.locals.is_empty() {
            diagnostics.push(format!(
                "imported function `{}.{}` declares {} locals",
                imp.module,
                imp.name,
                imp.locals.len()
            ));
        }
    }

    for (i, func) in module.funcs.iter().enumerate() {
        let func_index = module.num_func_imports() + i as u32;
        walk(&func.body, &mut |instr| match instr {
            Instr::Call(target) if *target >= num_funcs => {
                diagnostics.push(format!(
                    "function {func_index} calls out-of-range function index {target}"
                ));
            }
            Instr::GlobalGet(g) | Instr::GlobalSet(g) if *g >= num_globals => {
                diagnostics.push(format!(
                    "function {func_index} references out-of-range global index {g}"
                ));
            }
            Instr::CallIndirect { type_index, .. }
                if *type_index >= module.types.len() as u32 =>
            {
                diagnostics.push(format!(
                    "function {func_index} uses out-of-range type index {type_index}"
                ));
            }
            _ => {}
        });
    }

    for export in &module.exports {
        let (limit, what) = match export.kind {
            ExportKind::Func => (num_funcs, "function"),
            ExportKind::Global => (num_globals, "global"),
            ExportKind::Memory => (module.memories.len() as u32, "memory"),
        };
        if export.index >= limit {
            diagnostics.push(format!(
                "export `{}` references out-of-range {what} index {}",
                export.name, export.index
            ));
        }
    }

    diagnostics
}

/// Depth-first visit of every instruction in `instrs`, including the bodies
/// of nested scopes.
fn walk(instrs: &[Instr], visit: &mut impl FnMut(&Instr)) {
    for instr in instrs {
        visit(instr);
        match instr {
            Instr::Block(body) | Instr::Loop(body) => walk(&body.instrs, visit),
            Instr::If(body) => {
                walk(&body.then_instrs, visit);
                walk(&body.else_instrs, visit);
            }
            _ => {}
        }
    }
}
