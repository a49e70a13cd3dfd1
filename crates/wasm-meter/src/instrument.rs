// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Module-level orchestration
//!
//! One call to [`instrument`] rewrites one module start to finish:
//!
//! 1. add the threshold/counter globals,
//! 2. locate the host's exceed import and force its signature to
//!    `(i64) -> ()`,
//! 3. synthesize the `increment` accounting function,
//! 4. sweep every defined function except `increment` itself through the
//!    graph/weight/inject pipeline,
//! 5. hand the mutated module to the validator.
//!
//! The transform is single-threaded and in-memory; callers must serialize
//! access to a module. It is not idempotent: a module that already carries
//! the accounting globals is refused.

use cfg::build_graph;
use log::debug;
use wasm_ir::{
    validate, BinOp, BlockBody, BrTarget, CmpOp, Func, FuncType, Global, Instr, Module, Val,
    ValType,
};

use crate::error::MeterError;
use crate::inject::CounterInjector;
use crate::weight::{CostModel, ImportFuncInfo, WeightCalculator};

/// Import module name of the budget-exceeded callback.
pub const EXCEED_IMPORT_MODULE: &str = "env";
/// Import field name of the budget-exceeded callback.
pub const EXCEED_IMPORT_FIELD: &str = "decent_wasm_counter_exceed";
/// Name given to the injected budget global, set by the embedding host
/// after instrumentation.
pub const THRESHOLD_GLOBAL_NAME: &str = "decent_wasm_threshold";
/// Name given to the injected accumulator global; always starts at zero.
pub const COUNTER_GLOBAL_NAME: &str = "decent_wasm_counter";

/// Caller-facing configuration surface.
#[derive(Clone)]
pub struct MeterConfig {
    pub cost_model: CostModel,
    pub exceed_module: String,
    pub exceed_field: String,
    pub threshold_name: String,
    pub counter_name: String,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            cost_model: CostModel::default(),
            exceed_module: EXCEED_IMPORT_MODULE.to_string(),
            exceed_field: EXCEED_IMPORT_FIELD.to_string(),
            threshold_name: THRESHOLD_GLOBAL_NAME.to_string(),
            counter_name: COUNTER_GLOBAL_NAME.to_string(),
        }
    }
}

/// Indices of the module items added by instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedSymbols {
    pub threshold_global: u32,
    pub counter_global: u32,
    pub exceed_func: u32,
    pub incr_func: u32,
}

/// Instrument `module` with the default configuration.
///
/// On success the module has been mutated and validated. On any error the
/// module may be partially rewritten and must be discarded.
pub fn instrument(module: &mut Module) -> Result<InjectedSymbols, MeterError> {
    instrument_with(module, &MeterConfig::default())
}

/// Instrument `module` with a caller-provided configuration.
pub fn instrument_with(
    module: &mut Module,
    config: &MeterConfig,
) -> Result<InjectedSymbols, MeterError> {
    let symbols = inject_counter_symbols(module, config)?;
    let imports = ImportFuncInfo::from_module(module);
    let calculator = WeightCalculator::new(&config.cost_model);
    let injector = CounterInjector::new(symbols.incr_func);

    let num_imports = module.num_func_imports();
    for (i, func) in module.funcs.iter_mut().enumerate() {
        let func_index = num_imports + i as u32;
        if func_index == symbols.incr_func {
            continue;
        }
        let mut graph = build_graph(&func.body)?;
        calculator.run(&mut graph, &func.body, &imports);
        injector.run(&mut graph, &mut func.body)?;
        debug!(
            "metered function {func_index}: {} blocks",
            graph.block_count()
        );
    }

    let diagnostics = validate(module);
    if !diagnostics.is_empty() {
        return Err(MeterError::Validation { diagnostics });
    }
    Ok(symbols)
}

/// Module-level setup: globals, exceed-import coercion, and the synthesized
/// accounting function.
fn inject_counter_symbols(
    module: &mut Module,
    config: &MeterConfig,
) -> Result<InjectedSymbols, MeterError> {
    for global in &module.globals {
        if let Some(name) = &global.name {
            if *name == config.threshold_name || *name == config.counter_name {
                return Err(MeterError::AccountingGlobalPresent { name: name.clone() });
            }
        }
    }

    let threshold_global = module.globals.len() as u32;
    module.globals.push(zero_i64_global(&config.threshold_name));
    let counter_global = module.globals.len() as u32;
    module.globals.push(zero_i64_global(&config.counter_name));

    let mut exceed = None;
    for (i, import) in module.imports.iter().enumerate() {
        if import.module == config.exceed_module && import.name == config.exceed_field {
            if exceed.is_some() {
                return Err(MeterError::ExceedImportDuplicated {
                    module: config.exceed_module.clone(),
                    field: config.exceed_field.clone(),
                });
            }
            exceed = Some(i);
        }
    }
    let Some(exceed_index) = exceed else {
        return Err(MeterError::ExceedImportMissing {
            module: config.exceed_module.clone(),
            field: config.exceed_field.clone(),
        });
    };

    let import = &mut module.imports[exceed_index];
    if !import.locals.is_empty() {
        return Err(MeterError::ExceedImportLocals {
            module: import.module.clone(),
            field: import.name.clone(),
            count: import.locals.len(),
        });
    }
    let accounting_sig = FuncType::new(vec![ValType::I64], vec![]);
    import.sig = accounting_sig.clone();

    // Shared by the coerced import and the increment function; registered
    // at most once no matter how often this runs across modules.
    module.ensure_type(&accounting_sig);

    let exceed_func = exceed_index as u32;
    let incr_func = module.next_func_index();
    module.funcs.push(Func {
        name: None,
        sig: accounting_sig,
        locals: vec![],
        body: increment_body(counter_global, threshold_global, exceed_func),
    });

    Ok(InjectedSymbols {
        threshold_global,
        counter_global,
        exceed_func,
        incr_func,
    })
}

fn zero_i64_global(name: &str) -> Global {
    Global {
        name: Some(name.to_string()),
        ty: ValType::I64,
        mutable: true,
        init: vec![Instr::Const(Val::I64(0))],
    }
}

/// Body of `increment(amount: i64)`: add `amount` to the counter, then call
/// the exceed import with the new counter unless it is still at or below
/// the threshold (unsigned comparison).
fn increment_body(counter: u32, threshold: u32, exceed: u32) -> Vec<Instr> {
    vec![
        Instr::LocalGet(0),
        Instr::GlobalGet(counter),
        Instr::Binary(BinOp::I64Add),
        Instr::GlobalSet(counter),
        Instr::Block(BlockBody {
            label: None,
            instrs: vec![
                Instr::GlobalGet(counter),
                Instr::GlobalGet(threshold),
                Instr::Compare(CmpOp::I64LeU),
                Instr::BrIf(BrTarget::Index(0)),
                Instr::GlobalGet(counter),
                Instr::Call(exceed),
            ],
        }),
    ]
}

#[cfg(test)]
mod tests {
    use wasm_ir::FuncImport;

    use super::*;

    fn exceed_import() -> FuncImport {
        FuncImport {
            module: EXCEED_IMPORT_MODULE.into(),
            name: EXCEED_IMPORT_FIELD.into(),
            sig: FuncType::default(),
            locals: vec![],
        }
    }

    #[test]
    fn setup_adds_globals_and_increment() {
        let mut module = Module::default();
        module.imports.push(exceed_import());

        let symbols = inject_counter_symbols(&mut module, &MeterConfig::default()).unwrap();
        assert_eq!(symbols.threshold_global, 0);
        assert_eq!(symbols.counter_global, 1);
        assert_eq!(symbols.exceed_func, 0);
        assert_eq!(symbols.incr_func, 1);

        assert_eq!(module.globals.len(), 2);
        assert!(module.globals.iter().all(|g| g.mutable));
        assert_eq!(
            module.globals[0].name.as_deref(),
            Some(THRESHOLD_GLOBAL_NAME)
        );

        // The import's signature was forced to (i64) -> ().
        assert_eq!(
            module.imports[0].sig,
            FuncType::new(vec![ValType::I64], vec![])
        );

        // The increment body guards the exceed call behind the unsigned
        // threshold comparison.
        let body = &module.funcs[0].body;
        assert_eq!(body[0], Instr::LocalGet(0));
        match &body[4] {
            Instr::Block(check) => {
                assert_eq!(check.instrs[2], Instr::Compare(CmpOp::I64LeU));
                assert_eq!(check.instrs[5], Instr::Call(symbols.exceed_func));
            }
            other => panic!("expected guard block, got {other:?}"),
        }
    }

    #[test]
    fn missing_exceed_import_is_refused() {
        let mut module = Module::default();
        assert!(matches!(
            instrument(&mut module),
            Err(MeterError::ExceedImportMissing { .. })
        ));
    }

    #[test]
    fn duplicate_exceed_import_is_refused() {
        let mut module = Module::default();
        module.imports.push(exceed_import());
        module.imports.push(exceed_import());
        assert!(matches!(
            instrument(&mut module),
            Err(MeterError::ExceedImportDuplicated { .. })
        ));
    }

    #[test]
    fn exceed_import_with_locals_is_refused() {
        let mut module = Module::default();
        let mut import = exceed_import();
        import.locals.push(ValType::I32);
        module.imports.push(import);
        assert!(matches!(
            instrument(&mut module),
            Err(MeterError::ExceedImportLocals { count: 1, .. })
        ));
    }

    #[test]
    fn accounting_signature_registered_once() {
        let mut module = Module::default();
        module.imports.push(exceed_import());
        // The shape is already in the table; setup must not add a second.
        module.types.push(FuncType::new(vec![ValType::I64], vec![]));

        inject_counter_symbols(&mut module, &MeterConfig::default()).unwrap();
        let accounting = FuncType::new(vec![ValType::I64], vec![]);
        let count = module.types.iter().filter(|t| **t == accounting).count();
        assert_eq!(count, 1);
    }
}
