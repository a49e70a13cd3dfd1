//! Block weighting
//!
//! Each block's weight is the summed cost of the instructions in its own
//! span; nested sub-block instructions belong to child blocks and are never
//! double-charged. Costs come from an injectable [`CostModel`]: a table of
//! per-kind cost hooks, a finer override table keyed by imported-function
//! name, and a flat default for unmapped kinds.

use std::collections::HashMap;

use cfg::{BlockGraph, BlockIndex};
use lazy_static::lazy_static;
use wasm_ir::{list_at, Instr, InstrKind, Module};

/// Cost hook for one instruction kind.
pub type InstrCost = fn(&Instr, &CostModel, &ImportFuncInfo) -> u64;

/// Cost hook for one imported-function call site.
pub type CallCost = fn(&Instr) -> u64;

/// Cost of calling an imported function that has no per-import override.
pub const DEFAULT_IMPORT_CALL_COST: u64 = 2;

lazy_static! {
    /// Stock per-import call costs.
    static ref DEFAULT_IMPORT_COSTS: HashMap<(String, String), CallCost> = {
        let mut costs: HashMap<(String, String), CallCost> = HashMap::new();
        costs.insert(
            ("env".to_string(), "decent_wasm_test_log".to_string()),
            log_call_cost as CallCost,
        );
        costs
    };
}

fn unit_cost(_: &Instr, _: &CostModel, _: &ImportFuncInfo) -> u64 {
    1
}

fn log_call_cost(_: &Instr) -> u64 {
    10
}

/// Default cost of a `call`: the per-import override when one is
/// configured, a flat import cost otherwise, free for in-module callees
/// (their own bodies are metered).
pub fn import_call_cost(instr: &Instr, model: &CostModel, imports: &ImportFuncInfo) -> u64 {
    let Instr::Call(index) = instr else { return 0 };
    match imports.import_name(*index) {
        Some((module, field)) => match model.import_override(module, field) {
            Some(cost) => cost(instr),
            None => DEFAULT_IMPORT_CALL_COST,
        },
        None => 0,
    }
}

/// The configurable cost model driving weight computation.
#[derive(Clone)]
pub struct CostModel {
    instr_costs: HashMap<InstrKind, InstrCost>,
    import_costs: HashMap<(String, String), CallCost>,
    default_cost: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        let mut instr_costs: HashMap<InstrKind, InstrCost> = HashMap::new();
        instr_costs.insert(InstrKind::Binary, unit_cost as InstrCost);
        instr_costs.insert(InstrKind::Compare, unit_cost as InstrCost);
        instr_costs.insert(InstrKind::Call, import_call_cost as InstrCost);
        Self {
            instr_costs,
            import_costs: DEFAULT_IMPORT_COSTS.clone(),
            default_cost: 0,
        }
    }
}

impl CostModel {
    pub fn new(
        instr_costs: HashMap<InstrKind, InstrCost>,
        import_costs: HashMap<(String, String), CallCost>,
        default_cost: u64,
    ) -> Self {
        Self {
            instr_costs,
            import_costs,
            default_cost,
        }
    }

    /// Cost of one instruction.
    pub fn cost(&self, instr: &Instr, imports: &ImportFuncInfo) -> u64 {
        match self.instr_costs.get(&instr.kind()) {
            Some(hook) => hook(instr, self, imports),
            None => self.default_cost,
        }
    }

    /// Per-import call cost override, if configured.
    pub fn import_override(&self, module: &str, field: &str) -> Option<CallCost> {
        self.import_costs
            .get(&(module.to_string(), field.to_string()))
            .copied()
    }
}

/// Snapshot of a module's imported-function names, for resolving a call's
/// function index against the import section of the index space.
#[derive(Debug, Clone)]
pub struct ImportFuncInfo {
    names: Vec<(String, String)>,
}

impl ImportFuncInfo {
    pub fn from_module(module: &Module) -> Self {
        Self {
            names: module
                .imports
                .iter()
                .map(|imp| (imp.module.clone(), imp.name.clone()))
                .collect(),
        }
    }

    /// `(module, field)` of an imported function, or `None` for an
    /// in-module function index.
    pub fn import_name(&self, func_index: u32) -> Option<(&str, &str)> {
        self.names
            .get(func_index as usize)
            .map(|(module, field)| (module.as_str(), field.as_str()))
    }
}

/// Computes and caches the weight of every block reachable from the entry.
pub struct WeightCalculator<'a> {
    model: &'a CostModel,
}

impl<'a> WeightCalculator<'a> {
    pub fn new(model: &'a CostModel) -> Self {
        Self { model }
    }

    pub fn run(&self, graph: &mut BlockGraph, body: &[Instr], imports: &ImportFuncInfo) {
        if let Some(entry) = graph.entry() {
            self.visit(graph, entry, body, imports);
        }
    }

    fn visit(
        &self,
        graph: &mut BlockGraph,
        index: BlockIndex,
        body: &[Instr],
        imports: &ImportFuncInfo,
    ) {
        if graph.block(index).weight_computed {
            return;
        }
        graph.block_mut(index).weight_computed = true;

        let (range, path) = {
            let data = graph.block(index);
            (data.instruction_range.clone(), data.list_path.clone())
        };
        let list = list_at(body, &path).expect("block path resolves within its own function body");
        let weight = list[range]
            .iter()
            .map(|instr| self.model.cost(instr, imports))
            .sum();
        graph.block_mut(index).weight = weight;

        let children: Vec<BlockIndex> = graph.successors(index).collect();
        for child in children {
            self.visit(graph, child, body, imports);
        }
    }
}

#[cfg(test)]
mod tests {
    use cfg::build_graph;
    use wasm_ir::{BinOp, BlockBody, BrTarget, CmpOp, FuncImport, FuncType, Val};

    use super::*;

    fn no_imports() -> ImportFuncInfo {
        ImportFuncInfo { names: Vec::new() }
    }

    fn weigh(body: &[Instr], imports: &ImportFuncInfo) -> BlockGraph {
        let mut graph = build_graph(body).unwrap();
        let model = CostModel::default();
        WeightCalculator::new(&model).run(&mut graph, body, imports);
        graph
    }

    #[test]
    fn stock_costs_charge_binary_and_compare() {
        let body = vec![
            Instr::Const(Val::I32(1)),
            Instr::Const(Val::I32(2)),
            Instr::Binary(BinOp::I32Add),
            Instr::Const(Val::I32(3)),
            Instr::Compare(CmpOp::I32LtU),
            Instr::Drop,
        ];
        let graph = weigh(&body, &no_imports());
        let entry = graph.entry().unwrap();
        assert_eq!(graph.block(entry).weight, 2);
        assert!(graph.block(entry).weight_computed);
    }

    #[test]
    fn unmapped_kinds_use_the_flat_default() {
        let body = vec![Instr::Nop, Instr::Nop, Instr::Nop];
        let mut graph = build_graph(&body).unwrap();
        let model = CostModel::new(HashMap::new(), HashMap::new(), 7);
        WeightCalculator::new(&model).run(&mut graph, &body, &no_imports());
        let entry = graph.entry().unwrap();
        assert_eq!(graph.block(entry).weight, 21);
    }

    #[test]
    fn call_costs_distinguish_import_override_import_and_local() {
        let mut module = Module::default();
        for name in ["decent_wasm_test_log", "other_host_call"] {
            module.imports.push(FuncImport {
                module: "env".into(),
                name: name.into(),
                sig: FuncType::default(),
                locals: vec![],
            });
        }
        let imports = ImportFuncInfo::from_module(&module);

        let body = vec![Instr::Call(0), Instr::Call(1), Instr::Call(2)];
        let graph = weigh(&body, &imports);
        let entry = graph.entry().unwrap();
        // override (10) + plain import (2) + in-module (0)
        assert_eq!(graph.block(entry).weight, 12);
    }

    #[test]
    fn nested_instructions_are_charged_to_their_own_block() {
        // The outer block's span covers only the loop opener; the arithmetic
        // inside the loop belongs to the inner block.
        let body = vec![
            Instr::Loop(BlockBody {
                label: None,
                instrs: vec![
                    Instr::Const(Val::I32(1)),
                    Instr::Const(Val::I32(2)),
                    Instr::Binary(BinOp::I32Add),
                    Instr::Drop,
                    Instr::BrIf(BrTarget::Index(0)),
                ],
            }),
            Instr::Return,
        ];
        let graph = weigh(&body, &no_imports());

        let loop_head = graph.blocks().find(|&b| graph.block(b).is_loop_head).unwrap();
        assert_eq!(graph.block(loop_head).weight, 0);

        let inner = graph
            .blocks()
            .find(|&b| graph.block(b).list_path == vec![0])
            .unwrap();
        assert_eq!(graph.block(inner).weight, 1);
    }

    #[test]
    fn every_reachable_block_is_weighed_exactly_once() {
        // Reconvergent shape: both arms of the conditional reach the same
        // continuation block.
        let body = vec![
            Instr::Block(BlockBody {
                label: None,
                instrs: vec![Instr::Nop, Instr::BrIf(BrTarget::Index(0))],
            }),
            Instr::Const(Val::I32(1)),
            Instr::Drop,
        ];
        let mut graph = build_graph(&body).unwrap();
        let model = CostModel::default();
        let imports = no_imports();
        let calculator = WeightCalculator::new(&model);
        calculator.run(&mut graph, &body, &imports);

        let weights: Vec<u64> = graph.blocks().map(|b| graph.block(b).weight).collect();
        for index in graph.blocks() {
            assert!(graph.block(index).weight_computed);
        }

        // A second pass is a no-op thanks to the per-block guard.
        calculator.run(&mut graph, &body, &imports);
        let again: Vec<u64> = graph.blocks().map(|b| graph.block(b).weight).collect();
        assert_eq!(weights, again);
    }
}
