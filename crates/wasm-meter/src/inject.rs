//! Accounting-call injection
//!
//! Splices `i64.const <weight>; call <increment>` into every block whose
//! weight is positive. If the block ends in a branch or return, the
//! sequence goes immediately before that terminal instruction (code after
//! it would be unreachable); otherwise it is appended at the span end, the
//! fallthrough point.
//!
//! Positions are collected over the whole graph first and applied
//! afterwards, deepest and rightmost first, so no applied insertion ever
//! shifts a position that is still pending.

use std::cmp::Ordering;

use cfg::{classify, BlockGraph, BlockIndex};
use wasm_ir::{list_at_mut, Instr, Val};

use crate::error::MeterError;

/// One pending insertion: `index` into the list addressed by `path`.
struct Splice {
    path: Vec<u32>,
    index: usize,
    span_start: usize,
    weight: u64,
}

/// Injects accounting calls sized by each block's weight.
pub struct CounterInjector {
    incr_func: u32,
}

impl CounterInjector {
    pub fn new(incr_func: u32) -> Self {
        Self { incr_func }
    }

    /// Rewrite `body` so each weighted block reachable from the graph's
    /// entry charges itself exactly once.
    ///
    /// Weights must have been computed first ([`MeterError::WeightNotComputed`]
    /// otherwise).
    pub fn run(&self, graph: &mut BlockGraph, body: &mut Vec<Instr>) -> Result<(), MeterError> {
        let mut splices = Vec::new();
        if let Some(entry) = graph.entry() {
            self.collect(graph, entry, &mut splices)?;
        }
        splices.sort_by(splice_order);

        for splice in &splices {
            let list = list_at_mut(body, &splice.path)
                .expect("block path resolves within its own function body");
            list.insert(splice.index, Instr::Call(self.incr_func));
            list.insert(splice.index, Instr::Const(Val::I64(splice.weight as i64)));
        }
        Ok(())
    }

    fn collect(
        &self,
        graph: &mut BlockGraph,
        index: BlockIndex,
        out: &mut Vec<Splice>,
    ) -> Result<(), MeterError> {
        if graph.block(index).injected {
            return Ok(());
        }
        if !graph.block(index).weight_computed {
            return Err(MeterError::WeightNotComputed);
        }
        graph.block_mut(index).injected = true;

        let data = graph.block(index);
        if data.weight > 0 {
            let before_terminal = classify::is_effective_control_flow(data.last_kind)?
                && !classify::is_scope_opener(data.last_kind)?;
            let insert_at = if before_terminal {
                data.instruction_range.end - 1
            } else {
                data.instruction_range.end
            };
            out.push(Splice {
                path: data.list_path.clone(),
                index: insert_at,
                span_start: data.instruction_range.start,
                weight: data.weight,
            });
        }

        let children: Vec<BlockIndex> = graph.successors(index).collect();
        for child in children {
            self.collect(graph, child, out)?;
        }
        Ok(())
    }
}

/// Descending order over the position sequence `path ++ [index]`, so nested
/// lists are rewritten before the parent position that leads to them and
/// later positions in a list are rewritten before earlier ones. Ties (two
/// blocks inserting at the same boundary) go to the later block first,
/// keeping each accounting call adjacent to its own block.
fn splice_order(a: &Splice, b: &Splice) -> Ordering {
    let seq_a = a.path.iter().map(|&p| p as usize).chain(std::iter::once(a.index));
    let seq_b = b.path.iter().map(|&p| p as usize).chain(std::iter::once(b.index));
    seq_b.cmp(seq_a).then(b.span_start.cmp(&a.span_start))
}
