// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block graph data structures
//!
//! One [`BlockGraph`] per function, backed by petgraph. The graph owns every
//! block; edges and scope bindings refer to blocks by [`BlockIndex`]. The
//! graph is a DAG plus loop back-edges: reconverging fallthroughs and
//! branches can give a block several parents, which is why downstream
//! passes guard their traversals with the per-block `weight_computed` /
//! `injected` flags.

use std::ops::Range;

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use wasm_ir::InstrKind;

pub type BlockIndex = petgraph::graph::NodeIndex;

pub(crate) type InnerGraph = DiGraph<BlockData, FlowEdge>;

/// Structural kind of the scope a block was carved out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Function body (outermost level).
    Func,
    /// Body of a plain `block`.
    Block,
    /// Body of a `loop`.
    Loop,
}

/// How a control transfer relates to loop nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrType {
    /// No loop boundary involved.
    Normal,
    /// Re-enters a loop at its top.
    IntoLoop,
    /// Exits one or more enclosing loop bodies.
    OutOfLoop,
}

/// Which of a block's outgoing transfers an edge models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRole {
    /// The taken target of a branch.
    Branch,
    /// Falling through to the continuation.
    Fallthrough,
}

/// A control-flow edge between two blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    pub role: EdgeRole,
    /// Loop relationship of this transfer.
    pub br: BrType,
    /// Loop relationship the fallthrough continuation had when this edge
    /// was created. Stored for forward compatibility; injection does not
    /// read it.
    pub cont: BrType,
}

/// One basic block: a maximal straight-line run of instructions at a single
/// structural nesting level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    /// Kind of the scope this block was carved out of.
    pub kind: ScopeKind,
    /// Set on the block materialized for a `loop` opener; branches to it
    /// re-enter the loop.
    pub is_loop_head: bool,
    /// `[begin, end)` into the owning instruction list. Never empty.
    pub instruction_range: Range<usize>,
    /// Scope-opener indices addressing the owning list within the function
    /// body (empty for the top-level list).
    pub list_path: Vec<u32>,
    /// Kind of the first instruction in the range.
    pub first_kind: InstrKind,
    /// Kind of the last instruction in the range.
    pub last_kind: InstrKind,
    /// Accumulated cost of the instructions in the range. Valid only once
    /// `weight_computed` is set.
    pub weight: u64,
    pub weight_computed: bool,
    pub injected: bool,
}

impl BlockData {
    pub(crate) fn new(
        kind: ScopeKind,
        instruction_range: Range<usize>,
        list_path: Vec<u32>,
        first_kind: InstrKind,
        last_kind: InstrKind,
    ) -> Self {
        debug_assert!(!instruction_range.is_empty(), "blocks never span zero instructions");
        Self {
            kind,
            is_loop_head: false,
            instruction_range,
            list_path,
            first_kind,
            last_kind,
            weight: 0,
            weight_computed: false,
            injected: false,
        }
    }
}

/// The block graph of exactly one function.
#[derive(Debug)]
pub struct BlockGraph {
    graph: InnerGraph,
    entry: Option<BlockIndex>,
}

impl BlockGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: InnerGraph::new(),
            entry: None,
        }
    }

    pub(crate) fn set_entry(&mut self, entry: Option<BlockIndex>) {
        self.entry = entry;
    }

    pub(crate) fn add_block(&mut self, data: BlockData) -> BlockIndex {
        self.graph.add_node(data)
    }

    pub(crate) fn add_edge(&mut self, from: BlockIndex, to: BlockIndex, edge: FlowEdge) {
        self.graph.add_edge(from, to, edge);
    }

    /// The block control enters the function through, if the body is
    /// non-empty.
    pub fn entry(&self) -> Option<BlockIndex> {
        self.entry
    }

    /// Iterate over all block indices, including blocks unreachable from
    /// the entry (dead code).
    pub fn blocks(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn block(&self, index: BlockIndex) -> &BlockData {
        &self.graph[index]
    }

    pub fn block_mut(&mut self, index: BlockIndex) -> &mut BlockData {
        &mut self.graph[index]
    }

    /// Iterate over the children of a block.
    pub fn successors(&self, index: BlockIndex) -> impl Iterator<Item = BlockIndex> + '_ {
        self.graph.neighbors(index)
    }

    /// Iterate over a block's outgoing edges as `(child, edge)` pairs.
    pub fn edges_out(&self, index: BlockIndex) -> impl Iterator<Item = (BlockIndex, &FlowEdge)> {
        self.graph.edges(index).map(|e| (e.target(), e.weight()))
    }

    /// Number of parents of a block.
    pub fn parent_count(&self, index: BlockIndex) -> usize {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .count()
    }
}
