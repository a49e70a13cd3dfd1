//! Control-flow graph recovery for structured function bodies
//!
//! A function body is a flat, recursively nested instruction stream: plain
//! instructions interleaved with `block`/`loop` openers that own nested
//! lists. This crate recovers a basic-block graph from that shape:
//!
//! - [`classify`] answers, per instruction kind, "does this affect control
//!   flow?" and "does this open a nested scope?", failing closed on kinds it
//!   has not categorized.
//! - [`graph`] holds the block/edge model: one [`graph::BlockGraph`] per
//!   function, petgraph-backed, owning every block.
//! - [`builder`] walks the nested lists by recursive descent, splitting each
//!   list into maximal straight-line runs and resolving branch targets
//!   through an explicit scope stack.
//!
//! The graph is built once per function, consumed by downstream passes
//! (weighting, code injection), and discarded.

pub mod builder;
pub mod classify;
pub mod error;
pub mod graph;

pub use builder::build_graph;
pub use error::{BuildError, ClassifyError};
pub use graph::{BlockData, BlockGraph, BlockIndex, BrType, EdgeRole, FlowEdge, ScopeKind};
