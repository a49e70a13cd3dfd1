//! Graph builder
//!
//! Recovers a [`BlockGraph`] from a nested instruction stream by recursive
//! descent. Each list is split left-to-right into maximal runs, then the
//! runs are linked back to front: processing in reverse means a run's
//! continuation has already been resolved by the time an earlier run links
//! to it.
//!
//! Branch targets are resolved through an explicit stack of scope bindings.
//! A plain `block` binds its continuation (branching to it leaves the
//! block); a `loop` binds its own head block (branching to it re-enters the
//! loop).

use wasm_ir::{BrTarget, Instr, InstrKind};

use crate::classify;
use crate::error::BuildError;
use crate::graph::{BlockData, BlockGraph, BlockIndex, BrType, EdgeRole, FlowEdge, ScopeKind};

/// Build the block graph of one function body.
pub fn build_graph(body: &[Instr]) -> Result<BlockGraph, BuildError> {
    let mut builder = GraphBuilder::new();
    let entry = builder.build_region(ScopeKind::Func, body, &[], 0, None)?;
    let mut graph = builder.graph;
    graph.set_entry(entry);
    Ok(graph)
}

/// One maximal run of instructions within a single list.
struct Run {
    start: usize,
    end: usize,
    first: InstrKind,
    last: InstrKind,
}

/// One entry of the scope stack.
///
/// `target` is what a branch to this scope resolves to: the scope's
/// continuation block for a plain `block` (vacant when the block is the
/// last thing before the function exit), the loop head for a `loop`.
/// `target_depth` is the nesting depth recorded for that destination.
struct ScopeBinding {
    label: Option<String>,
    target: Option<BlockIndex>,
    target_depth: usize,
}

/// Outcome of resolving one branch through the scope stack.
struct ResolvedBranch {
    br: BrType,
    cont: BrType,
    dest: Option<BlockIndex>,
}

struct GraphBuilder {
    graph: BlockGraph,
    scope: Vec<ScopeBinding>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            graph: BlockGraph::new(),
            scope: Vec::new(),
        }
    }

    /// Build the sub-graph of one instruction list, returning the block
    /// control enters the region through (`cont` when the list is empty).
    ///
    /// `cont` is the block that follows the region; the last run falls
    /// through to it. `cont_depth` is the scope depth recorded for `cont`.
    fn build_region(
        &mut self,
        kind: ScopeKind,
        list: &[Instr],
        path: &[u32],
        cont_depth: usize,
        cont: Option<BlockIndex>,
    ) -> Result<Option<BlockIndex>, BuildError> {
        let runs = split_runs(list)?;

        let mut head = cont;
        let mut head_depth = cont_depth;

        for run in runs.iter().rev() {
            if classify::is_scope_opener(run.first)? {
                let mut child_path = path.to_vec();
                child_path.push(run.start as u32);

                match &list[run.start] {
                    Instr::Block(body) => {
                        // Branching to a block leaves it: bind the current
                        // continuation.
                        self.scope.push(ScopeBinding {
                            label: body.label.clone(),
                            target: head,
                            target_depth: head_depth,
                        });
                        let sub = self.build_region(
                            ScopeKind::Block,
                            &body.instrs,
                            &child_path,
                            head_depth,
                            head,
                        )?;
                        self.scope.pop();
                        if sub != head {
                            head = sub;
                            head_depth = self.scope.len();
                        }
                    }
                    Instr::Loop(body) => {
                        // Branching to a loop re-enters it: materialize the
                        // head block first and bind it.
                        let mut data = BlockData::new(
                            kind,
                            run.start..run.end,
                            path.to_vec(),
                            run.first,
                            run.last,
                        );
                        data.is_loop_head = true;
                        let node = self.graph.add_block(data);

                        self.scope.push(ScopeBinding {
                            label: body.label.clone(),
                            target: Some(node),
                            target_depth: self.scope.len(),
                        });
                        let sub = self.build_region(
                            ScopeKind::Loop,
                            &body.instrs,
                            &child_path,
                            head_depth,
                            head,
                        )?;
                        self.scope.pop();
                        if sub != head {
                            head = sub;
                            head_depth = self.scope.len();
                        }
                    }
                    other => return Err(BuildError::Unsupported(other.kind())),
                }
                continue;
            }

            let node = self.graph.add_block(BlockData::new(
                kind,
                run.start..run.end,
                path.to_vec(),
                run.first,
                run.last,
            ));

            if classify::is_effective_control_flow(run.last)? {
                match &list[run.end - 1] {
                    Instr::Br(target) => {
                        let resolved = self.resolve_branch(target)?;
                        if let Some(dest) = resolved.dest {
                            self.graph.add_edge(
                                node,
                                dest,
                                FlowEdge {
                                    role: EdgeRole::Branch,
                                    br: resolved.br,
                                    cont: resolved.cont,
                                },
                            );
                        }
                    }
                    Instr::BrIf(target) => {
                        let resolved = self.resolve_branch(target)?;
                        if let Some(dest) = resolved.dest {
                            self.graph.add_edge(
                                node,
                                dest,
                                FlowEdge {
                                    role: EdgeRole::Branch,
                                    br: resolved.br,
                                    cont: resolved.cont,
                                },
                            );
                        }
                        if let Some(fallthrough) = head {
                            self.graph.add_edge(
                                node,
                                fallthrough,
                                FlowEdge {
                                    role: EdgeRole::Fallthrough,
                                    br: BrType::Normal,
                                    cont: self.continuation_br_type(head_depth),
                                },
                            );
                        }
                    }
                    Instr::Return => {}
                    other => return Err(BuildError::Unsupported(other.kind())),
                }
            } else if let Some(fallthrough) = head {
                self.graph.add_edge(
                    node,
                    fallthrough,
                    FlowEdge {
                        role: EdgeRole::Fallthrough,
                        br: BrType::Normal,
                        cont: self.continuation_br_type(head_depth),
                    },
                );
            }

            head = Some(node);
            head_depth = self.scope.len();
        }

        Ok(head)
    }

    fn resolve_branch(&self, target: &BrTarget) -> Result<ResolvedBranch, BuildError> {
        match target {
            BrTarget::Index(depth) => self.resolve_depth(*depth),
            BrTarget::Label(name) => self.resolve_label(name),
        }
    }

    /// Walk the scope stack innermost-out `depth` levels.
    fn resolve_depth(&self, depth: u32) -> Result<ResolvedBranch, BuildError> {
        let mut pass_loop = false;
        let mut remaining = depth;
        for binding in self.scope.iter().rev() {
            if remaining == 0 {
                return Ok(self.classify_destination(binding, pass_loop));
            }
            pass_loop = pass_loop || self.is_loop_binding(binding);
            remaining -= 1;
        }
        Err(BuildError::BranchDepth {
            depth,
            available: self.scope.len(),
        })
    }

    /// Walk the scope stack innermost-out for a matching label.
    fn resolve_label(&self, name: &str) -> Result<ResolvedBranch, BuildError> {
        let mut pass_loop = false;
        for binding in self.scope.iter().rev() {
            if binding.label.as_deref() == Some(name) {
                return Ok(self.classify_destination(binding, pass_loop));
            }
            pass_loop = pass_loop || self.is_loop_binding(binding);
        }
        Err(BuildError::UndefinedLabel(name.to_string()))
    }

    /// Loop-relationship rule: a loop-head destination is `IntoLoop`;
    /// otherwise popping over any loop on the way out is `OutOfLoop`.
    fn classify_destination(&self, binding: &ScopeBinding, pass_loop: bool) -> ResolvedBranch {
        let into_loop = self.is_loop_binding(binding);
        let br = if into_loop {
            BrType::IntoLoop
        } else if pass_loop {
            BrType::OutOfLoop
        } else {
            BrType::Normal
        };
        let cont = if into_loop {
            BrType::IntoLoop
        } else {
            self.continuation_br_type(binding.target_depth)
        };
        ResolvedBranch {
            br,
            cont,
            dest: binding.target,
        }
    }

    /// The classification a fallthrough to a continuation recorded at
    /// `cont_depth` would get: any loop scope between the current depth and
    /// there makes it `OutOfLoop`.
    fn continuation_br_type(&self, cont_depth: usize) -> BrType {
        let passes_loop = self
            .scope
            .get(cont_depth..)
            .unwrap_or(&[])
            .iter()
            .any(|binding| self.is_loop_binding(binding));
        if passes_loop {
            BrType::OutOfLoop
        } else {
            BrType::Normal
        }
    }

    fn is_loop_binding(&self, binding: &ScopeBinding) -> bool {
        binding
            .target
            .map_or(false, |node| self.graph.block(node).is_loop_head)
    }
}

/// Split a list into maximal runs: scope openers become singleton runs, a
/// branch or return ends its run and is included, an opener ends the
/// preceding run without being included. Empty runs are never produced.
fn split_runs(list: &[Instr]) -> Result<Vec<Run>, BuildError> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < list.len() {
        let first = list[i].kind();
        if classify::is_scope_opener(first)? {
            runs.push(Run {
                start: i,
                end: i + 1,
                first,
                last: first,
            });
            i += 1;
            continue;
        }

        let start = i;
        let mut last = first;
        while i < list.len() {
            let kind = list[i].kind();
            if classify::is_effective_control_flow(kind)? {
                if classify::is_scope_opener(kind)? {
                    break;
                }
                last = kind;
                i += 1;
                break;
            }
            last = kind;
            i += 1;
        }
        runs.push(Run {
            start,
            end: i,
            first,
            last,
        });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::ops::Range;

    use wasm_ir::{BinOp, BlockBody, IfBody, Val};

    use super::*;

    fn block(label: Option<&str>, instrs: Vec<Instr>) -> Instr {
        Instr::Block(BlockBody {
            label: label.map(String::from),
            instrs,
        })
    }

    fn looped(label: Option<&str>, instrs: Vec<Instr>) -> Instr {
        Instr::Loop(BlockBody {
            label: label.map(String::from),
            instrs,
        })
    }

    /// Collect `(list_path, instruction_range)` for every retained block.
    fn spans_by_path(graph: &BlockGraph) -> HashMap<Vec<u32>, Vec<Range<usize>>> {
        let mut spans: HashMap<Vec<u32>, Vec<Range<usize>>> = HashMap::new();
        for index in graph.blocks() {
            let data = graph.block(index);
            spans
                .entry(data.list_path.clone())
                .or_default()
                .push(data.instruction_range.clone());
        }
        for ranges in spans.values_mut() {
            ranges.sort_by_key(|r| r.start);
        }
        spans
    }

    /// Every instruction is either inside a retained span of its list or is
    /// a plain-block opener whose contents are covered recursively.
    fn assert_covered(list: &[Instr], path: &[u32], spans: &HashMap<Vec<u32>, Vec<Range<usize>>>) {
        let empty = Vec::new();
        let here = spans.get(path).unwrap_or(&empty);
        for (i, instr) in list.iter().enumerate() {
            let in_span = here.iter().any(|r| r.contains(&i));
            match instr {
                Instr::Block(body) | Instr::Loop(body) => {
                    assert!(
                        in_span || matches!(instr, Instr::Block(_)),
                        "loop opener at {path:?}[{i}] must be spanned"
                    );
                    let mut child = path.to_vec();
                    child.push(i as u32);
                    assert_covered(&body.instrs, &child, spans);
                }
                _ => assert!(in_span, "instruction at {path:?}[{i}] not covered"),
            }
        }
        // No overlaps within one list.
        for pair in here.windows(2) {
            assert!(pair[0].end <= pair[1].start, "overlapping spans {pair:?}");
        }
    }

    #[test]
    fn empty_body_has_no_blocks() {
        let graph = build_graph(&[]).unwrap();
        assert_eq!(graph.block_count(), 0);
        assert!(graph.entry().is_none());
    }

    #[test]
    fn straight_line_body_is_one_block() {
        let body = vec![
            Instr::LocalGet(0),
            Instr::Const(Val::I32(1)),
            Instr::Binary(BinOp::I32Add),
            Instr::LocalSet(0),
        ];
        let graph = build_graph(&body).unwrap();
        assert_eq!(graph.block_count(), 1);

        let entry = graph.entry().unwrap();
        let data = graph.block(entry);
        assert_eq!(data.instruction_range, 0..4);
        assert_eq!(data.kind, ScopeKind::Func);
        assert_eq!(graph.successors(entry).count(), 0);
    }

    #[test]
    fn return_terminates_its_block_with_no_children() {
        let body = vec![Instr::Nop, Instr::Return];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();
        assert_eq!(graph.block(entry).instruction_range, 0..2);
        assert_eq!(graph.block(entry).last_kind, InstrKind::Return);
        assert_eq!(graph.successors(entry).count(), 0);
    }

    #[test]
    fn code_after_return_is_an_orphan() {
        let body = vec![Instr::Return, Instr::Nop];
        let graph = build_graph(&body).unwrap();
        assert_eq!(graph.block_count(), 2);

        let entry = graph.entry().unwrap();
        assert_eq!(graph.block(entry).last_kind, InstrKind::Return);

        let orphan = graph.blocks().find(|&b| b != entry).unwrap();
        assert_eq!(graph.parent_count(orphan), 0);
    }

    #[test]
    fn conditional_branch_links_taken_and_fallthrough() {
        let body = vec![
            block(None, vec![Instr::Nop, Instr::BrIf(BrTarget::Index(0))]),
            Instr::Nop,
        ];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();

        let edges: Vec<_> = graph.edges_out(entry).collect();
        assert_eq!(edges.len(), 2);

        let branch = edges.iter().find(|(_, e)| e.role == EdgeRole::Branch).unwrap();
        let fall = edges
            .iter()
            .find(|(_, e)| e.role == EdgeRole::Fallthrough)
            .unwrap();
        // Branching out of the plain block and falling through both reach
        // the trailing Nop block.
        assert_eq!(branch.0, fall.0);
        assert_eq!(branch.1.br, BrType::Normal);
        assert_eq!(fall.1.br, BrType::Normal);
    }

    #[test]
    fn branch_to_loop_head_is_into_loop() {
        let body = vec![
            looped(None, vec![Instr::Nop, Instr::BrIf(BrTarget::Index(0))]),
            Instr::Nop,
        ];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();

        let loop_head = graph.blocks().find(|&b| graph.block(b).is_loop_head).unwrap();
        assert_eq!(graph.block(loop_head).instruction_range, 0..1);
        assert_eq!(graph.successors(loop_head).count(), 0);

        let edges: Vec<_> = graph.edges_out(entry).collect();
        assert_eq!(edges.len(), 2);
        let branch = edges.iter().find(|(_, e)| e.role == EdgeRole::Branch).unwrap();
        assert_eq!(branch.0, loop_head);
        assert_eq!(branch.1.br, BrType::IntoLoop);
        assert_eq!(branch.1.cont, BrType::IntoLoop);

        let fall = edges
            .iter()
            .find(|(_, e)| e.role == EdgeRole::Fallthrough)
            .unwrap();
        assert_eq!(fall.1.br, BrType::Normal);
        // Leaving the loop body for the continuation crosses the loop scope.
        assert_eq!(fall.1.cont, BrType::OutOfLoop);
    }

    #[test]
    fn branch_over_a_loop_scope_is_out_of_loop() {
        let body = vec![
            block(
                None,
                vec![looped(None, vec![Instr::Br(BrTarget::Index(1))])],
            ),
            Instr::Nop,
        ];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();

        let edges: Vec<_> = graph.edges_out(entry).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].1.role, EdgeRole::Branch);
        assert_eq!(edges[0].1.br, BrType::OutOfLoop);
    }

    #[test]
    fn labeled_branch_resolves_like_indexed() {
        let body = vec![
            looped(Some("top"), vec![Instr::Br(BrTarget::Label("top".into()))]),
            Instr::Nop,
        ];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();
        let loop_head = graph.blocks().find(|&b| graph.block(b).is_loop_head).unwrap();

        let edges: Vec<_> = graph.edges_out(entry).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, loop_head);
        assert_eq!(edges[0].1.br, BrType::IntoLoop);
    }

    #[test]
    fn branch_to_function_exit_has_no_edge() {
        // The block's continuation is the function exit; breaking out of it
        // simply ends the path.
        let body = vec![block(None, vec![Instr::Br(BrTarget::Index(0))])];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();
        assert_eq!(graph.block(entry).last_kind, InstrKind::Br);
        assert_eq!(graph.successors(entry).count(), 0);
    }

    #[test]
    fn branch_depth_out_of_range_is_rejected() {
        let body = vec![block(None, vec![Instr::Br(BrTarget::Index(5))])];
        assert_eq!(
            build_graph(&body).unwrap_err(),
            BuildError::BranchDepth {
                depth: 5,
                available: 1
            }
        );
    }

    #[test]
    fn undefined_label_is_rejected() {
        let body = vec![block(
            Some("a"),
            vec![Instr::Br(BrTarget::Label("b".into()))],
        )];
        assert_eq!(
            build_graph(&body).unwrap_err(),
            BuildError::UndefinedLabel("b".into())
        );
    }

    #[test]
    fn if_fails_closed() {
        let body = vec![Instr::Const(Val::I32(1)), Instr::If(IfBody::default())];
        assert!(matches!(
            build_graph(&body),
            Err(BuildError::Unclassified(_))
        ));
    }

    #[test]
    fn br_table_is_unsupported() {
        let body = vec![
            Instr::Const(Val::I32(0)),
            Instr::BrTable {
                targets: vec![0],
                default: 0,
            },
        ];
        assert_eq!(
            build_graph(&body).unwrap_err(),
            BuildError::Unsupported(InstrKind::BrTable)
        );
    }

    #[test]
    fn nested_structure_spans_are_disjoint_and_cover_the_body() {
        let body = vec![
            Instr::LocalGet(0),
            block(
                Some("exit"),
                vec![
                    looped(
                        Some("top"),
                        vec![
                            Instr::Nop,
                            Instr::BrIf(BrTarget::Label("exit".into())),
                            Instr::Br(BrTarget::Label("top".into())),
                        ],
                    ),
                ],
            ),
            Instr::Nop,
            Instr::Return,
        ];
        let graph = build_graph(&body).unwrap();
        let spans = spans_by_path(&graph);
        assert_covered(&body, &[], &spans);

        // Loop body splits into the conditional-exit run and the back-branch
        // run, both inside the nested list.
        let inner = &spans[&vec![1u32, 0u32]];
        assert_eq!(inner, &vec![0..2, 2..3]);
    }

    #[test]
    fn loop_exit_and_back_edge_classify_against_the_same_stack() {
        let body = vec![
            block(
                Some("exit"),
                vec![looped(
                    Some("top"),
                    vec![
                        Instr::Nop,
                        Instr::BrIf(BrTarget::Label("exit".into())),
                        Instr::Br(BrTarget::Label("top".into())),
                    ],
                )],
            ),
            Instr::Return,
        ];
        let graph = build_graph(&body).unwrap();
        let entry = graph.entry().unwrap();

        // Entry is the conditional-exit run.
        let entry_edges: Vec<_> = graph.edges_out(entry).collect();
        assert_eq!(entry_edges.len(), 2);
        let taken = entry_edges
            .iter()
            .find(|(_, e)| e.role == EdgeRole::Branch)
            .unwrap();
        assert_eq!(taken.1.br, BrType::OutOfLoop);
        assert_eq!(graph.block(taken.0).last_kind, InstrKind::Return);

        // The fallthrough is the back-branch run, which re-enters the loop.
        let fall = entry_edges
            .iter()
            .find(|(_, e)| e.role == EdgeRole::Fallthrough)
            .unwrap();
        let back_edges: Vec<_> = graph.edges_out(fall.0).collect();
        assert_eq!(back_edges.len(), 1);
        assert_eq!(back_edges[0].1.br, BrType::IntoLoop);
        assert!(graph.block(back_edges[0].0).is_loop_head);
    }

    #[test]
    fn reconvergence_gives_a_block_multiple_parents() {
        let body = vec![
            block(None, vec![Instr::Nop, Instr::BrIf(BrTarget::Index(0))]),
            Instr::Nop,
        ];
        let graph = build_graph(&body).unwrap();
        let join = graph
            .blocks()
            .find(|&b| graph.block(b).instruction_range == (1..2) && graph.block(b).list_path.is_empty())
            .unwrap();
        assert_eq!(graph.parent_count(join), 2);
    }
}
