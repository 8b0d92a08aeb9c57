//! Serialization order: post-order DFS from the entry.
//!
//! Dependencies come before their dependants, which is what the runtime's
//! lazy factory model needs: by the time a parent factory runs
//! `require(depIndex)`, the child factory is already registered. Cycles are
//! broken at the back edge (the module currently on the DFS stack is not
//! re-entered).

use crate::module_graph::{ModuleGraph, ModuleIx};

/// Modules in post-order DFS from the entry, visiting each module's
/// resolved dependencies in source order. Modules not reachable from the
/// entry are appended afterwards in path-sorted order; a closed graph has
/// none.
pub fn post_order(graph: &ModuleGraph) -> Vec<ModuleIx> {
    let mut order = Vec::with_capacity(graph.len());
    let mut state = vec![VisitState::Unvisited; graph_capacity(graph)];

    if let Some(entry_ix) = graph.entry_path().and_then(|p| graph.ix_of(p)) {
        visit(graph, entry_ix, &mut state, &mut order);
    }

    let mut stragglers: Vec<ModuleIx> = graph
        .iter()
        .filter(|(ix, _)| state[ix.0 as usize] != VisitState::Done)
        .map(|(ix, _)| ix)
        .collect();
    stragglers.sort_by(|a, b| graph.module(*a).path.cmp(&graph.module(*b).path));
    for ix in stragglers {
        visit(graph, ix, &mut state, &mut order);
    }

    order
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    /// On the DFS stack; seeing this again means a cycle.
    Active,
    Done,
}

fn graph_capacity(graph: &ModuleGraph) -> usize {
    graph
        .iter()
        .map(|(ix, _)| ix.0 as usize + 1)
        .max()
        .unwrap_or(0)
}

fn visit(graph: &ModuleGraph, start: ModuleIx, state: &mut [VisitState], order: &mut Vec<ModuleIx>) {
    if state[start.0 as usize] != VisitState::Unvisited {
        return;
    }
    // iterative DFS; each frame tracks how many children it has emitted
    let mut stack: Vec<(ModuleIx, Vec<ModuleIx>, usize)> = Vec::new();
    state[start.0 as usize] = VisitState::Active;
    stack.push((start, graph.dep_handles(start), 0));

    loop {
        let next_child = {
            let Some((ix, deps, cursor)) = stack.last_mut() else {
                break;
            };
            match deps.get(*cursor) {
                Some(&child) => {
                    *cursor += 1;
                    Some(child)
                }
                None => {
                    state[ix.0 as usize] = VisitState::Done;
                    order.push(*ix);
                    None
                }
            }
        };
        match next_child {
            Some(child) => {
                if state[child.0 as usize] == VisitState::Unvisited {
                    state[child.0 as usize] = VisitState::Active;
                    let child_deps = graph.dep_handles(child);
                    stack.push((child, child_deps, 0));
                }
            }
            None => {
                stack.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_graph::test_util::graph_of;

    fn ordered_paths(graph: &ModuleGraph) -> Vec<String> {
        post_order(graph)
            .into_iter()
            .map(|ix| graph.module(ix).path.clone())
            .collect()
    }

    #[test]
    fn chain_serializes_leaf_first() {
        let graph = graph_of(&[
            ("/entry", &["/a"]),
            ("/a", &["/b"]),
            ("/b", &["/c"]),
            ("/c", &[]),
        ]);
        assert_eq!(ordered_paths(&graph), ["/c", "/b", "/a", "/entry"]);
    }

    #[test]
    fn deps_precede_dependants() {
        let graph = graph_of(&[
            ("/entry", &["/a", "/b"]),
            ("/a", &["/shared"]),
            ("/b", &["/shared"]),
            ("/shared", &[]),
        ]);
        let order = ordered_paths(&graph);
        let pos = |p: &str| order.iter().position(|x| x == p).unwrap();
        for (module, dep) in [
            ("/entry", "/a"),
            ("/entry", "/b"),
            ("/a", "/shared"),
            ("/b", "/shared"),
        ] {
            assert!(pos(dep) < pos(module), "{dep} must precede {module}");
        }
    }

    #[test]
    fn cycles_do_not_loop() {
        let graph = graph_of(&[("/entry", &["/a"]), ("/a", &["/b"]), ("/b", &["/a"])]);
        let order = ordered_paths(&graph);
        assert_eq!(order.len(), 3);
        // the entry still comes last
        assert_eq!(order.last().map(String::as_str), Some("/entry"));
    }

    #[test]
    fn unreachable_modules_are_appended_path_sorted() {
        let graph = graph_of(&[
            ("/entry", &[]),
            ("/z-orphan", &[]),
            ("/a-orphan", &[]),
        ]);
        assert_eq!(
            ordered_paths(&graph),
            ["/entry", "/a-orphan", "/z-orphan"]
        );
    }
}
