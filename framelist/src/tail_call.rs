// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Reconstruction of call chains elided by tail calls.
//!
//! A tail call reuses its caller's frame, so the unwinder never sees the
//! caller. When the function a frame returns into could only have been
//! reached through one sequence of tail calls, that sequence is recovered
//! here and the store inserts one artificial frame per elided call. An
//! ambiguous graph yields nothing: a shallower backtrace beats a wrong one.

use std::collections::HashSet;

use tracing::trace;

use crate::sources::{CallGraphSource, CallSiteKind, FunctionId, SymbolSource};

/// One step of a reconstructed call sequence: a function on the path and the
/// address of the tail call it makes toward the next step.
#[derive(Clone, Debug)]
pub(crate) struct CallPathNode {
    pub function: FunctionId,
    pub site_kind: CallSiteKind,
    pub address: u64,
}

/// Find the unique path through the call graph from `begin` (with return pc
/// `return_pc`) to `end`. Returns the path ordered from `begin`'s side, or
/// nothing if there is no path or more than one way the machine could have
/// gotten there.
pub(crate) fn find_intervening_frames(
    begin: FunctionId,
    end: FunctionId,
    return_pc: u64,
    call_graph: &dyn CallGraphSource,
    symbols: &dyn SymbolSource,
) -> Vec<CallPathNode> {
    trace!(
        "finding frames between {} and {}, retn-pc={:#x}",
        display_name(symbols, begin),
        display_name(symbols, end),
        return_pc
    );

    // Find a non-tail calling edge with the correct return pc.
    let first_edge = match call_graph.edge_for_return_address(begin, return_pc) {
        Some(edge) => edge,
        None => {
            trace!(
                "no call edge outgoing from {} with retn-pc == {:#x}",
                display_name(symbols, begin),
                return_pc
            );
            return Vec::new();
        }
    };

    // The first callee may not be resolved, or there may be nothing to fill
    // in.
    let first_callee = match first_edge.callee {
        Some(callee) => callee,
        None => {
            trace!("could not resolve callee");
            return Vec::new();
        }
    };
    if first_callee == end {
        trace!(
            "not searching further, first callee is {} (retn-pc: {:#x})",
            display_name(symbols, end),
            return_pc
        );
        return Vec::new();
    }

    // Run a DFS on the tail-calling edges out of the first callee to find
    // `end`. Fully explore the set of functions reachable from the first
    // edge via tail calls in order to detect ambiguous executions.
    let mut dfs = Dfs {
        end,
        call_graph,
        active_path: Vec::new(),
        solution_path: Vec::new(),
        visited: HashSet::new(),
        ambiguous: false,
    };
    dfs.dfs(first_callee);
    if dfs.ambiguous {
        Vec::new()
    } else {
        dfs.solution_path
    }
}

fn display_name(symbols: &dyn SymbolSource, function: FunctionId) -> String {
    symbols
        .function_name(function)
        .unwrap_or_else(|| format!("{:?}", function))
}

struct Dfs<'a> {
    end: FunctionId,
    call_graph: &'a dyn CallGraphSource,
    active_path: Vec<CallPathNode>,
    solution_path: Vec<CallPathNode>,
    visited: HashSet<FunctionId>,
    ambiguous: bool,
}

impl Dfs<'_> {
    fn dfs(&mut self, callee: FunctionId) {
        // Found a path to the target function.
        if callee == self.end {
            if self.solution_path.is_empty() {
                self.solution_path = self.active_path.clone();
            } else {
                self.ambiguous = true;
            }
            return;
        }

        // Terminate the search if tail recursion is found, or more generally
        // if there's more than one way to reach a target. This errs on the
        // side of caution: it conservatively stops searching when some
        // solutions are still possible to save time in the average case.
        if !self.visited.insert(callee) {
            self.ambiguous = true;
            return;
        }

        // Search the calls made from this callee.
        self.active_path.push(CallPathNode {
            function: callee,
            site_kind: CallSiteKind::Call,
            address: u64::MAX,
        });
        for edge in self.call_graph.tail_call_edges(callee) {
            let next_callee = match edge.callee {
                Some(function) => function,
                None => continue,
            };

            if let Some(node) = self.active_path.last_mut() {
                node.site_kind = edge.site_kind;
                node.address = edge.call_site;
            }

            self.dfs(next_callee);
            if self.ambiguous {
                return;
            }
        }
        self.active_path.pop();
    }
}
