// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::collections::HashMap;

use crate::frame::LineEntry;
use crate::sources::{
    CallEdge, CallGraphSource, CallSiteKind, FunctionId, InlineScope, ScopeId, SymbolSource,
};
use crate::tail_call::find_intervening_frames;

struct TestFixture {
    calls: HashMap<FunctionId, Vec<CallEdge>>,
    tail_calls: HashMap<FunctionId, Vec<CallEdge>>,
}

impl TestFixture {
    fn new() -> TestFixture {
        TestFixture {
            calls: HashMap::new(),
            tail_calls: HashMap::new(),
        }
    }

    fn call(&mut self, caller: FunctionId, callee: Option<FunctionId>, return_address: u64) {
        self.calls.entry(caller).or_default().push(CallEdge {
            callee,
            return_address: Some(return_address),
            call_site: return_address - 4,
            site_kind: CallSiteKind::AfterCall,
        });
    }

    fn tail_call(&mut self, caller: FunctionId, callee: Option<FunctionId>, call_site: u64) {
        self.tail_calls.entry(caller).or_default().push(CallEdge {
            callee,
            return_address: None,
            call_site,
            site_kind: CallSiteKind::Call,
        });
    }
}

impl CallGraphSource for TestFixture {
    fn call_edges(&self, function: FunctionId) -> Vec<CallEdge> {
        self.calls.get(&function).cloned().unwrap_or_default()
    }

    fn tail_call_edges(&self, function: FunctionId) -> Vec<CallEdge> {
        self.tail_calls.get(&function).cloned().unwrap_or_default()
    }
}

struct NoSymbols;

impl SymbolSource for NoSymbols {
    fn function_at(&self, _address: u64) -> Option<FunctionId> {
        None
    }
    fn scope_at(&self, _address: u64) -> Option<ScopeId> {
        None
    }
    fn parent_inline_scope(&self, _address: u64) -> Option<InlineScope> {
        None
    }
    fn line_entry(&self, _address: u64) -> Option<LineEntry> {
        None
    }
}

const A: FunctionId = FunctionId(0);
const B: FunctionId = FunctionId(1);
const C: FunctionId = FunctionId(2);
const D: FunctionId = FunctionId(3);
const E: FunctionId = FunctionId(4);

const RETURN_PC: u64 = 0x3020;

#[test]
fn test_single_elided_call() {
    // a calls b, which tail-calls c. Walking up from c into a must
    // reconstruct exactly [b].
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC);
    f.tail_call(B, Some(C), 0x2040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].function, B);
    assert_eq!(path[0].address, 0x2040);
    assert_eq!(path[0].site_kind, CallSiteKind::Call);
}

#[test]
fn test_two_elided_calls_in_call_order() {
    // a calls b, b tail-calls d, d tail-calls c. The path runs from the
    // first callee toward the target; the caller reverses it when pushing
    // frames.
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC);
    f.tail_call(B, Some(D), 0x2040);
    f.tail_call(D, Some(C), 0x4040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].function, B);
    assert_eq!(path[0].address, 0x2040);
    assert_eq!(path[1].function, D);
    assert_eq!(path[1].address, 0x4040);
}

#[test]
fn test_first_callee_is_target() {
    // Nothing was elided: the call out of a lands directly in c.
    let mut f = TestFixture::new();
    f.call(A, Some(C), RETURN_PC);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert!(path.is_empty());
}

#[test]
fn test_no_edge_for_return_pc() {
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC + 0x100);
    f.tail_call(B, Some(C), 0x2040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert!(path.is_empty());
}

#[test]
fn test_unresolved_first_callee() {
    let mut f = TestFixture::new();
    f.call(A, None, RETURN_PC);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert!(path.is_empty());
}

#[test]
fn test_unresolved_tail_callee_is_skipped() {
    // An unresolvable tail edge is ignored, it doesn't poison the rest of
    // the search.
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC);
    f.tail_call(B, None, 0x2020);
    f.tail_call(B, Some(C), 0x2040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].function, B);
    assert_eq!(path[0].address, 0x2040);
}

#[test]
fn test_two_paths_are_ambiguous() {
    // b and d both lead to c: refuse to guess.
    let mut f = TestFixture::new();
    f.call(A, Some(E), RETURN_PC);
    f.tail_call(E, Some(B), 0x5010);
    f.tail_call(E, Some(D), 0x5020);
    f.tail_call(B, Some(C), 0x2040);
    f.tail_call(D, Some(C), 0x4040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert!(path.is_empty());
}

#[test]
fn test_tail_recursion_is_ambiguous() {
    // b tail-calls itself; any number of b frames could have been elided.
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC);
    f.tail_call(B, Some(B), 0x2020);
    f.tail_call(B, Some(C), 0x2040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert!(path.is_empty());
}

#[test]
fn test_dead_end_branch_does_not_mark_ambiguous() {
    // b's first tail call leads to a dead end (e makes no calls); the search
    // must back out of it and still accept the unique path through d.
    let mut f = TestFixture::new();
    f.call(A, Some(B), RETURN_PC);
    f.tail_call(B, Some(E), 0x2020);
    f.tail_call(B, Some(D), 0x2040);
    f.tail_call(D, Some(C), 0x4040);

    let path = find_intervening_frames(A, C, RETURN_PC, &f, &NoSymbols);
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].function, B);
    assert_eq!(path[0].address, 0x2040);
    assert_eq!(path[1].function, D);
    assert_eq!(path[1].address, 0x4040);
}
