// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic debugger collaborators for testing.
//!
//! This crate scripts every seam framelist consumes — threads, raw
//! unwinding, symbols, call graphs, stop reasons, recognizers — so tests can
//! stand up a whole stopped-thread world from a handful of addresses. It
//! exists primarily as an internal dev-dependency of framelist, but is
//! published for the sake of satisfying cargo-publish.
//!
//! Basic usage is to build a [`SynthUnwinder`] with one `frame` call per
//! concrete frame, describe functions and inline scopes on a
//! [`SynthSymbols`], wire call edges into a [`SynthCallGraph`], and hand the
//! pieces to `StackFrameList::new` via `FrameSources`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use framelist::{
    CallEdge, CallGraphSource, CallSiteKind, FunctionId, InlineScope, LineEntry, RawFrame,
    RecognizerSource, RegisterContext, ScopeId, StackFrame, StackFrameList, StopReason,
    SuggestedFrameIndex, SymbolSource, ThreadContext, UnwindSource,
};
use range_map::{Range, RangeMap};

/// A scripted thread: validity, live registers, a stop reason, and a capture
/// slot for the process-wide default source location.
pub struct SynthThread {
    valid: bool,
    regs: Mutex<Option<Arc<RegisterContext>>>,
    stop_reason: Mutex<Option<Arc<dyn StopReason>>>,
    selected: bool,
    default_source: Mutex<Option<LineEntry>>,
}

impl SynthThread {
    pub fn new(pc: u64, sp: u64) -> SynthThread {
        SynthThread {
            valid: true,
            regs: Mutex::new(Some(Arc::new(RegisterContext::new(pc, sp)))),
            stop_reason: Mutex::new(None),
            selected: false,
            default_source: Mutex::new(None),
        }
    }

    /// A thread that has gone away; fetching its frames yields nothing.
    pub fn invalid() -> SynthThread {
        SynthThread {
            valid: false,
            regs: Mutex::new(None),
            stop_reason: Mutex::new(None),
            selected: false,
            default_source: Mutex::new(None),
        }
    }

    /// Mark this thread as the process's selected thread.
    pub fn selected(mut self) -> SynthThread {
        self.selected = true;
        self
    }

    pub fn with_stop_reason(self, stop_reason: Arc<dyn StopReason>) -> SynthThread {
        *self.stop_reason.lock().unwrap() = Some(stop_reason);
        self
    }

    /// Move the live pc, as resuming and stopping again would.
    pub fn set_pc(&self, pc: u64) {
        let mut regs = self.regs.lock().unwrap();
        let sp = regs.as_ref().map(|r| r.sp()).unwrap_or(0);
        *regs = Some(Arc::new(RegisterContext::new(pc, sp)));
    }

    /// The last default source location pushed by frame selection.
    pub fn default_source(&self) -> Option<LineEntry> {
        self.default_source.lock().unwrap().clone()
    }
}

impl ThreadContext for SynthThread {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn register_context(&self) -> Option<Arc<RegisterContext>> {
        self.regs.lock().unwrap().clone()
    }

    fn stop_reason(&self) -> Option<Arc<dyn StopReason>> {
        self.stop_reason.lock().unwrap().clone()
    }

    fn is_selected_thread(&self) -> bool {
        self.selected
    }

    fn set_default_file_and_line(&self, line_entry: &LineEntry) {
        *self.default_source.lock().unwrap() = Some(line_entry.clone());
    }
}

/// A scripted unwind source: a fixed list of raw frames, with matching
/// recovered register contexts, and a switch to make frame 0 unavailable so
/// the store's live-register fallback can be exercised.
#[derive(Default)]
pub struct SynthUnwinder {
    frames: Vec<RawFrame>,
    reg_contexts: Vec<Option<Arc<RegisterContext>>>,
    fail_frame_zero: bool,
}

impl SynthUnwinder {
    pub fn new() -> SynthUnwinder {
        Default::default()
    }

    /// Append a concrete frame. The first frame behaves like a zeroth frame;
    /// the others are stopped at return addresses.
    pub fn frame(mut self, cfa: u64, pc: u64) -> SynthUnwinder {
        let behaves_like_zeroth = self.frames.is_empty();
        self.frames.push(RawFrame {
            cfa,
            pc,
            behaves_like_zeroth,
        });
        self.reg_contexts
            .push(Some(Arc::new(RegisterContext::new(pc, cfa))));
        self
    }

    /// Make `raw_frame(0)` fail, as an unwinder with no usable frame-0 plan
    /// would.
    pub fn without_frame_zero_info(mut self) -> SynthUnwinder {
        self.fail_frame_zero = true;
        self
    }
}

impl UnwindSource for SynthUnwinder {
    fn raw_frame(&self, idx: u32) -> Option<RawFrame> {
        if idx == 0 && self.fail_frame_zero {
            return None;
        }
        self.frames.get(idx as usize).copied()
    }

    fn count_available(&self, up_to: u32) -> u32 {
        let limit = up_to.saturating_add(1) as usize;
        self.frames.len().min(limit) as u32
    }

    fn register_context(&self, idx: u32) -> Option<Arc<RegisterContext>> {
        self.reg_contexts.get(idx as usize).cloned().flatten()
    }
}

struct SynthFunction {
    name: String,
    range: Range<u64>,
    scope: ScopeId,
}

/// A synthetic symbol table: functions over address ranges, inline-scope
/// chains keyed by code address, and line entries.
pub struct SynthSymbols {
    functions: Vec<SynthFunction>,
    functions_by_addr: RangeMap<u64, usize>,
    inline_scopes: HashMap<u64, InlineScope>,
    lines: HashMap<u64, LineEntry>,
    next_scope: u64,
}

impl SynthSymbols {
    pub fn new() -> SynthSymbols {
        SynthSymbols {
            functions: Vec::new(),
            functions_by_addr: RangeMap::new(),
            inline_scopes: HashMap::new(),
            lines: HashMap::new(),
            next_scope: 1,
        }
    }

    /// Define a function covering `size` bytes from `base`.
    pub fn add_function(&mut self, name: &str, base: u64, size: u64) -> FunctionId {
        let scope = self.fresh_scope();
        self.functions.push(SynthFunction {
            name: name.to_string(),
            range: Range::new(base, base + size - 1),
            scope,
        });
        self.rebuild_map();
        FunctionId(self.functions.len() as u64 - 1)
    }

    /// Script the parent inlined scope at `address`: expanding there peels
    /// one inline frame and resumes at `resume_address`. Chain entries by
    /// registering the next one at `resume_address`.
    pub fn add_inline_scope(&mut self, address: u64, resume_address: u64) -> ScopeId {
        let scope = self.fresh_scope();
        self.inline_scopes.insert(
            address,
            InlineScope {
                scope,
                resume_address,
            },
        );
        scope
    }

    pub fn add_line_entry(&mut self, address: u64, file: &str, line: u32) {
        self.lines.insert(
            address,
            LineEntry {
                file: file.to_string(),
                line,
            },
        );
    }

    fn fresh_scope(&mut self) -> ScopeId {
        let scope = ScopeId(self.next_scope);
        self.next_scope += 1;
        scope
    }

    fn rebuild_map(&mut self) {
        let mut ranges: Vec<(Range<u64>, usize)> = self
            .functions
            .iter()
            .enumerate()
            .map(|(idx, function)| (function.range, idx))
            .collect();
        ranges.sort_by_key(|&(range, _idx)| range);
        self.functions_by_addr = ranges.into_iter().collect();
    }
}

impl Default for SynthSymbols {
    fn default() -> Self {
        SynthSymbols::new()
    }
}

impl SymbolSource for SynthSymbols {
    fn function_at(&self, address: u64) -> Option<FunctionId> {
        self.functions_by_addr
            .get(address)
            .map(|&idx| FunctionId(idx as u64))
    }

    fn scope_at(&self, address: u64) -> Option<ScopeId> {
        self.functions_by_addr
            .get(address)
            .map(|&idx| self.functions[idx].scope)
    }

    fn parent_inline_scope(&self, address: u64) -> Option<InlineScope> {
        self.inline_scopes.get(&address).copied()
    }

    fn line_entry(&self, address: u64) -> Option<LineEntry> {
        self.lines.get(&address).cloned()
    }

    fn function_name(&self, function: FunctionId) -> Option<String> {
        self.functions
            .get(function.0 as usize)
            .map(|f| f.name.clone())
    }
}

/// A synthetic lazy call graph: regular and tail-calling edges per function.
#[derive(Default)]
pub struct SynthCallGraph {
    calls: HashMap<FunctionId, Vec<CallEdge>>,
    tail_calls: HashMap<FunctionId, Vec<CallEdge>>,
}

impl SynthCallGraph {
    pub fn new() -> SynthCallGraph {
        Default::default()
    }

    /// A non-tail call from `caller` whose return address is
    /// `return_address`.
    pub fn add_call(&mut self, caller: FunctionId, callee: Option<FunctionId>, return_address: u64) {
        self.calls.entry(caller).or_default().push(CallEdge {
            callee,
            return_address: Some(return_address),
            call_site: return_address.saturating_sub(4),
            site_kind: CallSiteKind::AfterCall,
        });
    }

    /// A tail call from `caller` made at `call_site`.
    pub fn add_tail_call(
        &mut self,
        caller: FunctionId,
        callee: Option<FunctionId>,
        call_site: u64,
        site_kind: CallSiteKind,
    ) {
        self.tail_calls.entry(caller).or_default().push(CallEdge {
            callee,
            return_address: None,
            call_site,
            site_kind,
        });
    }
}

impl CallGraphSource for SynthCallGraph {
    fn call_edges(&self, function: FunctionId) -> Vec<CallEdge> {
        self.calls.get(&function).cloned().unwrap_or_default()
    }

    fn tail_call_edges(&self, function: FunctionId) -> Vec<CallEdge> {
        self.tail_calls.get(&function).cloned().unwrap_or_default()
    }
}

/// A stop reason scripting one fixed suggestion.
pub struct SuggestedStop(pub SuggestedFrameIndex);

impl StopReason for SuggestedStop {
    fn suggested_frame_index(&self) -> Option<SuggestedFrameIndex> {
        Some(self.0)
    }
}

/// A recognizer that always nominates the frame at a fixed visible index.
pub struct NominateFrame(pub u32);

impl RecognizerSource for NominateFrame {
    fn most_relevant_frame(
        &self,
        _frame: &Arc<StackFrame>,
        list: &StackFrameList,
    ) -> Option<Arc<StackFrame>> {
        list.frame_at_index(self.0)
    }
}
