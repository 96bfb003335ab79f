//! This module defines the seams between the frame store and the rest of the
//! debugger.
//!
//! framelist deliberately owns none of the machinery that produces raw unwind
//! results, symbols, or call graphs; each of those concerns is reached
//! through a trait here:
//!
//! * [UnwindSource][] - register-level unwinding, one raw (cfa, pc) result
//!   per concrete frame, plus a bulk count for concrete-only fetches.
//! * [SymbolSource][] - address-to-function and address-to-scope resolution,
//!   inline-scope expansion, and source lines.
//! * [CallGraphSource][] - the lazy call graph the tail-call synthesizer
//!   searches.
//! * [StopReason][] - why the thread stopped, as far as frame selection and
//!   inlined depth care: an optional suggested frame index.
//! * [RecognizerSource][] - frame recognizers that can nominate a more
//!   relevant frame than frame 0.
//! * [ThreadContext][] - the owning thread: validity, live registers, stop
//!   reason, and the process-wide default source location hook.
//!
//! All of them may block for as long as they like (an unwinder typically
//! reads the inferior's memory); cancellation is handled cooperatively by
//! the store, never by the sources.

use std::sync::Arc;

use crate::frame::{LineEntry, RegisterContext, StackFrame};
use crate::list::StackFrameList;

/// Identifies a resolved function for call-graph searches and frame
/// symbolication. Ids are stable for the lifetime of a stop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u64);

/// Identifies a symbol scope: a function body, or one inlined call site
/// block within it. Scopes are part of a frame's stack identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

/// One raw unwind step.
#[derive(Copy, Clone, Debug)]
pub struct RawFrame {
    pub cfa: u64,
    pub pc: u64,
    /// The pc points at a call target rather than a return address, so
    /// symbolication must not decrement it.
    pub behaves_like_zeroth: bool,
}

/// Produces raw per-concrete-frame unwind results for the stopped thread.
pub trait UnwindSource: Send + Sync {
    /// The raw unwind result for concrete frame `idx`, or `None` at
    /// end-of-stack.
    fn raw_frame(&self, idx: u32) -> Option<RawFrame>;

    /// Bulk hint: the number of concrete frames available, counting no
    /// further than `up_to + 1`. A result smaller than `up_to + 1` means the
    /// end of the stack was reached.
    fn count_available(&self, up_to: u32) -> u32;

    /// The recovered register state for concrete frame `idx`, if the
    /// unwinder can produce one.
    fn register_context(&self, _idx: u32) -> Option<Arc<RegisterContext>> {
        None
    }
}

/// An inlined call scope yielded while walking outward from a code address.
#[derive(Copy, Clone, Debug)]
pub struct InlineScope {
    pub scope: ScopeId,
    /// Where execution resumes in the parent once the inlined body is
    /// peeled off.
    pub resume_address: u64,
}

/// Symbol lookups consumed by frame construction, the tail-call synthesizer,
/// and status rendering.
pub trait SymbolSource: Send + Sync {
    /// The function whose body contains `address`.
    fn function_at(&self, address: u64) -> Option<FunctionId>;

    /// The symbol scope at `address`, used for stack identity.
    fn scope_at(&self, address: u64) -> Option<ScopeId>;

    /// The parent inlined scope of the code at `address`. Callable
    /// repeatedly: feeding the returned resume address back in walks one
    /// more inline level outward, until `None`.
    fn parent_inline_scope(&self, address: u64) -> Option<InlineScope>;

    /// The source location of `address`.
    fn line_entry(&self, address: u64) -> Option<LineEntry>;

    /// A display name for `function`, for logs and backtrace output.
    fn function_name(&self, _function: FunctionId) -> Option<String> {
        None
    }
}

/// Whether an edge address points at the call instruction itself or at the
/// instruction after it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallSiteKind {
    /// The address of the call instruction. No symbolication decrement is
    /// needed.
    Call,
    /// The address control returns to, one past the call.
    AfterCall,
}

/// One call edge out of a function.
#[derive(Clone, Debug)]
pub struct CallEdge {
    /// The called function. Resolution may fail.
    pub callee: Option<FunctionId>,
    /// The pc control returns to. `None` for tail calls, which never
    /// return to their caller.
    pub return_address: Option<u64>,
    /// The address of the call inside the calling function.
    pub call_site: u64,
    pub site_kind: CallSiteKind,
}

/// Yields the call edges of a function, for tail-call frame synthesis.
pub trait CallGraphSource: Send + Sync {
    /// Every non-tail call edge out of `function`.
    fn call_edges(&self, function: FunctionId) -> Vec<CallEdge>;

    /// Every tail-calling edge out of `function`.
    fn tail_call_edges(&self, function: FunctionId) -> Vec<CallEdge>;

    /// The non-tail edge out of `function` that returns to `return_pc`.
    fn edge_for_return_address(&self, function: FunctionId, return_pc: u64) -> Option<CallEdge> {
        self.call_edges(function)
            .into_iter()
            .find(|edge| edge.return_address == Some(return_pc))
    }
}

/// A frame index suggested by the stop reason.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SuggestedFrameIndex {
    pub index: u32,
    /// True when the index is expressed in inline-aware units. Such
    /// suggestions feed the current inlined depth; the others feed frame
    /// selection.
    pub accounts_for_inlining: bool,
}

/// The stop-reason collaborator, reduced to what frame bookkeeping needs.
pub trait StopReason: Send + Sync {
    fn suggested_frame_index(&self) -> Option<SuggestedFrameIndex>;
}

/// Frame recognizers, consulted for frame 0 only.
pub trait RecognizerSource: Send + Sync {
    /// Nominate a frame more relevant to the user than `frame`. May re-enter
    /// `list` (the store never holds a lock while calling this).
    fn most_relevant_frame(
        &self,
        frame: &Arc<StackFrame>,
        list: &StackFrameList,
    ) -> Option<Arc<StackFrame>>;
}

/// The thread a frame list belongs to.
pub trait ThreadContext: Send + Sync {
    fn is_valid(&self) -> bool;

    /// The live register context of the stopped thread.
    fn register_context(&self) -> Option<Arc<RegisterContext>>;

    /// The thread's live pc, compared against recorded state to detect that
    /// the thread has run.
    fn pc(&self) -> Option<u64> {
        self.register_context().map(|regs| regs.pc())
    }

    fn stop_reason(&self) -> Option<Arc<dyn StopReason>>;

    /// Whether this thread is the process's currently selected thread.
    fn is_selected_thread(&self) -> bool {
        false
    }

    /// Record the process-wide default source location. Called when the
    /// selected frame of the selected thread changes.
    fn set_default_file_and_line(&self, _line_entry: &LineEntry) {}
}
