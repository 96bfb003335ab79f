// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Stack frame objects and their cross-stop identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sources::ScopeId;

/// The register state of a concrete frame.
///
/// Frame 0 borrows the thread's live context; deeper frames get contexts
/// recovered by the unwind source. An inline frame shares the context of the
/// concrete frame it was expanded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterContext {
    pc: u64,
    sp: u64,
}

impl RegisterContext {
    pub fn new(pc: u64, sp: u64) -> RegisterContext {
        RegisterContext { pc, sp }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }
}

/// A resolved source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineEntry {
    pub file: String,
    pub line: u32,
}

/// How a frame came to be in the list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// A frame produced by a raw unwind step, or expanded from one.
    Regular,
    /// The innermost frame, built from the thread's live register context.
    RegularZeroth,
    /// A frame synthesized to stand in for a tail call the unwinder can't
    /// see.
    Artificial,
}

/// The stack identity of a frame: its canonical frame address plus the
/// symbol scope it is stopped in.
///
/// Two frames with equal stack ids across consecutive stops are "the same"
/// frame for merging purposes, even if their pc or register values moved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackId {
    pub cfa: Option<u64>,
    pub scope: Option<ScopeId>,
}

impl StackId {
    pub fn is_valid(&self) -> bool {
        self.cfa.is_some() || self.scope.is_some()
    }
}

/// The fields of a frame that legitimately change when the frame object is
/// carried over from the previous stop's list.
#[derive(Debug)]
struct FrameState {
    frame_index: u32,
    concrete_frame_index: u32,
    pc: u64,
    reg_context: Option<Arc<RegisterContext>>,
}

/// One materialized stack frame.
///
/// Frames are owned by their [`StackFrameList`][crate::StackFrameList] and
/// handed out as `Arc` handles, so the cross-stop merge can re-home an object
/// into the next stop's list without invalidating existing holders. Any
/// handle that outlives `clear()` must re-resolve through the list rather
/// than assume it is still current.
#[derive(Debug)]
pub struct StackFrame {
    kind: FrameKind,
    /// The pc is a call-target style address; symbolication must not
    /// decrement it.
    behaves_like_zeroth_frame: bool,
    /// Canonical frame address. `None` when no CFA could be determined, as
    /// for synthetic tail-call frames.
    cfa: Option<u64>,
    scope: Option<ScopeId>,
    inlined: bool,
    hidden: AtomicBool,
    state: Mutex<FrameState>,
}

fn lock_state(state: &Mutex<FrameState>) -> MutexGuard<FrameState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StackFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: FrameKind,
        frame_index: u32,
        concrete_frame_index: u32,
        cfa: Option<u64>,
        pc: u64,
        behaves_like_zeroth_frame: bool,
        reg_context: Option<Arc<RegisterContext>>,
        scope: Option<ScopeId>,
    ) -> StackFrame {
        StackFrame {
            kind,
            behaves_like_zeroth_frame,
            cfa,
            scope,
            inlined: false,
            hidden: AtomicBool::new(false),
            state: Mutex::new(FrameState {
                frame_index,
                concrete_frame_index,
                pc,
                reg_context,
            }),
        }
    }

    pub(crate) fn new_inlined(
        frame_index: u32,
        concrete_frame_index: u32,
        cfa: Option<u64>,
        pc: u64,
        reg_context: Option<Arc<RegisterContext>>,
        scope: ScopeId,
    ) -> StackFrame {
        let mut frame = StackFrame::new(
            FrameKind::Regular,
            frame_index,
            concrete_frame_index,
            cfa,
            pc,
            false,
            reg_context,
            Some(scope),
        );
        frame.inlined = true;
        frame
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_artificial(&self) -> bool {
        self.kind == FrameKind::Artificial
    }

    /// True for frames inserted by inline expansion.
    pub fn is_inlined(&self) -> bool {
        self.inlined
    }

    pub fn behaves_like_zeroth_frame(&self) -> bool {
        self.behaves_like_zeroth_frame
    }

    /// The frame's position in its list, innermost frame first.
    pub fn frame_index(&self) -> u32 {
        lock_state(&self.state).frame_index
    }

    /// Which raw unwind step produced this frame. Shared by every inline
    /// frame expanded from the same concrete frame, and by a synthetic frame
    /// with the concrete frame below it.
    pub fn concrete_frame_index(&self) -> u32 {
        lock_state(&self.state).concrete_frame_index
    }

    pub fn frame_code_address(&self) -> u64 {
        lock_state(&self.state).pc
    }

    pub fn cfa(&self) -> Option<u64> {
        self.cfa
    }

    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    pub fn register_context(&self) -> Option<Arc<RegisterContext>> {
        lock_state(&self.state).reg_context.clone()
    }

    pub fn stack_id(&self) -> StackId {
        StackId {
            cfa: self.cfa,
            scope: self.scope,
        }
    }

    /// The address symbol lookups should use for this frame. For a frame
    /// stopped at a return address the pc points one past the call, so it is
    /// backed up by one to land inside the calling line.
    pub fn code_address_for_symbolication(&self) -> u64 {
        let pc = self.frame_code_address();
        if self.behaves_like_zeroth_frame {
            pc
        } else {
            pc.saturating_sub(1)
        }
    }

    /// Whether a recognizer marked this frame uninteresting for display.
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    /// Refresh the fields that legitimately change between stops from the
    /// frame occupying the same position in the new list. The caller has
    /// already checked that the stack ids match.
    pub(crate) fn update_from_current(&self, curr_frame: &StackFrame) {
        debug_assert_eq!(self.stack_id(), curr_frame.stack_id());
        let (frame_index, concrete_frame_index, pc, reg_context) = {
            let curr = lock_state(&curr_frame.state);
            (
                curr.frame_index,
                curr.concrete_frame_index,
                curr.pc,
                curr.reg_context.clone(),
            )
        };
        let mut state = lock_state(&self.state);
        state.frame_index = frame_index;
        state.concrete_frame_index = concrete_frame_index;
        state.pc = pc;
        state.reg_context = reg_context;
    }
}
