// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The frame store: an incrementally built, lockable list of stack frames
//! for one stop of one thread.
//!
//! A [`StackFrameList`] is created when the thread stops and thrown away
//! when it resumes; it only ever grows while it lives. Growth is performed
//! by whichever caller first needs unfetched frames, serialized by the
//! list's writer lock, while any number of readers look up already
//! materialized frames under the shared side. Once the whole stack has been
//! fetched, frame objects whose stack identity survived from the previous
//! stop are spliced in so that callers holding on to them keep seeing the
//! same objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::trace;

use crate::frame::{FrameKind, StackFrame, StackId};
use crate::sources::{
    CallGraphSource, CallSiteKind, RawFrame, RecognizerSource, SymbolSource, ThreadContext,
    UnwindSource,
};
use crate::tail_call;

/// A cloneable cancellation handle shared between the debugger's command
/// machinery and frame fetching. Setting it makes interruptible fetches stop
/// at the next concrete frame boundary.
#[derive(Clone, Debug, Default)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken {
    pub fn new() -> InterruptToken {
        Default::default()
    }

    /// Request cancellation of in-progress frame fetching.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Rearm the token so fetching can be re-issued.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn interrupt_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether a fetch is allowed to honor the interrupt token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptionControl {
    AllowInterruption,
    DoNotAllowInterruption,
}

/// Frame fetching was cancelled through the interrupt token before reaching
/// the requested index.
///
/// This is never conflated with running off the end of the stack: the list
/// keeps every frame fetched so far, "fully fetched" stays unset, and the
/// caller simply re-issues the request. Nothing resumes a cancelled fetch on
/// its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("stack frame fetching was interrupted")]
pub struct Interrupted;

/// The collaborators a [`StackFrameList`] pulls frames out of.
#[derive(Clone)]
pub struct FrameSources {
    pub unwinder: Arc<dyn UnwindSource>,
    pub symbols: Arc<dyn SymbolSource>,
    pub call_graph: Arc<dyn CallGraphSource>,
    pub recognizers: Option<Arc<dyn RecognizerSource>>,
}

/// Options for [`StackFrameList::write_status`].
#[derive(Clone, Copy, Debug)]
pub struct StatusOptions<'a> {
    /// First visible frame index to show.
    pub first_frame: u32,
    /// Number of frames to show, `u32::MAX` for all of them.
    pub num_frames: u32,
    /// Include symbol names and source locations.
    pub show_frame_info: bool,
    /// Show frames recognizers have marked hidden.
    pub show_hidden: bool,
    /// Marker prepended to the selected frame's row; other rows get padded
    /// by the marker's width.
    pub selected_frame_marker: Option<&'a str>,
}

impl Default for StatusOptions<'_> {
    fn default() -> Self {
        StatusOptions {
            first_frame: 0,
            num_frames: u32::MAX,
            show_frame_info: true,
            show_hidden: false,
            selected_frame_marker: None,
        }
    }
}

struct FrameData {
    /// Innermost frame first. Slots are `None` for frames that were counted
    /// in concrete-only mode but not materialized yet.
    frames: Vec<Option<Arc<StackFrame>>>,
    /// The next concrete unwind index to fetch; `u32::MAX` once the unwind
    /// source reported end-of-stack.
    concrete_frames_fetched: u32,
    /// The previous stop's list, consumed by the cross-stop merge.
    prev_frames: Option<Arc<StackFrameList>>,
}

impl FrameData {
    fn all_frames_fetched(&self) -> bool {
        self.concrete_frames_fetched == u32::MAX
    }

    fn set_all_frames_fetched(&mut self) {
        self.concrete_frames_fetched = u32::MAX;
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct InlinedDepth {
    depth: Option<u32>,
    /// The live pc the depth was computed at; a different live pc
    /// invalidates the depth.
    pc: Option<u64>,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn symbolication_address(raw: &RawFrame) -> u64 {
    if raw.behaves_like_zeroth {
        raw.pc
    } else {
        raw.pc.saturating_sub(1)
    }
}

/// The ordered call stack of one stopped thread.
pub struct StackFrameList {
    thread: Arc<dyn ThreadContext>,
    unwinder: Arc<dyn UnwindSource>,
    symbols: Arc<dyn SymbolSource>,
    call_graph: Arc<dyn CallGraphSource>,
    recognizers: Option<Arc<dyn RecognizerSource>>,
    interrupt: InterruptToken,
    show_inlined_frames: bool,
    inner: RwLock<FrameData>,
    selected_frame_idx: Mutex<Option<u32>>,
    inlined_depth: Mutex<InlinedDepth>,
}

impl StackFrameList {
    /// Create the frame store for a new stop. When `prev_frames` carries the
    /// previous stop's store, its frames are spliced into this one as soon
    /// as this one is fully fetched, and its inlined-depth state is
    /// inherited until the live pc invalidates it.
    pub fn new(
        thread: Arc<dyn ThreadContext>,
        sources: FrameSources,
        prev_frames: Option<Arc<StackFrameList>>,
        show_inlined_frames: bool,
        interrupt: InterruptToken,
    ) -> StackFrameList {
        let inherited_depth = prev_frames
            .as_deref()
            .map(|prev| *mutex_lock(&prev.inlined_depth))
            .unwrap_or_default();
        StackFrameList {
            thread,
            unwinder: sources.unwinder,
            symbols: sources.symbols,
            call_graph: sources.call_graph,
            recognizers: sources.recognizers,
            interrupt,
            show_inlined_frames,
            inner: RwLock::new(FrameData {
                frames: Vec::new(),
                concrete_frames_fetched: 0,
                prev_frames,
            }),
            selected_frame_idx: Mutex::new(None),
            inlined_depth: Mutex::new(inherited_depth),
        }
    }

    pub fn were_all_frames_fetched(&self) -> bool {
        read_lock(&self.inner).all_frames_fetched()
    }

    /// Guarantee the list holds a frame for visible index `end_idx`, or as
    /// many frames as the stack has with "fully fetched" set, unless the
    /// fetch was interrupted.
    pub fn ensure_frames_up_to(
        &self,
        end_idx: u32,
        allow_interrupt: InterruptionControl,
    ) -> Result<(), Interrupted> {
        // The target is in visible units; widen it by the current inlined
        // depth before taking the exclusive lock. The depth lock and the
        // exclusive list lock are never held together.
        let mut end_idx = end_idx;
        if end_idx > 0 && end_idx != u32::MAX {
            if let Some(depth) = self.current_inlined_depth() {
                end_idx = end_idx.saturating_add(depth);
            }
        }

        let mut data = write_lock(&self.inner);
        // Now that we have the lock, check that someone didn't get here
        // ahead of us.
        if data.frames.len() > end_idx as usize || data.all_frames_fetched() {
            return Ok(());
        }

        // Do not fetch frames for an invalid thread.
        if !self.thread.is_valid() {
            return Ok(());
        }

        if !self.show_inlined_frames {
            self.fetch_only_concrete_frames_up_to(&mut data, end_idx);
            return Ok(());
        }

        self.fetch_frames_up_to(&mut data, end_idx, allow_interrupt)
    }

    /// Count the concrete frames without materializing them. Materialization
    /// is deferred to `frame_at_index`, which can lazily query the unwind
    /// source for single frames.
    fn fetch_only_concrete_frames_up_to(&self, data: &mut FrameData, end_idx: u32) {
        if end_idx < data.concrete_frames_fetched {
            return;
        }

        let num_frames = self.unwinder.count_available(end_idx);
        if num_frames < end_idx.saturating_add(1) {
            // Done unwinding.
            data.set_all_frames_fetched();
        }

        if num_frames as usize > data.frames.len() {
            data.frames.resize(num_frames as usize, None);
        }
    }

    fn fetch_frames_up_to(
        &self,
        data: &mut FrameData,
        end_idx: u32,
        allow_interrupt: InterruptionControl,
    ) -> Result<(), Interrupted> {
        let mut was_interrupted = false;

        loop {
            let idx = data.concrete_frames_fetched;
            let unwind_frame;

            if idx == 0 {
                if data.frames.is_empty() {
                    unwind_frame = self.build_zeroth_frame();
                    match &unwind_frame {
                        Some(frame) => data.frames.push(Some(frame.clone())),
                        None => break,
                    }
                } else {
                    // Frame 0 has already been created, reuse it.
                    unwind_frame = data.frames.first().cloned().flatten();
                }
                data.concrete_frames_fetched = 1;
            } else {
                // Check for interruption when building the frames. Only for
                // idx > 0, so that there is always a 0th frame.
                if allow_interrupt == InterruptionControl::AllowInterruption
                    && self.interrupt.interrupt_requested()
                {
                    trace!("interrupted having fetched {} frames", data.frames.len());
                    was_interrupted = true;
                    break;
                }

                let raw = match self.unwinder.raw_frame(idx) {
                    Some(raw) => raw,
                    None => {
                        // We've gotten to the end of the stack.
                        data.set_all_frames_fetched();
                        break;
                    }
                };
                data.concrete_frames_fetched = idx + 1;

                // Create synthetic tail call frames between the previous
                // frame and the newly-found one. The new frame's list index
                // moves past whatever was inserted; its concrete index
                // stays `idx`.
                self.synthesize_tail_call_frames(data, idx, &raw);

                let scope = self.symbols.scope_at(symbolication_address(&raw));
                let frame = Arc::new(StackFrame::new(
                    FrameKind::Regular,
                    data.frames.len() as u32,
                    idx,
                    Some(raw.cfa),
                    raw.pc,
                    raw.behaves_like_zeroth,
                    self.unwinder.register_context(idx),
                    scope,
                ));
                data.frames.push(Some(frame.clone()));
                unwind_frame = Some(frame);
            }

            if let Some(unwind_frame) = &unwind_frame {
                self.expand_inline_frames(data, unwind_frame);
            }

            if (data.frames.len() as u32).saturating_sub(1) >= end_idx {
                break;
            }
        }

        // Don't try to merge until every frame in this stack has been
        // calculated.
        if data.all_frames_fetched() {
            if let Some(prev_frames) = data.prev_frames.take() {
                self.merge_with_previous(data, &prev_frames);
            }
        }

        // Don't report interrupted if we happen to have gotten all the
        // frames anyway.
        if was_interrupted && !data.all_frames_fetched() {
            return Err(Interrupted);
        }
        Ok(())
    }

    fn build_zeroth_frame(&self) -> Option<Arc<StackFrame>> {
        let reg_ctx = self.thread.register_context()?;
        // There shouldn't be any way not to get the frame info for frame 0,
        // but if the unwind source can't produce it, make a frame by hand
        // with the live stack pointer as the CFA and see if that gets any
        // further.
        let (cfa, pc, behaves_like_zeroth) = match self.unwinder.raw_frame(0) {
            Some(raw) => (raw.cfa, raw.pc, raw.behaves_like_zeroth),
            None => (reg_ctx.sp(), reg_ctx.pc(), true),
        };
        let scope = self.symbols.scope_at(if behaves_like_zeroth {
            pc
        } else {
            pc.saturating_sub(1)
        });
        Some(Arc::new(StackFrame::new(
            FrameKind::RegularZeroth,
            0,
            0,
            Some(cfa),
            pc,
            behaves_like_zeroth,
            Some(reg_ctx),
            scope,
        )))
    }

    /// Create synthetic frames for tail calls elided between the frame on
    /// top of the list and the concrete frame about to be appended.
    ///
    /// ```text
    ///   --------------
    ///   |    ...     | <- Completed frames.
    ///   --------------
    ///   | prev_frame |
    ///   --------------
    ///   |    ...     | <- Artificial frames inserted here.
    ///   --------------
    ///   | next_frame |
    ///   --------------
    ///   |    ...     | <- Not-yet-visited frames.
    ///   --------------
    /// ```
    fn synthesize_tail_call_frames(
        &self,
        data: &mut FrameData,
        next_concrete_idx: u32,
        next_raw: &RawFrame,
    ) {
        // Cannot synthesize tail call frames when the stack is empty: there
        // is no "previous" frame.
        let prev_frame = match data.frames.last().and_then(|slot| slot.clone()) {
            Some(frame) => frame,
            None => return,
        };

        // Find the functions the two frames are stopped in. Both are needed
        // to search the lazy call graph for intervening frames.
        let prev_func = match self
            .symbols
            .function_at(prev_frame.code_address_for_symbolication())
        {
            Some(function) => function,
            None => {
                trace!("synthesize_tail_call_frames: can't find previous function");
                return;
            }
        };
        let next_func = match self.symbols.function_at(symbolication_address(next_raw)) {
            Some(function) => function,
            None => {
                trace!("synthesize_tail_call_frames: can't find next function");
                return;
            }
        };

        // Try to find the unique sequence of tail calls which led from
        // next_frame's function to prev_frame's.
        let path = tail_call::find_intervening_frames(
            next_func,
            prev_func,
            next_raw.pc,
            &*self.call_graph,
            &*self.symbols,
        );

        // Push the synthetic frames, innermost first.
        for node in path.iter().rev() {
            let frame_idx = data.frames.len() as u32;
            // If the recorded address is the call instruction itself,
            // symbolication must not back it up by one.
            let behaves_like_zeroth_frame = node.site_kind == CallSiteKind::Call;
            let pc = node.address;
            let scope = self.symbols.scope_at(if behaves_like_zeroth_frame {
                pc
            } else {
                pc.saturating_sub(1)
            });
            let frame = Arc::new(StackFrame::new(
                FrameKind::Artificial,
                frame_idx,
                next_concrete_idx,
                None,
                pc,
                behaves_like_zeroth_frame,
                None,
                scope,
            ));
            trace!(
                "pushed tail-call frame {} at {:#x}",
                self.symbols
                    .function_name(node.function)
                    .unwrap_or_else(|| format!("{:?}", node.function)),
                pc
            );
            data.frames.push(Some(frame));
        }
    }

    /// Append one frame per inlined scope enclosing the top frame's code
    /// address, walking outward until the expander runs dry. Inline rows
    /// share the concrete frame's CFA, register context, and unwind index.
    fn expand_inline_frames(&self, data: &mut FrameData, unwind_frame: &Arc<StackFrame>) {
        let concrete_idx = unwind_frame.concrete_frame_index();
        let cfa = unwind_frame.cfa();
        let reg_ctx = unwind_frame.register_context();

        let mut curr_address = match data.frames.last().and_then(|slot| slot.clone()) {
            Some(top) => top.code_address_for_symbolication(),
            None => return,
        };
        while let Some(inline_scope) = self.symbols.parent_inline_scope(curr_address) {
            let frame = StackFrame::new_inlined(
                data.frames.len() as u32,
                concrete_idx,
                cfa,
                inline_scope.resume_address,
                reg_ctx.clone(),
                inline_scope.scope,
            );
            data.frames.push(Some(Arc::new(frame)));
            curr_address = inline_scope.resume_address;
        }
    }

    /// Splice still-valid frame objects from the previous stop into this
    /// list. Both lists are walked from the outermost end inward in lock
    /// step; the walk stops at the first identity mismatch, unmaterialized
    /// slot, or exhausted side, and no resynchronization is attempted.
    fn merge_with_previous(&self, data: &mut FrameData, prev_list: &StackFrameList) {
        let prev_data = read_lock(&prev_list.inner);
        let mut curr_num = data.frames.len();
        let mut prev_num = prev_data.frames.len();
        let mut merged = 0usize;

        while curr_num > 0 && prev_num > 0 {
            curr_num -= 1;
            prev_num -= 1;
            let curr_frame = match &data.frames[curr_num] {
                Some(frame) => frame.clone(),
                None => break,
            };
            let prev_frame = match &prev_data.frames[prev_num] {
                Some(frame) => frame.clone(),
                None => break,
            };

            // Check the stack ids to make sure the frames are the same.
            if curr_frame.stack_id() != prev_frame.stack_id() {
                break;
            }

            prev_frame.update_from_current(&curr_frame);
            // Put the fixed-up previous frame into the current list so the
            // object identity doesn't change across the stop.
            data.frames[curr_num] = Some(prev_frame);
            merged += 1;
        }
        trace!("merged {} frames from the previous stop", merged);
    }

    /// The total number of visible frames, fetching whatever is still
    /// missing. The fetch is not interruptible or the count could come up
    /// short.
    pub fn num_frames(&self) -> u32 {
        if !self.were_all_frames_fetched() {
            let _ = self.ensure_frames_up_to(u32::MAX, InterruptionControl::DoNotAllowInterruption);
        }
        let len = read_lock(&self.inner).frames.len() as u32;
        self.visible_frame_index(len)
    }

    /// Translate a raw list position into a visible index by peeling off the
    /// frames hidden beneath a valid current inlined depth.
    fn visible_frame_index(&self, idx: u32) -> u32 {
        match self.current_inlined_depth() {
            Some(depth) => idx.saturating_sub(depth),
            None => idx,
        }
    }

    /// The frame at visible index `idx`, fetching frames as needed. Returns
    /// `None` past the end of the stack, or when fetching was interrupted.
    pub fn frame_at_index(&self, idx: u32) -> Option<Arc<StackFrame>> {
        enum Missing {
            Materialize,
            RecoverZeroth,
        }

        let original_idx = idx;
        // A valid current inlined depth hides the list's deepest frames.
        let idx = match self.current_inlined_depth() {
            Some(depth) => idx.saturating_add(depth),
            None => idx,
        };

        // If enough frames are already materialized, don't block other
        // readers: look under the shared lock first.
        {
            let data = read_lock(&self.inner);
            if let Some(Some(frame)) = data.frames.get(idx as usize) {
                return Some(frame.clone());
            }
        }

        // ensure_frames_up_to fills the list with as many frames as asked
        // for, if the stack has that many.
        if self
            .ensure_frames_up_to(idx, InterruptionControl::AllowInterruption)
            .is_err()
        {
            trace!("frame_at_index was interrupted");
            return None;
        }

        let missing = {
            let data = read_lock(&self.inner);
            match data.frames.get(idx as usize) {
                Some(Some(frame)) => return Some(frame.clone()),
                Some(None) => Missing::Materialize,
                None => {
                    if original_idx != 0 {
                        return None;
                    }
                    // There should always be a frame at index 0. If the
                    // current inlined depth claimed more frames than
                    // actually exist, re-derive it and hand out the real
                    // zeroth frame.
                    if data.frames.is_empty() {
                        debug_assert!(!self.thread.is_valid(), "a valid thread has no frames");
                        return None;
                    }
                    Missing::RecoverZeroth
                }
            }
        };

        match missing {
            Missing::Materialize => self.materialize_concrete_frame(idx),
            Missing::RecoverZeroth => {
                self.reset_current_inlined_depth();
                let data = read_lock(&self.inner);
                data.frames.first().and_then(|slot| slot.clone())
            }
        }
    }

    /// Materialize a frame that concrete-only fetching only counted. Such
    /// frames never get synthetic or inline companions, so list index and
    /// unwind index coincide.
    fn materialize_concrete_frame(&self, idx: u32) -> Option<Arc<StackFrame>> {
        let mut data = write_lock(&self.inner);
        if idx as usize >= data.frames.len() {
            return None;
        }
        if let Some(frame) = &data.frames[idx as usize] {
            // Someone materialized it while we waited for the lock.
            return Some(frame.clone());
        }

        let raw = self.unwinder.raw_frame(idx)?;
        let (kind, reg_ctx) = if idx == 0 {
            (FrameKind::RegularZeroth, self.thread.register_context())
        } else {
            (FrameKind::Regular, self.unwinder.register_context(idx))
        };
        let scope = self.symbols.scope_at(symbolication_address(&raw));
        let frame = Arc::new(StackFrame::new(
            kind,
            idx,
            idx,
            Some(raw.cfa),
            raw.pc,
            raw.behaves_like_zeroth,
            reg_ctx,
            scope,
        ));
        data.frames[idx as usize] = Some(frame.clone());
        Some(frame)
    }

    /// The frame produced by raw unwind step `unwind_idx`. The unwind index
    /// is always greater than or equal to the list index, so start there and
    /// walk outward.
    pub fn frame_with_concrete_index(&self, unwind_idx: u32) -> Option<Arc<StackFrame>> {
        let mut frame_idx = unwind_idx;
        loop {
            let frame = self.frame_at_index(frame_idx)?;
            if frame.concrete_frame_index() == unwind_idx {
                return Some(frame);
            }
            frame_idx += 1;
        }
    }

    /// Look up a frame by stack identity. CFAs grow toward the outermost
    /// frame, so a binary search over the already-fetched prefix finds
    /// realized frames cheaply; otherwise frames are fetched incrementally
    /// until the identity shows up or the stack ends.
    pub fn frame_with_stack_id(&self, stack_id: &StackId) -> Option<Arc<StackFrame>> {
        if !stack_id.is_valid() {
            return None;
        }

        {
            let data = read_lock(&self.inner);
            let frames = &data.frames;
            let target_cfa = stack_id.cfa.unwrap_or(u64::MAX);
            let mut pos = frames.partition_point(|slot| match slot {
                Some(frame) => frame.cfa().unwrap_or(u64::MAX) < target_cfa,
                None => false,
            });
            while let Some(Some(frame)) = frames.get(pos) {
                if frame.stack_id() == *stack_id {
                    return Some(frame.clone());
                }
                if frame.cfa().unwrap_or(u64::MAX) > target_cfa {
                    break;
                }
                pos += 1;
            }
        }

        let mut frame_idx = 0;
        loop {
            let frame = self.frame_at_index(frame_idx)?;
            if frame.stack_id() == *stack_id {
                return Some(frame);
            }
            frame_idx += 1;
        }
    }

    /// Re-resolve a borrowed frame to its shared handle, if this list still
    /// owns it.
    pub fn frame_handle(&self, frame: &StackFrame) -> Option<Arc<StackFrame>> {
        let data = read_lock(&self.inner);
        data.frames
            .iter()
            .flatten()
            .find(|candidate| std::ptr::eq(Arc::as_ptr(candidate), frame))
            .cloned()
    }

    /// Install `frame` at raw list position `idx`, growing the list with
    /// unmaterialized slots as needed.
    pub fn set_frame_at_index(&self, idx: u32, frame: Arc<StackFrame>) {
        let mut data = write_lock(&self.inner);
        if idx as usize >= data.frames.len() {
            data.frames.resize(idx as usize + 1, None);
        }
        data.frames[idx as usize] = Some(frame);
    }

    /// The relevant-frame pass: ask the recognizer of frame 0 first, then
    /// the stop reason. Runs with no lock held, since both collaborators may
    /// re-enter this list; the winner is committed through
    /// `set_selected_frame`.
    fn select_most_relevant_frame(&self) {
        // Only the top frame should be recognized.
        let frame0 = match self.frame_at_index(0) {
            Some(frame) => frame,
            None => {
                trace!("failed to construct frame #0");
                return;
            }
        };

        if let Some(recognizers) = &self.recognizers {
            if let Some(most_relevant) = recognizers.most_relevant_frame(&frame0, self) {
                trace!(
                    "found most relevant frame at index {}",
                    most_relevant.frame_index()
                );
                self.set_selected_frame(&most_relevant);
                return;
            }
        }
        trace!("frame #0 not recognized");

        // If this thread has a non-trivial stop reason, let it suggest a
        // most relevant frame. Inline-aware suggestions belong to the
        // inlined-depth machinery, not to selection.
        let mut stack_idx = 0;
        let mut found_relevant = false;
        if let Some(stop_reason) = self.thread.stop_reason() {
            if let Some(suggestion) = stop_reason.suggested_frame_index() {
                if !suggestion.accounts_for_inlining {
                    stack_idx = suggestion.index;
                    found_relevant = true;
                }
            }
        }

        match self.frame_at_index(stack_idx) {
            None => trace!(
                "stop info suggested relevant frame {} but it didn't exist",
                stack_idx
            ),
            Some(frame) => {
                if found_relevant {
                    trace!("setting selected frame from stop info to {}", stack_idx);
                }
                self.set_selected_frame(&frame);
            }
        }
        if !found_relevant {
            trace!("no relevant frame!");
        }
    }

    /// The selected visible frame index. With `select_most_relevant`, an
    /// unset selection first runs the relevance pass, which may re-enter the
    /// list; otherwise an unset selection reads as 0 without being recorded.
    pub fn selected_frame_index(&self, select_most_relevant: bool) -> u32 {
        if let Some(idx) = *mutex_lock(&self.selected_frame_idx) {
            return idx;
        }
        if !select_most_relevant {
            return 0;
        }
        self.select_most_relevant_frame();
        let mut selected = mutex_lock(&self.selected_frame_idx);
        *selected.get_or_insert(0)
    }

    /// Record `frame` as the selection, expressed in unwind units: a valid
    /// current inlined depth is subtracted from the frame's list position.
    /// Returns the recorded index; a frame this list doesn't own selects 0.
    pub fn set_selected_frame(&self, frame: &StackFrame) -> u32 {
        let position = {
            let data = read_lock(&self.inner);
            data.frames.iter().position(|slot| match slot {
                Some(candidate) => std::ptr::eq(Arc::as_ptr(candidate), frame),
                None => false,
            })
        };

        let mut selected_idx = 0;
        if let Some(position) = position {
            selected_idx = position as u32;
            if let Some(depth) = self.current_inlined_depth() {
                selected_idx = selected_idx.saturating_sub(depth);
            }
        }
        *mutex_lock(&self.selected_frame_idx) = Some(selected_idx);
        self.set_default_file_and_line_to_selected_frame();
        selected_idx
    }

    /// Select by visible index. False if no such frame exists.
    pub fn set_selected_frame_by_index(&self, idx: u32) -> bool {
        match self.frame_at_index(idx) {
            Some(frame) => {
                self.set_selected_frame(&frame);
                true
            }
            None => false,
        }
    }

    /// When this thread is the process's selected thread, push the selected
    /// frame's source location out as the process-wide default.
    fn set_default_file_and_line_to_selected_frame(&self) {
        if !self.thread.is_selected_thread() {
            return;
        }
        if let Some(frame) = self.frame_at_index(self.selected_frame_index(false)) {
            if let Some(line_entry) = self
                .symbols
                .line_entry(frame.code_address_for_symbolication())
            {
                self.thread.set_default_file_and_line(&line_entry);
            }
        }
    }

    /// The current inlined depth, if it is still valid for the thread's live
    /// pc. A stale recording is invalidated on the spot.
    pub fn current_inlined_depth(&self) -> Option<u32> {
        if !self.show_inlined_frames {
            return None;
        }
        let mut state = mutex_lock(&self.inlined_depth);
        let recorded_pc = state.pc?;
        if self.thread.pc() != Some(recorded_pc) {
            state.pc = None;
            state.depth = None;
            trace!("current_inlined_depth: invalidating current inlined depth");
            return None;
        }
        state.depth
    }

    /// Recompute the inlined depth from the stop reason if the recorded one
    /// is no longer valid.
    pub fn calculate_current_inlined_depth(&self) {
        if self.current_inlined_depth().is_none() {
            self.reset_current_inlined_depth();
        }
    }

    /// Ask the stop reason for the inlined depth at the stop pc and record
    /// it, or invalidate the recording if it has nothing to say.
    pub fn reset_current_inlined_depth(&self) {
        if !self.show_inlined_frames {
            return;
        }
        let stop_reason = match self.thread.stop_reason() {
            Some(stop_reason) => stop_reason,
            None => return,
        };
        // Only inline-aware suggestions adjust the inlined depth here;
        // the others are for frame selection.
        let suggestion = stop_reason
            .suggested_frame_index()
            .filter(|suggestion| suggestion.accounts_for_inlining);
        let mut state = mutex_lock(&self.inlined_depth);
        match suggestion {
            Some(suggestion) => {
                state.depth = Some(suggestion.index);
                state.pc = self.thread.pc();
                trace!(
                    "reset_current_inlined_depth: setting inlined depth {} at pc {:#x}",
                    suggestion.index,
                    state.pc.unwrap_or(u64::MAX)
                );
            }
            None => {
                state.depth = None;
                state.pc = None;
                trace!("reset_current_inlined_depth: invalidating current inlined depth");
            }
        }
    }

    /// Step one inline level inward. False when there is nothing to peel.
    pub fn decrement_current_inlined_depth(&self) -> bool {
        if !self.show_inlined_frames {
            return false;
        }
        if let Some(depth) = self.current_inlined_depth() {
            if depth > 0 {
                mutex_lock(&self.inlined_depth).depth = Some(depth - 1);
                return true;
            }
        }
        false
    }

    /// Force the inlined depth; `None` invalidates it.
    pub fn set_current_inlined_depth(&self, new_depth: Option<u32>) {
        let mut state = mutex_lock(&self.inlined_depth);
        state.depth = new_depth;
        state.pc = match new_depth {
            Some(_) => self.thread.pc(),
            None => None,
        };
    }

    /// Drop all state for this stop. Used once per resume; a cleared list is
    /// not revived into a growing one, the next stop gets a fresh list.
    pub fn clear(&self) {
        let mut data = write_lock(&self.inner);
        data.frames.clear();
        data.concrete_frames_fetched = 0;
        data.prev_frames = None;
        drop(data);
        *mutex_lock(&self.selected_frame_idx) = None;
    }

    /// Debug dump of every slot, innermost first.
    pub fn dump<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        let data = read_lock(&self.inner);
        for (idx, slot) in data.frames.iter().enumerate() {
            match slot {
                Some(frame) => writeln!(
                    w,
                    "{:p}: frame #{} pc = {:#018x}, cfa = {:?}",
                    Arc::as_ptr(frame),
                    idx,
                    frame.frame_code_address(),
                    frame.cfa(),
                )?,
                None => writeln!(w, "frame #{} <unmaterialized>", idx)?,
            }
        }
        Ok(())
    }

    /// Render the visible frames into `w`. Returns the number of frames
    /// displayed; rendering stops early at the end of the stack or when the
    /// interrupt token fires, leaving the partial output in place.
    pub fn write_status<W: fmt::Write>(
        &self,
        w: &mut W,
        options: &StatusOptions,
    ) -> Result<usize, fmt::Error> {
        if options.num_frames == 0 {
            return Ok(0);
        }

        // Don't let the last frame wrap around.
        let last_frame = if options.num_frames == u32::MAX {
            u32::MAX
        } else {
            options.first_frame.saturating_add(options.num_frames)
        };

        let selected_frame = self.frame_at_index(self.selected_frame_index(false));
        let unselected_marker = options
            .selected_frame_marker
            .map(|marker| " ".repeat(marker.chars().count()));

        let mut num_frames_displayed = 0;
        let mut frame_idx = options.first_frame;
        while frame_idx < last_frame {
            let frame = match self.frame_at_index(frame_idx) {
                Some(frame) => frame,
                None => break,
            };
            let is_selected = selected_frame
                .as_ref()
                .map(|selected| Arc::ptr_eq(selected, &frame))
                .unwrap_or(false);

            // Hide uninteresting frames unless one is the selected frame.
            if !options.show_hidden && !is_selected && frame.is_hidden() {
                frame_idx += 1;
                continue;
            }

            // Check for interruption here; fetching the deeper frames can be
            // slow.
            if self.interrupt.interrupt_requested() {
                trace!(
                    "interrupted dumping stack with {} frames shown",
                    num_frames_displayed
                );
                break;
            }

            let marker = if is_selected {
                options.selected_frame_marker.unwrap_or("")
            } else {
                unselected_marker.as_deref().unwrap_or("")
            };
            self.write_frame_status(w, &frame, frame_idx, marker, options.show_frame_info)?;
            num_frames_displayed += 1;
            frame_idx += 1;
        }

        Ok(num_frames_displayed)
    }

    fn write_frame_status<W: fmt::Write>(
        &self,
        w: &mut W,
        frame: &StackFrame,
        visible_idx: u32,
        marker: &str,
        show_frame_info: bool,
    ) -> fmt::Result {
        write!(
            w,
            "{}frame #{}: {:#018x}",
            marker,
            visible_idx,
            frame.frame_code_address()
        )?;
        if show_frame_info {
            let address = frame.code_address_for_symbolication();
            if let Some(name) = self
                .symbols
                .function_at(address)
                .and_then(|function| self.symbols.function_name(function))
            {
                write!(w, " {}", name)?;
            }
            if let Some(line_entry) = self.symbols.line_entry(address) {
                write!(w, " at {}:{}", line_entry.file, line_entry.line)?;
            }
        }
        if frame.is_inlined() {
            write!(w, " [inlined]")?;
        }
        if frame.is_artificial() {
            write!(w, " [artificial]")?;
        }
        writeln!(w)
    }
}
