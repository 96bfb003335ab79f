// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for materializing and caching the call stacks of stopped
//! threads in a native-process debugger.
//!
//! The central type is [`StackFrameList`]: the ordered call stack of one
//! thread for one stop. It is built incrementally and on demand — asking for
//! frame 7 unwinds exactly as far as frame 7 — and it is safe to query from
//! any number of threads at once. Three things happen along the way that a
//! raw unwind can't provide:
//!
//! * **Inline expansion**: each concrete frame is expanded into one visible
//!   frame per inlined call active at its pc, via
//!   [`SymbolSource::parent_inline_scope`].
//! * **Tail-call synthesis**: when the unwinder skips a frame because a tail
//!   call reused it, and the call graph admits exactly one explanation, an
//!   [`Artificial`][FrameKind::Artificial] frame is inserted to represent
//!   the elided call.
//! * **Cross-stop merging**: once a list is fully fetched, frame objects
//!   from the previous stop whose stack identity still matches are spliced
//!   in, so holders of [`StackFrame`] handles keep object identity across
//!   consecutive stops.
//!
//! Everything the list needs from the rest of the debugger comes in through
//! collaborator traits — [`UnwindSource`], [`SymbolSource`],
//! [`CallGraphSource`], [`StopReason`], [`RecognizerSource`],
//! [`ThreadContext`] — bundled into [`FrameSources`]. Fetching can block for
//! as long as the unwinder does; cancellation is cooperative through an
//! [`InterruptToken`], and an interrupted fetch reports [`Interrupted`]
//! rather than pretending the stack ended.

mod frame;
mod list;
mod sources;
mod tail_call;

pub use crate::frame::*;
pub use crate::list::*;
pub use crate::sources::*;

#[cfg(test)]
mod tail_call_unittest;
