//! Exception records and the exception-instance stack.
//!
//! A raise pushes an [`ExceptionRecord`] onto the thread's [`ExceptionStack`], where it
//! stays until the region that caught it cleans up. The record refers to its trace by
//! depth into the live frame stack; when those frames are about to be popped while the
//! record is still needed (the record is unwinding past traced calls), the trace is
//! detached into an owned copy.
//!
//! Catch handlers never see the record itself: they receive an owned [`Exception`].

use std::fmt;

use crate::{
    kind::{self, ErrorKind, KindRef},
    runtime::frames::{write_frames, FrameInfo, FrameStack, Site},
    utils::FreeStack,
    Result,
};

/// Where a record's trace lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceRef {
    /// The frames below `depth` in the thread's frame stack.
    Live {
        /// Frame-stack depth at the raise
        depth: usize,
    },
    /// A deep copy of the frames, outermost first.
    Owned(Vec<FrameInfo>),
}

impl Default for TraceRef {
    fn default() -> Self {
        TraceRef::Owned(Vec::new())
    }
}

/// A raised exception pending a match.
#[derive(Clone, Debug)]
pub struct ExceptionRecord {
    kind: ErrorKind,
    message: String,
    origin: FrameInfo,
    trace: TraceRef,
}

impl Default for ExceptionRecord {
    fn default() -> Self {
        ExceptionRecord {
            // Placeholder for recycled nodes, overwritten by every push
            kind: ErrorKind::new_unchecked(0),
            message: String::new(),
            origin: FrameInfo::default(),
            trace: TraceRef::default(),
        }
    }
}

impl ExceptionRecord {
    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the formatted message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the raise site.
    #[must_use]
    pub fn origin(&self) -> &FrameInfo {
        &self.origin
    }

    /// Returns the trace reference.
    #[must_use]
    pub fn trace(&self) -> &TraceRef {
        &self.trace
    }

    /// Copies the record into an [`Exception`], resolving a live trace against `frames`.
    #[must_use]
    pub fn to_exception(&self, frames: &FrameStack) -> Exception {
        let frames = match &self.trace {
            TraceRef::Live { depth } => frames.snapshot(*depth),
            TraceRef::Owned(owned) => owned.clone(),
        };
        Exception {
            kind: self.kind,
            message: self.message.clone(),
            origin: self.origin.clone(),
            frames,
        }
    }

    /// Turns a live trace into an owned copy.
    fn detach(&mut self, frames: &FrameStack) {
        if let TraceRef::Live { depth } = self.trace {
            self.trace = TraceRef::Owned(frames.snapshot(depth));
        }
    }
}

/// Stack of [`ExceptionRecord`]s for one thread.
#[derive(Debug)]
pub struct ExceptionStack {
    records: FreeStack<ExceptionRecord>,
}

impl ExceptionStack {
    /// Creates a stack holding at most `limit` records, with `preallocate` spare nodes.
    #[must_use]
    pub fn new(limit: usize, preallocate: usize) -> Self {
        let mut records = FreeStack::with_limit("exceptions", limit);
        records.reserve(preallocate);
        ExceptionStack { records }
    }

    /// Pushes a record anchored at the current top of `frames`.
    ///
    /// Recycled records keep their message buffer, so steady-state raising does not
    /// allocate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) at the limit.
    pub fn push(
        &mut self,
        kind: ErrorKind,
        message: &str,
        origin: Site,
        frames: &FrameStack,
    ) -> Result<()> {
        let record = self.records.alloc()?;
        record.kind = kind;
        record.message.clear();
        record.message.push_str(message);
        record.origin.line = origin.line;
        record.origin.file = origin.file;
        record.origin.function = origin.function;
        record.origin.annotation.clear();
        record.trace = TraceRef::Live {
            depth: frames.depth(),
        };
        Ok(())
    }

    /// Pushes a record carrying an existing exception, trace included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) at the limit.
    pub fn push_exception(&mut self, exception: Exception) -> Result<()> {
        self.records.push(ExceptionRecord {
            kind: exception.kind,
            message: exception.message,
            origin: exception.origin,
            trace: TraceRef::Owned(exception.frames),
        })?;
        Ok(())
    }

    /// Returns the number of records.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.records.depth()
    }

    /// Returns the most recent record.
    #[must_use]
    pub fn top(&self) -> Option<&ExceptionRecord> {
        self.records.top()
    }

    /// Returns the record at `index`, counted from the bottom.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ExceptionRecord> {
        self.records.get(index)
    }

    /// Releases records until `depth` remain.
    pub fn truncate(&mut self, depth: usize) -> usize {
        self.records.truncate(depth)
    }

    /// Releases the records between `depth` and `index`, moving the record at `index`
    /// down to `depth`.
    ///
    /// Used when a region cleans up while one of its records is still unwinding to an
    /// outer region: the records it handled go, the one in flight stays.
    ///
    /// # Returns
    ///
    /// The new index of the kept record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`](crate::Error::Corrupted) if `index` is not a live
    /// record at or above `depth`.
    pub fn keep_only(&mut self, depth: usize, index: usize) -> Result<usize> {
        if index < depth || index >= self.depth() {
            return Err(corrupted_error!(
                "in-flight record {} outside of {}..{}",
                index,
                depth,
                self.depth()
            ));
        }
        self.records.truncate(index + 1);
        let kept = self.records.take()?;
        self.records.truncate(depth);
        self.records.push(kept)?;
        Ok(depth)
    }

    /// Detaches the trace of every record anchored above `depth` in `frames`.
    ///
    /// Must be called before the frame stack is popped below `depth`.
    pub fn detach_above(&mut self, depth: usize, frames: &FrameStack) {
        for record in self.records.iter_mut() {
            if matches!(record.trace, TraceRef::Live { depth: anchor } if anchor > depth) {
                record.detach(frames);
            }
        }
    }
}

/// An exception as seen by a catch handler.
///
/// Owns a copy of everything the record held, so it can outlive the region that caught
/// it. Returned by [`Protected::try_run`](crate::region::Protected::try_run) for
/// exceptions no clause matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exception {
    kind: ErrorKind,
    message: String,
    origin: FrameInfo,
    frames: Vec<FrameInfo>,
}

impl Exception {
    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the kind's registered name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        kind::registry().name(self.kind)
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the raise site.
    #[must_use]
    pub fn origin(&self) -> &FrameInfo {
        &self.origin
    }

    /// Returns the frames that were live at the raise, outermost first.
    #[must_use]
    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    /// Tests whether the exception's kind is `ancestor` or descends from it.
    ///
    /// Unregistered or out-of-table kinds never match.
    #[must_use]
    pub fn is_a<K: KindRef + ?Sized>(&self, ancestor: &K) -> bool {
        ancestor
            .resolve()
            .is_some_and(|ancestor| kind::is_a(self.kind, ancestor).unwrap_or(false))
    }

    /// Renders the trace, raise site first, then enclosing frames innermost first.
    #[must_use]
    pub fn trace(&self) -> String {
        let mut out = String::new();
        write_frames(
            &mut out,
            std::iter::once(&self.origin).chain(self.frames.iter().rev()),
        );
        out
    }

    /// Raises this exception again, keeping kind, message and trace.
    pub fn rethrow(self) -> ! {
        crate::region::forward(self)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

impl std::error::Error for Exception {}
