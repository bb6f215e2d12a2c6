//! Frame/debug-info stack.
//!
//! Each traced call and each protected region pushes a [`FrameInfo`] describing its call
//! site and pops it on exit. Raised exceptions anchor into this stack to reconstruct
//! their trace, and the tracer uses its depth to detect calls that left the stack
//! unbalanced.
//!
//! # Trace Format
//!
//! One line per frame, innermost first:
//!
//! ```text
//! src/parser.rs: at line 42 in parse_header
//! src/main.rs: at line 10 in protected region [loading config]
//! ```

use std::{fmt, panic::Location};

use crate::{utils::FreeStack, Result};

/// A source location plus the name of the function or construct at it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Site {
    /// Source file
    pub file: &'static str,
    /// Source line
    pub line: u32,
    /// Function or construct name
    pub function: &'static str,
}

impl Site {
    /// Creates a site from its parts.
    #[must_use]
    pub const fn new(file: &'static str, line: u32, function: &'static str) -> Self {
        Site {
            file,
            line,
            function,
        }
    }

    /// Captures the caller's location, labelled with `function`.
    #[must_use]
    #[track_caller]
    pub fn caller(function: &'static str) -> Self {
        let location = Location::caller();
        Site::new(location.file(), location.line(), function)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: at line {} in {}", self.file, self.line, self.function)
    }
}

/// A recorded call site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Source line of the call
    pub line: u32,
    /// Source file of the call
    pub file: &'static str,
    /// Name of the called function or entered construct
    pub function: &'static str,
    /// Free-form text attached with [`annotate`](crate::trace::annotate)
    pub annotation: String,
}

impl FrameInfo {
    /// Creates a frame without annotation.
    #[must_use]
    pub fn new(line: u32, file: &'static str, function: &'static str) -> Self {
        FrameInfo {
            line,
            file,
            function,
            annotation: String::new(),
        }
    }

    /// Overwrites a recycled frame, keeping the annotation buffer's capacity.
    fn reset(&mut self, site: Site) {
        self.line = site.line;
        self.file = site.file;
        self.function = site.function;
        self.annotation.clear();
    }
}

impl From<Site> for FrameInfo {
    fn from(site: Site) -> Self {
        FrameInfo::new(site.line, site.file, site.function)
    }
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: at line {} in {}", self.file, self.line, self.function)?;
        if !self.annotation.is_empty() {
            write!(f, " [{}]", self.annotation)?;
        }
        Ok(())
    }
}

/// Appends one line per frame to `out`.
pub(crate) fn write_frames<'a, I>(out: &mut String, frames: I)
where
    I: IntoIterator<Item = &'a FrameInfo>,
{
    use std::fmt::Write;

    for frame in frames {
        let _ = writeln!(out, "{frame}");
    }
}

/// Outcome of [`FrameStack::reconcile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// The depth matched.
    Balanced,
    /// The stack had grown; this many frames were force-popped.
    Repaired(usize),
}

/// Stack of [`FrameInfo`] records for one thread.
#[derive(Debug)]
pub struct FrameStack {
    frames: FreeStack<FrameInfo>,
}

impl FrameStack {
    /// Creates a stack holding at most `limit` frames, with `preallocate` spare nodes.
    #[must_use]
    pub fn new(limit: usize, preallocate: usize) -> Self {
        let mut frames = FreeStack::with_limit("frames", limit);
        frames.reserve(preallocate);
        FrameStack { frames }
    }

    /// Pushes a frame for `site`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) at the limit.
    pub fn push(&mut self, site: Site) -> Result<()> {
        self.frames.alloc()?.reset(site);
        Ok(())
    }

    /// Pops the top frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`](crate::Error::StackUnderflow) on an empty stack,
    /// which means push/pop pairing is corrupted.
    pub fn pop(&mut self) -> Result<()> {
        self.frames.pop().map(|_| ())
    }

    /// Returns the number of frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.depth()
    }

    /// Returns the innermost frame.
    #[must_use]
    pub fn top(&self) -> Option<&FrameInfo> {
        self.frames.top()
    }

    /// Sets the annotation of the innermost frame.
    ///
    /// # Returns
    ///
    /// `false` if the stack is empty.
    pub fn annotate(&mut self, text: &str) -> bool {
        match self.frames.top_mut() {
            Some(frame) => {
                frame.annotation.clear();
                frame.annotation.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Renders the frames below `from_depth`, innermost first.
    ///
    /// `from_depth` is clamped to the current depth.
    #[must_use]
    pub fn render(&self, from_depth: usize) -> String {
        let mut out = String::new();
        self.render_into(from_depth, &mut out);
        out
    }

    /// Appends the rendering of [`render`](Self::render) to `out`.
    pub fn render_into(&self, from_depth: usize, out: &mut String) {
        let depth = from_depth.min(self.depth());
        write_frames(out, self.frames.as_slice()[..depth].iter().rev());
    }

    /// Copies the frames below `depth`, outermost first.
    #[must_use]
    pub fn snapshot(&self, depth: usize) -> Vec<FrameInfo> {
        let depth = depth.min(self.depth());
        self.frames.as_slice()[..depth].to_vec()
    }

    /// Brings the stack back to `prev_depth` after a traced call returned.
    ///
    /// Growth means a callee left frames behind, typically by leaving a region without
    /// closing it; the extra frames are popped and a warning is logged. A stack that
    /// shrank below `prev_depth` cannot be repaired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`](crate::Error::Corrupted) if the stack shrank.
    pub fn reconcile(&mut self, prev_depth: usize) -> Result<Reconciled> {
        let depth = self.depth();
        if depth < prev_depth {
            return Err(corrupted_error!(
                "frame stack shrank from {} to {}",
                prev_depth,
                depth
            ));
        }
        if depth == prev_depth {
            return Ok(Reconciled::Balanced);
        }

        if let Some(top) = self.frames.top() {
            log::warn!(
                "frame stack grew from {prev_depth} to {depth}, innermost leftover frame: {top}"
            );
        }
        Ok(Reconciled::Repaired(self.frames.truncate(prev_depth)))
    }
}
