//! Call-site tracing and reconciliation.
//!
//! A traced call pushes a frame describing its call site for as long as it runs, so an
//! exception raised inside it carries the call in its trace. On exit the tracer also
//! checks that the callee left the runtime as it found it: frames left behind are popped
//! with a warning, any other imbalance on a normal return is fatal.
//!
//! ```rust,no_run
//! use exscope::{thread, trace, traced};
//!
//! fn load(path: &str) -> usize {
//!     trace::annotate(path);
//!     trace::print_trace();
//!     path.len()
//! }
//!
//! let handle = thread::init()?;
//! let size = traced!(load("config.toml"));
//! assert_eq!(size, 11);
//! handle.shutdown()?;
//! # Ok::<(), exscope::Error>(())
//! ```

use std::{marker::PhantomData, thread};

use crate::runtime::{
    context::{try_with_context, with_context, Depths},
    fatal::is_poisoned,
    frames::Site,
};

/// A traced call in progress; pops its frame when dropped.
///
/// Usually created by [`traced!`](crate::traced).
#[must_use = "the frame is popped as soon as the call site is dropped"]
#[derive(Debug)]
pub struct CallSite {
    entry: Depths,
    unwinding_at_entry: bool,
    _not_send: PhantomData<*const ()>,
}

impl CallSite {
    /// Pushes a frame for a call to `function` at `file:line`.
    pub fn enter(line: u32, file: &'static str, function: &'static str) -> Self {
        let site = Site::new(file, line, function);
        CallSite {
            entry: with_context(|ctx| ctx.push_frame(site)),
            unwinding_at_entry: thread::panicking(),
            _not_send: PhantomData,
        }
    }

    /// Returns the stack depths recorded before the frame was pushed.
    #[must_use]
    pub fn entry(&self) -> Depths {
        self.entry
    }
}

impl Drop for CallSite {
    fn drop(&mut self) {
        if is_poisoned() {
            return;
        }
        let unwinding = thread::panicking() && !self.unwinding_at_entry;
        with_context(|ctx| ctx.exit_call(&self.entry, unwinding));
    }
}

/// Renders the current frame stack, innermost first.
///
/// Returns an empty string on a thread without a context.
#[must_use]
pub fn capture_trace() -> String {
    try_with_context(|ctx| Ok(ctx.frames().render(ctx.frames().depth()))).unwrap_or_default()
}

/// Prints the current frame stack to stderr.
pub fn print_trace() {
    eprint!("{}", capture_trace());
}

/// Attaches `text` to the innermost frame; it is rendered after the frame in traces.
///
/// # Returns
///
/// `false` if there is no frame to annotate.
pub fn annotate(text: &str) -> bool {
    try_with_context(|ctx| Ok(ctx.annotate(text))).unwrap_or(false)
}
