//! Per-thread lifecycle.
//!
//! A thread must create its runtime context before it raises, protects, traces or
//! registers guards, and should shut it down once it is done. Contexts are never
//! created implicitly: using the runtime on a thread without one is fatal.
//!
//! ```rust,no_run
//! use exscope::thread;
//!
//! std::thread::spawn(|| -> exscope::Result<()> {
//!     let handle = thread::init()?;
//!     // ... protected work ...
//!     handle.shutdown()
//! });
//! ```

use std::{fmt, marker::PhantomData};

use crate::{
    config::{self, StackLimits},
    runtime::{
        context::{self, try_with_context, Depths, ThreadContext},
        fatal,
    },
    Error, Result,
};

/// Ownership of the calling thread's runtime context.
///
/// Dropping the handle tears the context down like [`shutdown`](Self::shutdown), logging
/// instead of returning an imbalance. The handle cannot leave its thread.
#[must_use = "the thread context is torn down when the handle is dropped"]
pub struct ThreadHandle {
    closed: bool,
    _not_send: PhantomData<*const ()>,
}

impl ThreadHandle {
    /// Tears down the thread's context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unbalanced`] if regions, guards, frames or exception records were
    /// still live, or an escape was never reported. The context is removed either way.
    pub fn shutdown(mut self) -> Result<()> {
        self.closed = true;
        teardown()
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if fatal::is_poisoned() {
            let _ = context::uninstall();
            return;
        }
        if let Err(error) = teardown() {
            log::error!("thread context dropped without shutdown: {error}");
        }
    }
}

fn teardown() -> Result<()> {
    let context = context::uninstall().ok_or(Error::ContextMissing)?;
    let depths = context.depths();
    let mut live = depths.occupied().to_string();
    if context.has_pending_escape() {
        if !live.is_empty() {
            live.push_str(", ");
        }
        live.push_str("pending escape");
    }

    if live.is_empty() {
        log::debug!("thread context shut down");
        Ok(())
    } else {
        log::error!("thread context shut down unbalanced ({depths})\n{}", context.dump());
        Err(Error::Unbalanced(live))
    }
}

/// Creates the calling thread's context with the configured stack limits.
///
/// # Errors
///
/// Returns [`Error::ContextActive`] if the thread already has a context.
pub fn init() -> Result<ThreadHandle> {
    init_with(config::current().limits)
}

/// Creates the calling thread's context with explicit stack limits.
///
/// The rest of the configuration comes from the process-wide
/// [`RuntimeConfig`](crate::config::RuntimeConfig).
///
/// # Errors
///
/// Returns [`Error::ContextActive`] if the thread already has a context.
pub fn init_with(limits: StackLimits) -> Result<ThreadHandle> {
    context::install(ThreadContext::new(config::current(), limits))?;
    fatal::clear_poison();
    log::debug!("thread context created");
    Ok(ThreadHandle {
        closed: false,
        _not_send: PhantomData,
    })
}

/// Returns `true` if the calling thread has a context.
#[must_use]
pub fn is_initialized() -> bool {
    context::is_installed()
}

/// Returns the depths of the calling thread's five stacks.
///
/// # Errors
///
/// Returns [`Error::ContextMissing`] if the thread has no context.
pub fn depths() -> Result<Depths> {
    try_with_context(|ctx| Ok(ctx.depths()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() -> Result<()> {
        assert!(!is_initialized());
        assert_eq!(depths(), Err(Error::ContextMissing));

        let handle = init()?;
        assert!(is_initialized());
        assert!(matches!(init(), Err(Error::ContextActive)));
        assert!(depths()?.is_empty());

        handle.shutdown()?;
        assert!(!is_initialized());
        Ok(())
    }

    #[test]
    fn test_shutdown_reports_live_entries() -> Result<()> {
        let handle = init()?;
        let site = crate::runtime::CallSite::enter(1, "src/sample.rs", "leaked");
        std::mem::forget(site);

        match handle.shutdown() {
            Err(Error::Unbalanced(live)) => assert_eq!(live, "frames"),
            other => panic!("expected an unbalanced shutdown, got {other:?}"),
        }
        assert!(!is_initialized());
        Ok(())
    }

    #[test]
    fn test_custom_limits() -> Result<()> {
        let handle = init_with(StackLimits::uniform(1))?;
        let site = crate::runtime::CallSite::enter(1, "src/sample.rs", "only");
        assert_eq!(depths()?.frames, 1);
        drop(site);
        handle.shutdown()
    }
}
