//! Scope guards: deferred cleanup bound to a lexical scope.
//!
//! A [`GuardScope`] collects cleanup bodies and runs them when it is dropped, in reverse
//! registration order, on every exit path: falling off the end, `return`, `break`, `?`,
//! or an exception unwinding through it. Each body is tagged with a [`GuardFlavor`]
//! selecting the exit paths it runs on.
//!
//! ```rust,no_run
//! use exscope::{guard::GuardScope, thread};
//!
//! let handle = thread::init()?;
//! {
//!     let mut guards = GuardScope::new();
//!     guards.on_exit(|| println!("always"));
//!     guards.on_failure(|| println!("only while unwinding"));
//!     guards.on_success(|| println!("only on a normal exit"));
//! } // prints "only on a normal exit", then "always"
//! handle.shutdown()?;
//! # Ok::<(), exscope::Error>(())
//! ```
//!
//! A guard body must not raise: it may run while an exception is already unwinding, and
//! the runtime treats any raise or panic escaping a guard body as fatal.

use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    thread,
};

use smallvec::SmallVec;
use strum::{Display, EnumIter};

use crate::runtime::{
    context::{with_context, DispatchPurpose},
    fatal::{fatal, is_poisoned},
    frames::Site,
    region::{current_exception, is_raise},
};

/// Exit paths a guard body runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum GuardFlavor {
    /// Every exit
    Always,
    /// Normal exits only
    Success,
    /// Exits by unwinding only
    Failure,
}

impl GuardFlavor {
    /// Returns `true` if a guard of this flavor runs on the given exit path.
    #[must_use]
    pub fn applies(self, unwinding: bool) -> bool {
        match self {
            GuardFlavor::Always => true,
            GuardFlavor::Success => !unwinding,
            GuardFlavor::Failure => unwinding,
        }
    }
}

type GuardBody<'a> = Box<dyn FnOnce() + 'a>;

/// A set of cleanup bodies that run when the scope ends.
///
/// The first registered body pushes one mark on the thread's scope-guard stack; the mark
/// is popped after the last body ran. A scope with no bodies never touches the runtime.
pub struct GuardScope<'a> {
    site: Site,
    mark: Option<u64>,
    bodies: SmallVec<[(GuardFlavor, GuardBody<'a>); 4]>,
    unwinding_at_entry: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> GuardScope<'a> {
    /// Creates an empty scope at the caller's location.
    #[must_use]
    #[track_caller]
    pub fn new() -> Self {
        Self::at(Site::caller("guard scope"))
    }

    /// Creates an empty scope at `site`.
    #[must_use]
    pub fn at(site: Site) -> Self {
        GuardScope {
            site,
            mark: None,
            bodies: SmallVec::new(),
            unwinding_at_entry: thread::panicking(),
            _not_send: PhantomData,
        }
    }

    /// Registers `body` to run on the exit paths selected by `flavor`.
    pub fn register<F>(&mut self, flavor: GuardFlavor, body: F)
    where
        F: FnOnce() + 'a,
    {
        if self.mark.is_none() {
            let site = self.site;
            self.mark = Some(with_context(|ctx| ctx.push_guard_mark(site)));
        }
        self.bodies.push((flavor, Box::new(body)));
    }

    /// Registers `body` to run on every exit.
    pub fn on_exit<F: FnOnce() + 'a>(&mut self, body: F) {
        self.register(GuardFlavor::Always, body);
    }

    /// Registers `body` to run on normal exits only.
    pub fn on_success<F: FnOnce() + 'a>(&mut self, body: F) {
        self.register(GuardFlavor::Success, body);
    }

    /// Registers `body` to run while unwinding only.
    pub fn on_failure<F: FnOnce() + 'a>(&mut self, body: F) {
        self.register(GuardFlavor::Failure, body);
    }

    /// Returns the number of registered bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns `true` if no body is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    fn run_body(&self, mark: u64, body: GuardBody<'a>) {
        with_context(|ctx| ctx.push_guard_dispatch(mark));
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
            let reason = match current_exception() {
                Some(exception) if is_raise(&*payload) => exception.to_string(),
                _ => panic_message(&*payload),
            };
            fatal(
                &corrupted_error!(
                    "guard body registered at {} did not complete: {}",
                    self.site,
                    reason
                ),
                None,
            );
        }
        with_context(|ctx| ctx.pop_dispatch(mark, DispatchPurpose::Guard));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

impl Default for GuardScope<'_> {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuardScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardScope")
            .field("site", &self.site)
            .field("mark", &self.mark)
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        let Some(mark) = self.mark else {
            return;
        };
        if is_poisoned() {
            return;
        }

        let unwinding = thread::panicking() && !self.unwinding_at_entry;
        let mut bodies = std::mem::take(&mut self.bodies);
        while let Some((flavor, body)) = bodies.pop() {
            if flavor.applies(unwinding) {
                self.run_body(mark, body);
            }
        }
        with_context(|ctx| ctx.pop_guard_mark(mark));
    }
}
