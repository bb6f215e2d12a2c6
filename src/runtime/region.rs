//! Protected regions and raising.
//!
//! A protected region runs a body and dispatches any exception raised inside it to an
//! ordered list of catch clauses:
//!
//! ```rust,no_run
//! use exscope::{kind::{declare_kind, KindSlot}, raise, region::protect, thread};
//!
//! static PARSE_ERROR: KindSlot = KindSlot::new();
//!
//! declare_kind(&PARSE_ERROR, &PARSE_ERROR, "ParseError", "could not parse")?;
//! let handle = thread::init()?;
//!
//! let value = protect(|| -> u32 { raise!(PARSE_ERROR, "unexpected token '{}'", ';') })
//!     .catch(&PARSE_ERROR, |exception| {
//!         eprintln!("{exception}");
//!         0
//!     })
//!     .run();
//! assert_eq!(value, 0);
//!
//! handle.shutdown()?;
//! # Ok::<(), exscope::Error>(())
//! ```
//!
//! # Protocol
//!
//! Entering pushes a region mark, a dispatch mark and a frame. A raise records the
//! exception on the thread's exception stack and unwinds with a private payload to the
//! innermost region, whose clauses are tested in order with
//! [`is_a`](crate::kind::is_a). The first match pops the dispatch mark and runs its
//! handler, so a handler that raises propagates outward like any other code. Unmatched
//! exceptions are forwarded to the enclosing region with their original trace, and
//! terminate the program once no region is left. Cleanup runs exactly once on every
//! path. Panics that did not come from [`raise`] are never matched: cleanup runs and the
//! panic continues unchanged.
//!
//! # Explicit Regions
//!
//! [`enter_region!`](crate::enter_region) opens a lexical region that does not catch but
//! must be closed with [`RegionGuard::end`]. Leaving it any other way (`break`, `return`
//! or `?`) is detected when the guard is dropped: the stacks are restored and the
//! nearest protected region raises the configured escape kind once its body completes.
//! If that body exits by an exception instead, the exception wins and the escape is
//! logged and dropped.

use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    thread,
};

use smallvec::SmallVec;

use crate::{
    kind::KindRef,
    runtime::{
        context::{try_with_context, with_context, RegionTicket},
        fatal::{fatal, is_poisoned, uncaught},
        frames::Site,
        record::Exception,
    },
    Error,
};

/// Unwind payload of a raise; the exception itself lives on the exception stack.
struct Thrown;

/// Returns `true` if an unwind payload came from a raise.
pub(crate) fn is_raise(payload: &(dyn Any + Send)) -> bool {
    payload.is::<Thrown>()
}

struct Clause<'a, T> {
    kind: &'a dyn KindRef,
    handler: Box<dyn FnOnce(Exception) -> T + 'a>,
}

/// A protected region under construction.
///
/// Created by [`protect`], configured with [`catch`](Self::catch), executed by
/// [`run`](Self::run) or [`try_run`](Self::try_run).
#[must_use = "a protected region does nothing until it is run"]
pub struct Protected<'a, T, B> {
    body: B,
    clauses: SmallVec<[Clause<'a, T>; 4]>,
    site: Site,
}

/// Starts a protected region around `body`.
///
/// The region's frame records the caller's location.
#[track_caller]
pub fn protect<'a, T, B>(body: B) -> Protected<'a, T, B>
where
    B: FnOnce() -> T,
{
    Protected {
        body,
        clauses: SmallVec::new(),
        site: Site::caller("protected region"),
    }
}

impl<'a, T, B> Protected<'a, T, B>
where
    B: FnOnce() -> T,
{
    /// Labels the region's frame in traces.
    pub fn named(mut self, label: &'static str) -> Self {
        self.site.function = label;
        self
    }

    /// Adds a catch clause for `kind` and its descendants.
    ///
    /// Clauses are tested in the order they were added and only the first match runs.
    /// A clause whose kind is not registered when the exception arrives never matches.
    pub fn catch<K, H>(mut self, kind: &'a K, handler: H) -> Self
    where
        K: KindRef + 'a,
        H: FnOnce(Exception) -> T + 'a,
    {
        self.clauses.push(Clause {
            kind,
            handler: Box::new(handler),
        });
        self
    }

    /// Runs the region, forwarding unmatched exceptions to the enclosing region.
    ///
    /// An unmatched exception with no enclosing region terminates the program.
    pub fn run(self) -> T {
        match self.try_run() {
            Ok(value) => value,
            Err(exception) => forward(exception),
        }
    }

    /// Runs the region, returning unmatched exceptions instead of forwarding them.
    ///
    /// The region is fully cleaned up when this returns, so the exception can be
    /// inspected, converted or passed to [`Exception::rethrow`].
    ///
    /// # Errors
    ///
    /// Returns the raised [`Exception`] if no clause matched it.
    pub fn try_run(self) -> Result<T, Exception> {
        let Protected {
            body,
            clauses,
            site,
        } = self;

        let ticket = with_context(|ctx| ctx.enter_region(site, false));
        let mut exit = RegionExit::new(ticket);

        let exception = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => match with_context(|ctx| ctx.claim_escape(&ticket)) {
                None => {
                    exit.finish();
                    return Ok(value);
                }
                Some(exception) => exception,
            },
            Err(payload) if is_raise(&*payload) => {
                with_context(|ctx| ctx.catch_in_flight(&ticket))
            }
            Err(payload) => panic::resume_unwind(payload),
        };

        let matched = clauses
            .into_iter()
            .find(|clause| exception.is_a(clause.kind));
        match matched {
            Some(clause) => {
                with_context(|ctx| ctx.begin_handling(&ticket));
                let value = (clause.handler)(exception);
                exit.finish();
                Ok(value)
            }
            None => {
                exit.finish();
                Err(exception)
            }
        }
    }
}

/// Cleans up a region that is left by unwinding.
struct RegionExit {
    ticket: RegionTicket,
    armed: bool,
}

impl RegionExit {
    fn new(ticket: RegionTicket) -> Self {
        RegionExit {
            ticket,
            armed: true,
        }
    }

    fn finish(&mut self) {
        self.armed = false;
        with_context(|ctx| ctx.leave_region(&self.ticket, false));
    }
}

impl Drop for RegionExit {
    fn drop(&mut self) {
        if self.armed && !is_poisoned() {
            with_context(|ctx| ctx.leave_region(&self.ticket, true));
        }
    }
}

/// Raises `kind` with `message`, recording the caller's file and line.
///
/// An empty message is replaced by the kind's default message. A function cannot name
/// its caller, so the raise site is attributed to `<unknown>` and traces read
/// `in <unknown>` for it. Use [`raise!`](crate::raise) to record the enclosing function
/// name, or [`raise_at`] with a [`Site`] carrying a label of your choice.
#[track_caller]
pub fn raise<K: KindRef + ?Sized>(kind: &K, message: &str) -> ! {
    raise_at(kind, Site::caller("<unknown>"), format_args!("{message}"))
}

/// Raises `kind` from `site` with a formatted message.
///
/// Unwinds to the innermost protected region on this thread, or terminates the program
/// with an uncaught-exception report if there is none. Raising an unregistered kind or
/// raising on a thread without a context is fatal.
pub fn raise_at<K: KindRef + ?Sized>(kind: &K, site: Site, args: fmt::Arguments<'_>) -> ! {
    let Some(kind) = kind.resolve() else {
        fatal(&Error::KindNotRegistered, None)
    };
    match with_context(|ctx| ctx.raise(kind, site, args)) {
        None => panic::resume_unwind(Box::new(Thrown)),
        Some(exception) => uncaught(&exception),
    }
}

/// Raises an existing exception again, keeping its trace.
pub(crate) fn forward(exception: Exception) -> ! {
    match with_context(|ctx| ctx.forward(exception)) {
        None => panic::resume_unwind(Box::new(Thrown)),
        Some(exception) => uncaught(&exception),
    }
}

/// Returns the most recent exception that is still live on this thread.
///
/// Inside a catch handler this is the exception being handled. Returns `None` when no
/// exception is live or the thread has no context.
#[must_use]
pub fn current_exception() -> Option<Exception> {
    try_with_context(|ctx| {
        Ok(ctx
            .exceptions()
            .top()
            .map(|record| record.to_exception(ctx.frames())))
    })
    .ok()
    .flatten()
}

/// An explicit region that must be closed with [`end`](Self::end).
///
/// Usually opened with [`enter_region!`](crate::enter_region). The region does not
/// catch: it exists so that a non-local exit from it can be detected and reported.
#[must_use = "dropping a region guard without calling `end` is reported as an illegal escape"]
pub struct RegionGuard {
    ticket: RegionTicket,
    closed: bool,
    unwinding_at_entry: bool,
    _not_send: PhantomData<*const ()>,
}

impl RegionGuard {
    /// Opens an explicit region at the caller's location.
    #[track_caller]
    pub fn enter() -> Self {
        Self::enter_at(Site::caller("region"))
    }

    /// Opens an explicit region at `site`.
    pub fn enter_at(site: Site) -> Self {
        RegionGuard {
            ticket: with_context(|ctx| ctx.enter_region(site, true)),
            closed: false,
            unwinding_at_entry: thread::panicking(),
            _not_send: PhantomData,
        }
    }

    /// Closes the region, checking that every stack is back at its entry depth.
    pub fn end(mut self) {
        self.closed = true;
        with_context(|ctx| ctx.leave_region(&self.ticket, false));
    }
}

impl fmt::Debug for RegionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionGuard")
            .field("id", &self.ticket.id)
            .field("site", &self.ticket.site)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        if self.closed || is_poisoned() {
            return;
        }
        if thread::panicking() && !self.unwinding_at_entry {
            with_context(|ctx| ctx.leave_region(&self.ticket, true));
        } else {
            with_context(|ctx| ctx.escape_region(&self.ticket));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        kind::{declare_kind, ErrorKind, KindSlot},
        runtime::frames::FrameInfo,
        thread, Result,
    };

    static ROOT: KindSlot = KindSlot::new();
    static IO: KindSlot = KindSlot::new();
    static PARSE: KindSlot = KindSlot::new();

    fn kinds() -> Result<()> {
        declare_kind(&ROOT, &ROOT, "RegionTestRoot", "root failure")?;
        declare_kind(&IO, &ROOT, "RegionTestIo", "i/o failure")?;
        declare_kind(&PARSE, &ROOT, "RegionTestParse", "")?;
        Ok(())
    }

    #[test]
    fn test_fall_through() -> Result<()> {
        let handle = thread::init()?;
        let value = protect(|| 7).catch(&ROOT, |_| 0).run();
        assert_eq!(value, 7);
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_first_matching_clause_runs_once() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;
        let calls = Cell::new(0);

        let message = protect(|| -> String { raise(&IO, "disk gone") })
            .catch(&PARSE, |_| unreachable!("parse clause"))
            .catch(&IO, |e| {
                calls.set(calls.get() + 1);
                e.message().to_string()
            })
            .catch(&ROOT, |_| unreachable!("later clause"))
            .run();

        assert_eq!(message, "disk gone");
        assert_eq!(calls.get(), 1);
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_default_message() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;
        let message = protect(|| -> String { raise(&IO, "") })
            .catch(&ROOT, |e| e.message().to_string())
            .run();
        assert_eq!(message, "i/o failure");
        handle.shutdown()
    }

    #[test]
    fn test_raise_site_attribution() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let line = line!() + 1;
        let plain = protect(|| -> FrameInfo { raise(&IO, "plain") })
            .catch(&IO, |e| e.origin().clone())
            .run();
        assert_eq!(plain.function, "<unknown>");
        assert_eq!(plain.file, file!());
        assert_eq!(plain.line, line);

        let labelled = protect(|| -> FrameInfo {
            raise_at(&IO, Site::new(file!(), 7, "load_index"), format_args!("labelled"))
        })
        .catch(&IO, |e| e.origin().clone())
        .run();
        assert_eq!(labelled.function, "load_index");
        assert_eq!(labelled.line, 7);
        handle.shutdown()
    }

    #[test]
    fn test_unmatched_propagates_unchanged() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let (kind, line) = protect(|| {
            protect(|| -> (ErrorKind, u32) { raise(&PARSE, "bad token") })
                .catch(&IO, |_| unreachable!("wrong kind"))
                .run()
        })
        .catch(&ROOT, |e| (e.kind(), e.origin().line))
        .run();

        assert_eq!(Some(kind), PARSE.get());
        assert!(line > 0);
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_try_run_returns_unmatched() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let outcome = protect(|| -> u8 { raise(&PARSE, "eof") }).try_run();
        let exception = outcome.expect_err("nothing catches parse errors");
        assert_eq!(exception.message(), "eof");
        assert_eq!(exception.name(), "RegionTestParse");
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_handler_raise_reaches_outer_region() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let message = protect(|| {
            protect(|| -> String { raise(&IO, "first") })
                .catch(&IO, |_| raise(&PARSE, "second"))
                .run()
        })
        .catch(&PARSE, |e| e.message().to_string())
        .run();

        assert_eq!(message, "second");
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_rethrow_keeps_trace() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let exception = protect(|| -> u32 {
            protect(|| -> u32 { raise(&IO, "lost") })
                .named("inner")
                .catch(&IO, |e| e.rethrow())
                .run()
        })
        .named("outer")
        .try_run()
        .expect_err("rethrown past the outer region");

        assert_eq!(exception.message(), "lost");
        let functions: Vec<_> = exception.frames().iter().map(|f| f.function).collect();
        assert_eq!(functions, ["outer", "inner"]);
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_current_exception_inside_handler() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let seen = protect(|| -> Option<Exception> { raise(&IO, "peek") })
            .catch(&IO, |_| current_exception())
            .run();
        assert_eq!(seen.map(|e| e.message().to_string()), Some("peek".to_string()));
        assert!(current_exception().is_none());
        handle.shutdown()
    }

    #[test]
    fn test_foreign_panic_is_not_caught() -> Result<()> {
        kinds()?;
        let handle = thread::init()?;

        let outcome = panic::catch_unwind(|| {
            protect(|| -> u8 { panic!("not an exception") })
                .catch(&ROOT, |_| 1)
                .run()
        });
        assert!(outcome.is_err());
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_explicit_region_escape_is_raised() -> Result<()> {
        let handle = thread::init()?;

        let kind = protect(|| {
            for _ in 0..3 {
                let region = RegionGuard::enter();
                if thread::depths().map(|d| d.regions).unwrap_or(0) > 0 {
                    break;
                }
                region.end();
            }
            None
        })
        .catch(&ErrorKind::ILLEGAL_ESCAPE, |e| Some(e.kind()))
        .run();

        assert_eq!(kind, Some(ErrorKind::ILLEGAL_ESCAPE));
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }

    #[test]
    fn test_explicit_region_closed_normally() -> Result<()> {
        let handle = thread::init()?;
        let region = RegionGuard::enter();
        assert_eq!(thread::depths()?.regions, 1);
        region.end();
        assert!(thread::depths()?.is_empty());
        handle.shutdown()
    }
}
