//! Termination for uncaught exceptions and broken runtime invariants.
//!
//! Both paths build a [`Termination`] report and hand it to the configured
//! [`Terminator`], which must not return. Before that, the thread is marked poisoned:
//! its stacks can no longer be trusted, so every region, guard and traced call that is
//! dropped afterwards (a terminator may unwind, for instance in tests) skips its
//! bookkeeping.

use std::cell::Cell;

use strum::Display;

use crate::{
    config,
    kind::{self, ErrorKind},
    runtime::record::Exception,
    Error,
};

/// Why the runtime is terminating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum TerminationKind {
    /// A raise reached the bottom of the thread with no region to catch it
    Uncaught,
    /// A runtime invariant was violated
    Fatal,
}

/// The report passed to a [`Terminator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    /// Why the runtime is terminating
    pub kind: TerminationKind,
    /// Kind that describes the failure: the raised kind, or a reserved mechanism kind
    pub error: ErrorKind,
    /// Human-readable diagnostic, trace included
    pub report: String,
}

/// Ends the process, or at least the thread, with a [`Termination`] report.
///
/// The default is [`exit_process`]. Tests install a terminator that panics with the
/// report as payload and observe it through `JoinHandle::join`.
pub type Terminator = fn(&Termination) -> !;

/// Default terminator: prints the report to stderr and ends the process.
///
/// Uncaught exceptions exit with status 1; fatal errors abort.
pub fn exit_process(termination: &Termination) -> ! {
    eprintln!("{}", termination.report);
    match termination.kind {
        TerminationKind::Uncaught => std::process::exit(1),
        TerminationKind::Fatal => std::process::abort(),
    }
}

thread_local! {
    static POISONED: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` once this thread has started terminating.
#[must_use]
pub fn is_poisoned() -> bool {
    POISONED.try_with(Cell::get).unwrap_or(true)
}

pub(crate) fn clear_poison() {
    let _ = POISONED.try_with(|poisoned| poisoned.set(false));
}

fn terminate(termination: Termination) -> ! {
    let _ = POISONED.try_with(|poisoned| poisoned.set(true));
    (config::current().terminator)(&termination)
}

/// Terminates on a broken runtime invariant.
///
/// Exhausted stacks are reported as [`ErrorKind::STACK_EXHAUSTED`], every other error as
/// [`ErrorKind::STACK_CORRUPTED`].
pub(crate) fn fatal(error: &Error, dump: Option<String>) -> ! {
    let kind = match error {
        Error::CapacityExceeded { .. } => ErrorKind::STACK_EXHAUSTED,
        _ => ErrorKind::STACK_CORRUPTED,
    };
    log::error!("fatal runtime error: {error}");

    let mut report = format!("fatal {}: {error}", kind::registry().name(kind));
    if let Some(dump) = dump {
        report.push('\n');
        report.push_str(&dump);
    }
    terminate(Termination {
        kind: TerminationKind::Fatal,
        error: kind,
        report,
    })
}

/// Terminates with an exception no region caught.
pub(crate) fn uncaught(exception: &Exception) -> ! {
    log::error!("uncaught exception {exception}");
    terminate(Termination {
        kind: TerminationKind::Uncaught,
        error: exception.kind(),
        report: format!(
            "uncaught exception {}: {}\n{}",
            exception.name(),
            exception.message(),
            exception.trace()
        ),
    })
}
