//! The exception runtime.
//!
//! Everything in here operates on the calling thread's [`ThreadContext`], created with
//! [`thread::init`](crate::thread::init). Threads never share runtime state: an exception
//! raised on one thread can only be caught on that thread.
//!
//! # Key Components
//!
//! - [`region`] - Protected regions, catch clauses, [`raise`](region::raise) and explicit
//!   regions with escape detection
//! - [`guard`] - Scope guards running cleanup on every exit path
//! - [`trace`] - Traced calls, trace capture and frame annotation
//! - [`frames`] - The frame stack and trace rendering
//! - [`record`] - Exception records and the public [`Exception`] view
//! - [`context`] - The per-thread stacks and their reconciliation
//!
//! # Unwinding
//!
//! Raising unwinds the native stack with a private payload, so builds must keep
//! `panic = "unwind"`. Panics from other sources pass through protected regions
//! untouched apart from the cleanup they trigger.

pub mod context;
pub mod fatal;
pub mod frames;
pub mod guard;
pub mod record;
pub mod region;
pub mod trace;

pub use context::{
    Depths, DispatchMark, DispatchPurpose, GuardMark, RegionMark, RegionState, StackKind,
    StackSet, ThreadContext,
};
pub use fatal::{exit_process, is_poisoned, Termination, TerminationKind, Terminator};
pub use frames::{FrameInfo, FrameStack, Reconciled, Site};
pub use guard::{GuardFlavor, GuardScope};
pub use record::{Exception, ExceptionRecord, ExceptionStack, TraceRef};
pub use region::{current_exception, protect, raise, raise_at, Protected, RegionGuard};
pub use trace::{annotate, capture_trace, print_trace, CallSite};
