//! # exscope Prelude
//!
//! This module provides a convenient prelude for the types and functions used in almost
//! every program built on exscope: declaring kinds, protecting, raising, guarding and
//! tracing.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The error type for primitive and lifecycle operations
pub use crate::Error;

/// The result type used throughout exscope
pub use crate::Result;

/// Process-wide configuration
pub use crate::config::{RuntimeConfig, StackLimits};

// ================================================================================================
// Kinds
// ================================================================================================

/// Kind identities and the process-wide kind table
pub use crate::kind::{declare_kind, is_a, seal, ErrorKind, KindRef, KindSlot};

// ================================================================================================
// Regions, Guards and Traces
// ================================================================================================

/// Protected regions and raising
pub use crate::region::{current_exception, protect, raise, Protected, RegionGuard};

/// Exceptions as seen by handlers
pub use crate::runtime::Exception;

/// Scope guards
pub use crate::guard::{GuardFlavor, GuardScope};

/// Trace capture and annotation
pub use crate::trace::{annotate, capture_trace, print_trace, CallSite};

/// Per-thread lifecycle
pub use crate::thread::{self, ThreadHandle};
