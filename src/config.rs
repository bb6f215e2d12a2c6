//! Runtime configuration types.
//!
//! Configuration is process-wide and installed once, before any thread context is
//! created, through [`crate::init`]. Threads that start without an installed
//! configuration use [`RuntimeConfig::default()`].
//!
//! # Overview
//!
//! - [`RuntimeConfig`] - Top-level configuration container
//! - [`StackLimits`] - Capacity of each of the five per-thread stacks
//!
//! # Configuration Presets
//!
//! - [`RuntimeConfig::default()`] - General purpose limits
//! - [`RuntimeConfig::compact()`] - Small stacks for many short-lived threads
//! - [`RuntimeConfig::deep()`] - Deeply nested or recursive protected regions
//!
//! # Example
//!
//! ```rust,no_run
//! use exscope::config::{RuntimeConfig, StackLimits};
//!
//! let config = RuntimeConfig {
//!     limits: StackLimits::new().with_frames(4096).with_regions(512),
//!     message_limit: 256,
//!     ..RuntimeConfig::default()
//! };
//! exscope::init(config)?;
//! # Ok::<(), exscope::Error>(())
//! ```

use std::{fmt, sync::OnceLock};

use crate::{
    kind::KindSlot,
    runtime::{exit_process, Terminator},
    Error, Result,
};

/// Capacity of each per-thread stack.
///
/// Exceeding any of these is fatal: it signals runaway nesting rather than a condition
/// the program can recover from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackLimits {
    /// Maximum number of simultaneously open protected regions.
    pub regions: usize,

    /// Maximum number of simultaneously active dispatch points.
    ///
    /// Each protected region and each running guard body holds one.
    pub dispatch: usize,

    /// Maximum number of guard scopes with registered guards.
    pub guards: usize,

    /// Maximum depth of traced calls and regions in the frame stack.
    pub frames: usize,

    /// Maximum number of exception records alive at once.
    ///
    /// Records pile up when handlers raise while handling.
    pub exceptions: usize,
}

impl Default for StackLimits {
    fn default() -> Self {
        StackLimits {
            regions: 256,
            dispatch: 256,
            guards: 256,
            frames: 1024,
            exceptions: 64,
        }
    }
}

impl StackLimits {
    /// Creates the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates limits with every stack bounded by `limit`.
    #[must_use]
    pub fn uniform(limit: usize) -> Self {
        StackLimits {
            regions: limit,
            dispatch: limit,
            guards: limit,
            frames: limit,
            exceptions: limit,
        }
    }

    /// Sets the protected-region limit.
    #[must_use]
    pub fn with_regions(mut self, limit: usize) -> Self {
        self.regions = limit;
        self
    }

    /// Sets the dispatch limit.
    #[must_use]
    pub fn with_dispatch(mut self, limit: usize) -> Self {
        self.dispatch = limit;
        self
    }

    /// Sets the guard-scope limit.
    #[must_use]
    pub fn with_guards(mut self, limit: usize) -> Self {
        self.guards = limit;
        self
    }

    /// Sets the frame limit.
    #[must_use]
    pub fn with_frames(mut self, limit: usize) -> Self {
        self.frames = limit;
        self
    }

    /// Sets the exception-record limit.
    #[must_use]
    pub fn with_exceptions(mut self, limit: usize) -> Self {
        self.exceptions = limit;
        self
    }
}

/// Process-wide runtime configuration.
///
/// # Default Configuration
///
/// - 256 regions, dispatch points and guard scopes
/// - 1024 frames, 64 live exception records
/// - 16 nodes pre-allocated per stack on thread init
/// - 1024 byte message buffer
/// - Illegal escapes reported as [`ErrorKind::ILLEGAL_ESCAPE`](crate::kind::ErrorKind::ILLEGAL_ESCAPE)
/// - Termination through [`exit_process`]
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Capacity of each per-thread stack.
    pub limits: StackLimits,

    /// Nodes donated to each stack when a thread context is created.
    ///
    /// A thread that stays within this depth never allocates bookkeeping nodes.
    pub preallocate: usize,

    /// Capacity in bytes of the per-thread message buffer.
    ///
    /// Formatted raise messages are truncated to this length.
    pub message_limit: usize,

    /// Kind raised when a protected region detects an illegal escape.
    ///
    /// `None` raises the reserved `ILLEGAL_ESCAPE` kind. Pointing this at a consumer kind
    /// lets the consumer's own catch clauses report escapes.
    pub escape_kind: Option<&'static KindSlot>,

    /// Called for uncaught exceptions and fatal runtime errors. Never returns.
    pub terminator: Terminator,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            limits: StackLimits::default(),
            preallocate: 16,
            message_limit: 1024,
            escape_kind: None,
            terminator: exit_process,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("limits", &self.limits)
            .field("preallocate", &self.preallocate)
            .field("message_limit", &self.message_limit)
            .field("escape_kind", &self.escape_kind)
            .finish_non_exhaustive()
    }
}

impl RuntimeConfig {
    /// Small stacks for many short-lived threads.
    #[must_use]
    pub fn compact() -> Self {
        RuntimeConfig {
            limits: StackLimits::uniform(32),
            preallocate: 4,
            message_limit: 256,
            ..Self::default()
        }
    }

    /// Large stacks for deeply nested or recursive protected regions.
    #[must_use]
    pub fn deep() -> Self {
        RuntimeConfig {
            limits: StackLimits::uniform(4096).with_frames(16384),
            preallocate: 64,
            ..Self::default()
        }
    }

    /// Replaces the stack limits.
    #[must_use]
    pub fn with_limits(mut self, limits: StackLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replaces the terminator.
    #[must_use]
    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Reports illegal escapes with the given kind.
    #[must_use]
    pub fn with_escape_kind(mut self, kind: &'static KindSlot) -> Self {
        self.escape_kind = Some(kind);
        self
    }
}

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Installs the process-wide configuration.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] if a configuration is already installed, either
/// explicitly or because a thread context was created first.
pub(crate) fn install(config: RuntimeConfig) -> Result<()> {
    CONFIG.set(config).map_err(|_| Error::AlreadyInitialized)
}

/// Returns the installed configuration, installing the default on first use.
pub fn current() -> &'static RuntimeConfig {
    CONFIG.get_or_init(RuntimeConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_builders() {
        let limits = StackLimits::new()
            .with_regions(1)
            .with_dispatch(2)
            .with_guards(3)
            .with_frames(4)
            .with_exceptions(5);
        assert_eq!(
            limits,
            StackLimits {
                regions: 1,
                dispatch: 2,
                guards: 3,
                frames: 4,
                exceptions: 5,
            }
        );
    }

    #[test]
    fn test_presets() {
        assert_eq!(RuntimeConfig::compact().limits, StackLimits::uniform(32));
        assert_eq!(RuntimeConfig::deep().limits.frames, 16384);
        assert!(RuntimeConfig::default().escape_kind.is_none());
    }
}
