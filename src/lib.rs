// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # exscope
//!
//! Structured exception propagation and deterministic scope cleanup for Rust threads.
//!
//! `exscope` gives a thread try/catch/raise semantics over a hierarchy of exception
//! kinds, scope guards that run on every exit path, and call-site traces that survive
//! the unwinding they describe. All bookkeeping lives in five per-thread stacks that are
//! checked for balance at every region and traced-call boundary, so misuse such as
//! leaving a region with `break` is detected and reported instead of silently
//! corrupting state.
//!
//! ## Features
//!
//! - **Kind taxonomy** - Kinds declared once at startup with a parent; catch clauses
//!   match a kind and all of its descendants
//! - **Protected regions** - Ordered catch clauses, forwarding of unmatched exceptions,
//!   handlers that may raise again, and a `Result`-returning variant
//! - **Scope guards** - Cleanup bodies for every exit, normal exits or unwinding only
//! - **Traces** - Each exception carries the frames that were live when it was raised
//! - **Escape detection** - Explicit regions left without being closed are reported by
//!   the enclosing protected region
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exscope::prelude::*;
//!
//! static APP_ERROR: KindSlot = KindSlot::new();
//! static CONFIG_ERROR: KindSlot = KindSlot::new();
//!
//! fn read_port(text: &str) -> u16 {
//!     match text.parse() {
//!         Ok(port) => port,
//!         Err(_) => exscope::raise!(CONFIG_ERROR, "invalid port '{}'", text),
//!     }
//! }
//!
//! declare_kind(&APP_ERROR, &APP_ERROR, "AppError", "application error")?;
//! declare_kind(&CONFIG_ERROR, &APP_ERROR, "ConfigError", "invalid configuration")?;
//! seal();
//!
//! let handle = thread::init()?;
//! let port = protect(|| exscope::traced!(read_port("80a")))
//!     .catch(&APP_ERROR, |exception| {
//!         eprint!("{exception}\n{}", exception.trace());
//!         8080
//!     })
//!     .run();
//! assert_eq!(port, 8080);
//! handle.shutdown()?;
//! # Ok::<(), exscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`kind`] - The process-wide kind table
//! - [`region`] - Protected regions, raising, explicit regions
//! - [`guard`] - Scope guards
//! - [`trace`] - Traced calls and trace capture
//! - [`thread`] - Per-thread context lifecycle
//! - [`config`] - Process-wide configuration
//! - [`runtime`] - Stacks, records and termination underneath the above
//! - [`utils`] - The free-list stack every runtime stack is built on
//!
//! ## Failure Model
//!
//! Exceptions are for conditions the program handles. Violations of the runtime's own
//! invariants (an exhausted stack, an unbalanced region, a guard body that raises, a
//! raise on a thread without context) are not exceptions: they invoke the configured
//! [`Terminator`](runtime::Terminator) with a diagnostic report. So does an exception
//! that no region catches. The default terminator prints the report to stderr and ends
//! the process.
//!
//! Raising requires unwinding; builds with `panic = "abort"` are not supported.

#[macro_use]
mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and functions.
///
/// # Example
///
/// ```rust,no_run
/// use exscope::prelude::*;
///
/// let handle = thread::init()?;
/// let value = protect(|| 42).run();
/// handle.shutdown()?;
/// # Ok::<(), exscope::Error>(())
/// ```
pub mod prelude;

pub mod config;
pub mod kind;
pub mod runtime;
pub mod thread;
pub mod utils;

pub use runtime::{frames, guard, region, trace};

/// `exscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `exscope` Error type
///
/// Reports failures of the primitives and the lifecycle calls. Broken runtime invariants are
/// escalated to termination instead.
pub use error::Error;

/// Installs the process-wide configuration.
///
/// Call once at startup, before the first [`thread::init`]. Threads created without an
/// installed configuration use [`RuntimeConfig::default()`](config::RuntimeConfig).
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] if a configuration is already in place, either
/// from an earlier call or because a thread context was created first.
///
/// # Examples
///
/// ```rust,no_run
/// use exscope::config::RuntimeConfig;
///
/// exscope::init(RuntimeConfig::compact())?;
/// # Ok::<(), exscope::Error>(())
/// ```
pub fn init(config: config::RuntimeConfig) -> Result<()> {
    config::install(config)?;
    let registry = kind::registry();
    log::debug!(
        "exscope initialized with {} registered kinds",
        registry.len()
    );
    Ok(())
}
