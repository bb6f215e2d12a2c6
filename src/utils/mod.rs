//! Shared building blocks used by the runtime.
//!
//! # Key Components
//!
//! - [`FreeStack`] - Freelist-backed LIFO stack underlying every per-thread stack

mod freestack;

pub use freestack::FreeStack;
