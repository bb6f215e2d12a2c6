//! Kind identifiers and the slots that hold them.
//!
//! An [`ErrorKind`] is the integer identity of an exception family. Consumers usually
//! never construct one by hand: they declare a `static` [`KindSlot`] per family and
//! register it once at startup, after which the slot resolves to the assigned id.
//!
//! ```rust
//! use exscope::kind::{declare_kind, KindSlot};
//!
//! static IO_FAILURE: KindSlot = KindSlot::new();
//!
//! // A slot that names itself as parent becomes a root
//! let id = declare_kind(&IO_FAILURE, &IO_FAILURE, "IoFailure", "I/O failed")?;
//! assert_eq!(IO_FAILURE.get(), Some(id));
//! # Ok::<(), exscope::Error>(())
//! ```

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

/// Number of ids at the bottom of the id space that are never valid kinds.
///
/// Id 0 means "fell through normally" and id 1 means "forwarded" in the dispatch
/// protocol, so neither can ever identify a raised exception.
pub const SENTINEL_KINDS: u32 = 2;

/// First id handed out to a kind declared by a consumer.
///
/// Ids between [`SENTINEL_KINDS`] and this value belong to the reserved mechanism kinds.
pub const FIRST_USER_KIND: u32 = 5;

/// Integer identity of an exception family.
///
/// Ordering and hashing follow the raw id, which reflects registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorKind(u32);

impl ErrorKind {
    /// Raised by a protected region that detects an illegal escape from a nested region.
    pub const ILLEGAL_ESCAPE: ErrorKind = ErrorKind(2);

    /// Identifies a per-thread stack that reached its capacity.
    pub const STACK_EXHAUSTED: ErrorKind = ErrorKind(3);

    /// Identifies underflow or depth corruption of a per-thread stack.
    pub const STACK_CORRUPTED: ErrorKind = ErrorKind(4);

    /// Wraps a raw id, rejecting the reserved sentinels.
    ///
    /// # Arguments
    ///
    /// * `id` - The raw kind id
    ///
    /// # Returns
    ///
    /// `None` for ids 0 and 1, the wrapped kind otherwise. Whether the id is actually
    /// registered is a question for the [`KindTable`](super::KindTable).
    #[must_use]
    pub const fn from_raw(id: u32) -> Option<ErrorKind> {
        if id < SENTINEL_KINDS {
            None
        } else {
            Some(ErrorKind(id))
        }
    }

    pub(crate) const fn new_unchecked(id: u32) -> ErrorKind {
        ErrorKind(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Returns `true` for the kinds reserved by the runtime itself.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < FIRST_USER_KIND
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage for the id assigned to a kind at registration.
///
/// The slot is `const`-constructible so it can live in a `static`. It reads as
/// unregistered until [`KindTable::register`](super::KindTable::register) assigns it,
/// after which the id never changes.
pub struct KindSlot {
    id: AtomicU32,
}

impl KindSlot {
    /// Creates an unregistered slot.
    #[must_use]
    pub const fn new() -> Self {
        KindSlot {
            id: AtomicU32::new(0),
        }
    }

    /// Returns the assigned kind, or `None` while unregistered.
    #[must_use]
    pub fn get(&self) -> Option<ErrorKind> {
        ErrorKind::from_raw(self.id.load(Ordering::Acquire))
    }

    /// Returns `true` once the slot has been registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.get().is_some()
    }

    pub(crate) fn set(&self, kind: ErrorKind) {
        self.id.store(kind.id(), Ordering::Release);
    }
}

impl Default for KindSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KindSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(kind) => f.debug_tuple("KindSlot").field(&kind).finish(),
            None => f.write_str("KindSlot(<unregistered>)"),
        }
    }
}

/// Anything that names an exception kind: a resolved [`ErrorKind`] or a [`KindSlot`].
///
/// Catch clauses and raise sites accept either form.
pub trait KindRef {
    /// Resolves to the kind id, or `None` if the kind is not registered yet.
    fn resolve(&self) -> Option<ErrorKind>;
}

impl KindRef for ErrorKind {
    fn resolve(&self) -> Option<ErrorKind> {
        Some(*self)
    }
}

impl KindRef for KindSlot {
    fn resolve(&self) -> Option<ErrorKind> {
        self.get()
    }
}

impl<K: KindRef + ?Sized> KindRef for &K {
    fn resolve(&self) -> Option<ErrorKind> {
        (**self).resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_rejected() {
        assert_eq!(ErrorKind::from_raw(0), None);
        assert_eq!(ErrorKind::from_raw(1), None);
        assert_eq!(ErrorKind::from_raw(2), Some(ErrorKind::ILLEGAL_ESCAPE));
    }

    #[test]
    fn test_slot_lifecycle() {
        let slot = KindSlot::new();
        assert!(!slot.is_registered());
        assert_eq!(slot.resolve(), None);

        slot.set(ErrorKind::new_unchecked(7));
        assert_eq!(slot.get().map(ErrorKind::id), Some(7));
        assert_eq!((&slot).resolve(), slot.get());
    }

    #[test]
    fn test_reserved_range() {
        assert!(ErrorKind::STACK_CORRUPTED.is_reserved());
        assert!(!ErrorKind::new_unchecked(FIRST_USER_KIND).is_reserved());
    }
}
