//! The append-only exception-kind table.
//!
//! Kinds form a forest: each entry stores the id of its parent, and a root is an entry
//! that names itself. The table is written during a single-threaded startup phase and
//! then read concurrently by every thread, so reads go through a lock-free
//! `boxcar::Vec` while writers are serialized behind a mutex.
//!
//! # Layout
//!
//! | Id | Entry |
//! |----|-------|
//! | 0, 1 | Sentinels, never valid kinds |
//! | 2 | [`ErrorKind::ILLEGAL_ESCAPE`] |
//! | 3 | [`ErrorKind::STACK_EXHAUSTED`] |
//! | 4 | [`ErrorKind::STACK_CORRUPTED`] |
//! | 5.. | Kinds declared by consumers, in registration order |
//!
//! The reserved mechanism kinds are roots of their own, so a catch clause for a
//! consumer's root kind never matches them.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Mutex, OnceLock,
};

use crate::{
    kind::slot::{ErrorKind, KindSlot, FIRST_USER_KIND, SENTINEL_KINDS},
    Error, Result,
};

/// A single registered kind.
#[derive(Debug)]
pub struct KindEntry {
    /// Id of the parent, equal to the own id for roots
    parent: AtomicU32,
    /// Display name, unset while the entry is a provisional root
    name: OnceLock<&'static str>,
    /// Message used when a raise site supplies none
    message: OnceLock<&'static str>,
    /// Set when the entry was created on behalf of an unregistered parent slot
    provisional: AtomicBool,
}

impl KindEntry {
    fn new(parent: u32, name: Option<&'static str>, message: Option<&'static str>) -> Self {
        let entry = KindEntry {
            parent: AtomicU32::new(parent),
            name: OnceLock::new(),
            message: OnceLock::new(),
            provisional: AtomicBool::new(name.is_none()),
        };
        if let Some(name) = name {
            let _ = entry.name.set(name);
        }
        if let Some(message) = message {
            let _ = entry.message.set(message);
        }
        entry
    }

    /// Returns the parent id.
    #[must_use]
    pub fn parent(&self) -> u32 {
        self.parent.load(Ordering::Acquire)
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name.get().copied().unwrap_or("<unnamed>")
    }

    /// Returns the default message.
    #[must_use]
    pub fn message(&self) -> &'static str {
        self.message.get().copied().unwrap_or("")
    }

    /// Returns `true` if the entry was auto-registered as a root for a parent slot and
    /// has not been declared explicitly yet.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.provisional.load(Ordering::Acquire)
    }
}

/// Append-only table of exception kinds.
///
/// Most consumers use the process-wide table through [`declare_kind`] and [`is_a`];
/// separate tables are useful for tests and tooling.
///
/// # Examples
///
/// ```rust
/// use exscope::kind::{KindSlot, KindTable};
///
/// let table = KindTable::new();
/// let (root, a, b) = (KindSlot::new(), KindSlot::new(), KindSlot::new());
///
/// let root_id = table.register(&root, &root, "Root", "")?;
/// let a_id = table.register(&a, &root, "A", "")?;
/// let b_id = table.register(&b, &a, "B", "")?;
///
/// assert!(table.is_a(b_id, root_id)?);
/// assert!(!table.is_a(root_id, a_id)?);
/// # Ok::<(), exscope::Error>(())
/// ```
#[derive(Debug)]
pub struct KindTable {
    entries: boxcar::Vec<KindEntry>,
    writer: Mutex<()>,
    sealed: AtomicBool,
}

impl Default for KindTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KindTable {
    /// Creates a table holding only the sentinels and the reserved mechanism kinds.
    #[must_use]
    pub fn new() -> Self {
        let entries = boxcar::Vec::with_capacity(32);
        entries.push(KindEntry::new(0, Some("<fell-through>"), None));
        entries.push(KindEntry::new(1, Some("<forwarded>"), None));
        entries.push(KindEntry::new(
            ErrorKind::ILLEGAL_ESCAPE.id(),
            Some("IllegalEscape"),
            Some("control left a protected region without closing it"),
        ));
        entries.push(KindEntry::new(
            ErrorKind::STACK_EXHAUSTED.id(),
            Some("StackExhausted"),
            Some("a runtime stack exceeded its capacity"),
        ));
        entries.push(KindEntry::new(
            ErrorKind::STACK_CORRUPTED.id(),
            Some("StackCorrupted"),
            Some("a runtime stack underflowed or lost its balance"),
        ));
        debug_assert_eq!(entries.count(), FIRST_USER_KIND as usize);

        KindTable {
            entries,
            writer: Mutex::new(()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Registers the kind held by `slot` under `parent`.
    ///
    /// Assigns the next sequential id. `parent` is taken by reference so that a slot naming
    /// itself as parent becomes a root; if `parent` is not registered yet it is first
    /// registered as a provisional root, which a later explicit registration of that slot
    /// completes with its own name, message and parent.
    ///
    /// Registering a slot that already holds a complete kind returns the existing id.
    ///
    /// # Arguments
    ///
    /// * `slot` - Receives the assigned id
    /// * `parent` - The parent kind's slot, or `slot` itself for a root
    /// * `name` - Display name used in reports
    /// * `message` - Message used when a raise site supplies none
    ///
    /// # Errors
    ///
    /// Returns [`Error::KindTableSealed`] after [`seal`](Self::seal), or
    /// [`Error::KindOutOfBounds`] if a slot holds an id from a different table.
    pub fn register(
        &self,
        slot: &KindSlot,
        parent: &KindSlot,
        name: &'static str,
        message: &'static str,
    ) -> Result<ErrorKind> {
        let _writer = self.writer.lock().map_err(|_| Error::LockError)?;
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::KindTableSealed(name));
        }

        if let Some(existing) = slot.get() {
            let entry = self.entry(existing)?;
            if entry.is_provisional() {
                let parent_id = self.resolve_parent(slot, parent)?.unwrap_or(existing);
                let _ = entry.name.set(name);
                let _ = entry.message.set(message);
                entry.parent.store(parent_id.id(), Ordering::Release);
                entry.provisional.store(false, Ordering::Release);
                log::debug!("completed provisional kind {existing} as '{name}'");
            }
            return Ok(existing);
        }

        let parent_id = self.resolve_parent(slot, parent)?;
        let id = self.append(parent_id, Some(name), Some(message));
        slot.set(id);
        log::debug!("registered kind {id} '{name}'");
        Ok(id)
    }

    /// Tests whether `candidate` is `ancestor` or descends from it.
    ///
    /// Walks the parent chain of `candidate`. The walk ends with `false` at a root, and is
    /// bounded by the table length so a cyclic chain cannot loop forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KindOutOfBounds`] if either id is a sentinel or not in the table.
    pub fn is_a(&self, candidate: ErrorKind, ancestor: ErrorKind) -> Result<bool> {
        self.entry(ancestor)?;
        let mut current = candidate;
        for _ in 0..self.len() {
            if current == ancestor {
                return Ok(true);
            }
            let parent = ErrorKind::new_unchecked(self.entry(current)?.parent());
            if parent == current {
                return Ok(false);
            }
            current = parent;
        }
        Ok(false)
    }

    /// Returns the entry for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KindOutOfBounds`] if the id is a sentinel or not in the table.
    pub fn entry(&self, kind: ErrorKind) -> Result<&KindEntry> {
        if kind.id() < SENTINEL_KINDS {
            return Err(Error::KindOutOfBounds(kind.id()));
        }
        self.entries
            .get(kind.id() as usize)
            .ok_or(Error::KindOutOfBounds(kind.id()))
    }

    /// Returns the parent of `kind`, which is `kind` itself for roots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KindOutOfBounds`] for ids outside the table.
    pub fn parent(&self, kind: ErrorKind) -> Result<ErrorKind> {
        Ok(ErrorKind::new_unchecked(self.entry(kind)?.parent()))
    }

    /// Returns the display name of `kind`, or `"<unknown>"` for ids outside the table.
    #[must_use]
    pub fn name(&self, kind: ErrorKind) -> &'static str {
        self.entry(kind).map_or("<unknown>", KindEntry::name)
    }

    /// Returns the default message of `kind`, empty for ids outside the table.
    #[must_use]
    pub fn default_message(&self, kind: ErrorKind) -> &'static str {
        self.entry(kind).map_or("", KindEntry::message)
    }

    /// Returns the number of ids in use, sentinels included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if no consumer kind has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= FIRST_USER_KIND as usize
    }

    /// Ends the startup phase; further registration fails.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Returns `true` once [`seal`](Self::seal) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Resolves the parent id, registering a provisional root for an unregistered parent.
    ///
    /// Returns `None` when the slot is its own parent.
    fn resolve_parent(&self, slot: &KindSlot, parent: &KindSlot) -> Result<Option<ErrorKind>> {
        if std::ptr::eq(slot, parent) {
            return Ok(None);
        }
        match parent.get() {
            Some(id) => {
                self.entry(id)?;
                Ok(Some(id))
            }
            None => {
                let id = self.append(None, None, None);
                parent.set(id);
                log::debug!("registered provisional root {id} for an undeclared parent");
                Ok(Some(id))
            }
        }
    }

    /// Appends an entry; `parent == None` makes it a root. Callers hold the writer lock.
    fn append(
        &self,
        parent: Option<ErrorKind>,
        name: Option<&'static str>,
        message: Option<&'static str>,
    ) -> ErrorKind {
        let next = self.entries.count() as u32;
        let parent = parent.map_or(next, ErrorKind::id);
        let index = self.entries.push(KindEntry::new(parent, name, message));
        debug_assert_eq!(index as u32, next);
        ErrorKind::new_unchecked(next)
    }
}

static REGISTRY: OnceLock<KindTable> = OnceLock::new();

/// Returns the process-wide kind table.
pub fn registry() -> &'static KindTable {
    REGISTRY.get_or_init(KindTable::new)
}

/// Declares a kind in the process-wide table.
///
/// See [`KindTable::register`].
///
/// # Errors
///
/// Returns [`Error::KindTableSealed`] once the table has been sealed.
pub fn declare_kind(
    slot: &KindSlot,
    parent: &KindSlot,
    name: &'static str,
    message: &'static str,
) -> Result<ErrorKind> {
    registry().register(slot, parent, name, message)
}

/// Tests ancestry in the process-wide table.
///
/// See [`KindTable::is_a`].
///
/// # Errors
///
/// Returns [`Error::KindOutOfBounds`] for ids outside the table.
pub fn is_a(candidate: ErrorKind, ancestor: ErrorKind) -> Result<bool> {
    registry().is_a(candidate, ancestor)
}

/// Seals the process-wide table at the end of startup.
pub fn seal() {
    registry().seal();
}
