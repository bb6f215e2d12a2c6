//! Freelist-backed LIFO stack.
//!
//! Every per-thread bookkeeping stack of the runtime is built on [`FreeStack`]. The stack
//! keeps two sublists:
//!
//! - **used** - the live entries, top of stack last
//! - **unused** - popped entries kept around for reuse
//!
//! Pushing first recycles a node from the unused list and only falls back to an allocator
//! when none is left, so once a thread has reached its working depth no further
//! allocation happens. Recycled nodes keep their previous contents; callers overwrite the
//! fields they care about, which lets buffers such as `String` keep their capacity.
//!
//! # Complexity
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `try_alloc` / `alloc_with` | O(1) amortized |
//! | `pop` | O(1) |
//! | `truncate` | O(n) in the number of removed nodes |
//! | `get` / `top` | O(1) |
//!
//! # Example
//!
//! ```rust
//! use exscope::utils::FreeStack;
//!
//! let mut stack: FreeStack<String> = FreeStack::with_limit("names", 8);
//! stack.grow(vec![String::with_capacity(32)]);
//!
//! let slot = stack.try_alloc()?;
//! slot.clear();
//! slot.push_str("first");
//! assert_eq!(stack.depth(), 1);
//!
//! let popped = stack.pop()?;
//! assert_eq!(popped.as_str(), "first");
//! assert_eq!(stack.spare(), 1);
//! # Ok::<(), exscope::Error>(())
//! ```

use crate::{Error, Result};

/// A LIFO stack that recycles popped nodes.
///
/// See the [module documentation](self) for the reuse model.
#[derive(Debug, Clone)]
pub struct FreeStack<T> {
    /// Name used in error reports
    name: &'static str,
    /// Live entries, bottom first
    used: Vec<T>,
    /// Recycled entries available for reuse
    unused: Vec<T>,
    /// Maximum number of live entries
    limit: usize,
}

impl<T> Default for FreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FreeStack<T> {
    /// Creates an unnamed, unbounded stack.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit("stack", usize::MAX)
    }

    /// Creates a named stack holding at most `limit` live entries.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in error reports
    /// * `limit` - Maximum number of live entries
    #[must_use]
    pub fn with_limit(name: &'static str, limit: usize) -> Self {
        FreeStack {
            name,
            used: Vec::new(),
            unused: Vec::new(),
            limit,
        }
    }

    /// Returns the name used in error reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the maximum number of live entries.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.used.len()
    }

    /// Returns `true` if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Returns the number of recycled nodes waiting for reuse.
    #[must_use]
    pub fn spare(&self) -> usize {
        self.unused.len()
    }

    /// Donates caller-supplied nodes to the unused list.
    ///
    /// The stack never allocates nodes on its own; this is how a caller pre-sizes it.
    ///
    /// # Arguments
    ///
    /// * `storage` - Nodes to make available for reuse
    pub fn grow<I>(&mut self, storage: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.unused.extend(storage);
    }

    /// Pushes a recycled node and returns it for initialization.
    ///
    /// The node keeps whatever contents it had when it was popped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] at the limit, or [`Error::Exhausted`] if no
    /// spare node is available.
    pub fn try_alloc(&mut self) -> Result<&mut T> {
        self.check_capacity()?;
        match self.unused.pop() {
            Some(node) => Ok(self.push_node(node)),
            None => Err(Error::Exhausted { stack: self.name }),
        }
    }

    /// Pushes a recycled node, or a fresh one from `allocator` if none is spare.
    ///
    /// # Arguments
    ///
    /// * `allocator` - Creates a node when the unused list is empty
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] at the limit.
    pub fn alloc_with<F>(&mut self, allocator: F) -> Result<&mut T>
    where
        F: FnOnce() -> T,
    {
        self.check_capacity()?;
        let node = match self.unused.pop() {
            Some(node) => node,
            None => allocator(),
        };
        Ok(self.push_node(node))
    }

    /// Pushes a caller-owned node, bypassing the unused list.
    ///
    /// Used to put back an entry previously removed with [`take`](Self::take).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] at the limit.
    pub fn push(&mut self, node: T) -> Result<&mut T> {
        self.check_capacity()?;
        Ok(self.push_node(node))
    }

    /// Pops the top entry and returns a reference to it.
    ///
    /// The node moves to the unused list, so the reference stays valid until the stack
    /// is touched again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if the stack is empty.
    pub fn pop(&mut self) -> Result<&mut T> {
        match self.used.pop() {
            Some(node) => {
                self.unused.push(node);
                let len = self.unused.len();
                Ok(&mut self.unused[len - 1])
            }
            None => Err(Error::StackUnderflow { stack: self.name }),
        }
    }

    /// Pops entries until `depth` remain, returning how many were removed.
    pub fn truncate(&mut self, depth: usize) -> usize {
        let mut removed = 0;
        while self.used.len() > depth {
            if let Some(node) = self.used.pop() {
                self.unused.push(node);
                removed += 1;
            }
        }
        removed
    }

    /// Removes the top entry from the stack entirely, handing ownership to the caller.
    ///
    /// Unlike [`pop`](Self::pop) the node is not recycled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if the stack is empty.
    pub fn take(&mut self) -> Result<T> {
        self.used
            .pop()
            .ok_or(Error::StackUnderflow { stack: self.name })
    }

    /// Returns the top entry.
    #[must_use]
    pub fn top(&self) -> Option<&T> {
        self.used.last()
    }

    /// Returns the top entry mutably.
    pub fn top_mut(&mut self) -> Option<&mut T> {
        self.used.last_mut()
    }

    /// Returns the entry at `index`, counted from the bottom.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.used.get(index)
    }

    /// Returns the entry at `index` mutably, counted from the bottom.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.used.get_mut(index)
    }

    /// Iterates the live entries from the top of the stack toward the bottom.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.used.iter().rev()
    }

    /// Iterates the live entries mutably from the top toward the bottom.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> + ExactSizeIterator {
        self.used.iter_mut().rev()
    }

    /// Returns the live entries as a slice, bottom first.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.used
    }

    fn check_capacity(&self) -> Result<()> {
        if self.used.len() >= self.limit {
            return Err(Error::CapacityExceeded {
                stack: self.name,
                limit: self.limit,
            });
        }
        Ok(())
    }

    fn push_node(&mut self, node: T) -> &mut T {
        self.used.push(node);
        let len = self.used.len();
        &mut self.used[len - 1]
    }
}

impl<T: Default> FreeStack<T> {
    /// Pushes a recycled node or a default-constructed one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] at the limit.
    pub fn alloc(&mut self) -> Result<&mut T> {
        self.alloc_with(T::default)
    }

    /// Donates `count` default-constructed nodes to the unused list.
    pub fn reserve(&mut self, count: usize) {
        self.grow(std::iter::repeat_with(T::default).take(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_alloc_without_storage() {
        let mut stack: FreeStack<u32> = FreeStack::with_limit("empty", 4);
        assert!(matches!(
            stack.try_alloc(),
            Err(Error::Exhausted { stack: "empty" })
        ));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_grow_then_reuse() -> Result<()> {
        let mut stack: FreeStack<u32> = FreeStack::new();
        stack.grow([0, 0]);
        assert_eq!(stack.spare(), 2);

        *stack.try_alloc()? = 10;
        *stack.try_alloc()? = 20;
        assert_eq!(stack.spare(), 0);
        assert_eq!(stack.depth(), 2);

        assert_eq!(*stack.pop()?, 20);
        assert_eq!(stack.spare(), 1);

        // The recycled node keeps its contents until overwritten
        assert_eq!(*stack.try_alloc()?, 20);
        Ok(())
    }

    #[test]
    fn test_alloc_with_calls_allocator_only_when_empty() -> Result<()> {
        let mut stack: FreeStack<String> = FreeStack::new();
        let mut calls = 0;

        stack.alloc_with(|| {
            calls += 1;
            String::from("a")
        })?;
        stack.pop()?;
        stack.alloc_with(|| {
            calls += 1;
            String::from("b")
        })?;

        assert_eq!(calls, 1);
        assert_eq!(stack.top().map(String::as_str), Some("a"));
        Ok(())
    }

    #[test]
    fn test_pop_empty_is_underflow() {
        let mut stack: FreeStack<u8> = FreeStack::with_limit("frames", 2);
        assert_eq!(
            stack.pop().err(),
            Some(Error::StackUnderflow { stack: "frames" })
        );
        assert!(stack.take().is_err());
    }

    #[test]
    fn test_capacity_limit() -> Result<()> {
        let mut stack: FreeStack<u8> = FreeStack::with_limit("tiny", 2);
        stack.alloc()?;
        stack.alloc()?;
        assert_eq!(
            stack.alloc().err(),
            Some(Error::CapacityExceeded {
                stack: "tiny",
                limit: 2
            })
        );
        Ok(())
    }

    #[test]
    fn test_truncate_and_iteration_order() -> Result<()> {
        let mut stack: FreeStack<u8> = FreeStack::new();
        for value in 1..=5 {
            *stack.alloc()? = value;
        }

        let top_down: Vec<u8> = stack.iter().copied().collect();
        assert_eq!(top_down, vec![5, 4, 3, 2, 1]);
        assert_eq!(stack.get(0), Some(&1));

        assert_eq!(stack.truncate(2), 3);
        assert_eq!(stack.as_slice(), &[1, 2]);
        assert_eq!(stack.spare(), 3);
        assert_eq!(stack.truncate(4), 0);
        Ok(())
    }
}
