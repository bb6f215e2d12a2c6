use thiserror::Error;

macro_rules! corrupted_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Corrupted {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Corrupted {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this library reports through
/// [`Result`](crate::Result).
///
/// Most of these never reach user code directly: the runtime escalates any error that
/// signals a broken control-flow invariant (an empty-stack pop, an exhausted stack, a
/// depth mismatch) to process termination, because the bookkeeping stacks can no longer
/// be trusted once that happens. The primitives underneath ([`FreeStack`], [`KindTable`],
/// [`FrameStack`]) and the lifecycle calls return them as ordinary values so they can be
/// inspected and tested.
///
/// # Error Categories
///
/// ## Stack Errors
/// - [`Error::CapacityExceeded`] - A stack reached its configured limit
/// - [`Error::StackUnderflow`] - Pop on an empty stack
/// - [`Error::Exhausted`] - No spare node and no allocator supplied
/// - [`Error::Corrupted`] - Depth bookkeeping does not add up
///
/// ## Taxonomy Errors
/// - [`Error::KindOutOfBounds`] - Id is a sentinel or not in the table
/// - [`Error::KindTableSealed`] - Registration after the startup phase
/// - [`Error::KindNotRegistered`] - A slot was used before registration
///
/// ## Lifecycle Errors
/// - [`Error::AlreadyInitialized`] - Process-wide init called twice
/// - [`Error::ContextMissing`] - Thread context not initialized
/// - [`Error::ContextActive`] - Thread context initialized twice
/// - [`Error::Unbalanced`] - Shutdown with live regions, guards or frames
///
/// # Examples
///
/// ```rust
/// use exscope::{utils::FreeStack, Error};
///
/// let mut stack: FreeStack<u32> = FreeStack::new();
/// match stack.pop() {
///     Err(Error::StackUnderflow { stack }) => println!("{stack} was empty"),
///     other => println!("unexpected: {other:?}"),
/// }
/// ```
///
/// [`FreeStack`]: crate::utils::FreeStack
/// [`KindTable`]: crate::kind::KindTable
/// [`FrameStack`]: crate::runtime::FrameStack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A stack reached its configured maximum depth.
    ///
    /// Every per-thread stack is bounded by [`StackLimits`](crate::config::StackLimits).
    /// Hitting the bound usually means unbounded recursion through protected regions.
    #[error("Stack '{stack}' exceeded its capacity of {limit} entries")]
    CapacityExceeded {
        /// Name of the stack that overflowed
        stack: &'static str,
        /// The configured limit
        limit: usize,
    },

    /// Pop was requested on an empty stack.
    ///
    /// Indicates corrupted push/pop pairing.
    #[error("Stack '{stack}' underflow - pop on an empty stack")]
    StackUnderflow {
        /// Name of the stack that was empty
        stack: &'static str,
    },

    /// No spare node is available and no allocator was supplied.
    #[error("Stack '{stack}' has no spare nodes")]
    Exhausted {
        /// Name of the stack that had no spare nodes
        stack: &'static str,
    },

    /// Stack depth bookkeeping is inconsistent.
    ///
    /// The error includes the source location where the inconsistency was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the inconsistency
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Corrupted - {file}:{line}: {message}")]
    Corrupted {
        /// The message to be printed for the Corrupted error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The kind id is a reserved sentinel or lies outside the kind table.
    #[error("Exception kind {0} is not in the kind table")]
    KindOutOfBounds(u32),

    /// Registration was attempted after the kind table was sealed.
    #[error("The kind table is sealed - cannot register '{0}'")]
    KindTableSealed(&'static str),

    /// A kind slot was used before it was registered.
    #[error("Exception kind slot was used before registration")]
    KindNotRegistered,

    /// The process-wide configuration was already installed.
    #[error("The runtime has already been initialized")]
    AlreadyInitialized,

    /// The current thread has no runtime context.
    ///
    /// Contexts are never created implicitly; call [`thread::init`](crate::thread::init).
    #[error("No runtime context on this thread")]
    ContextMissing,

    /// The current thread already owns a runtime context.
    #[error("A runtime context already exists on this thread")]
    ContextActive,

    /// The thread context was shut down while entries were still live.
    ///
    /// The associated string lists the stacks that were not empty.
    #[error("Thread context shut down with live entries on: {0}")]
    Unbalanced(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}
