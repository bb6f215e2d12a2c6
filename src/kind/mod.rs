//! Exception-kind taxonomy.
//!
//! Every raised exception carries an [`ErrorKind`]: the integer identity of a named
//! exception family. Kinds are registered once at startup with a parent, forming a tree
//! per root, and catch clauses match by ancestry through [`is_a`].
//!
//! # Key Components
//!
//! - [`ErrorKind`] - Integer identity of a kind; ids 0 and 1 are reserved sentinels
//! - [`KindSlot`] - `static`-friendly storage receiving the id at registration
//! - [`KindTable`] - Append-only table answering ancestry queries
//! - [`declare_kind`] / [`is_a`] / [`seal`] - The process-wide table
//!
//! # Example
//!
//! ```rust
//! use exscope::kind::{declare_kind, is_a, KindSlot};
//!
//! static APP_ERROR: KindSlot = KindSlot::new();
//! static PARSE_ERROR: KindSlot = KindSlot::new();
//!
//! let app = declare_kind(&APP_ERROR, &APP_ERROR, "AppError", "application error")?;
//! let parse = declare_kind(&PARSE_ERROR, &APP_ERROR, "ParseError", "could not parse")?;
//!
//! assert!(is_a(parse, app)?);
//! assert!(!is_a(app, parse)?);
//! # Ok::<(), exscope::Error>(())
//! ```

mod slot;
mod table;

pub use slot::{ErrorKind, KindRef, KindSlot, FIRST_USER_KIND, SENTINEL_KINDS};
pub use table::{declare_kind, is_a, registry, seal, KindEntry, KindTable};
