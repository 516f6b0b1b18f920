//! Core domain model and pure logic for mend.
//!
//! Nothing in this crate writes to disk: analysis, line transforms, syntax
//! checks and priority scoring all work on in-memory values.

pub mod analyzer;
pub mod bug;
pub mod error;
pub mod language;
pub mod model;
pub mod parser;
pub mod priority;
pub mod transform;

pub use bug::{BugKind, BugReport, Severity, Strategy};
pub use error::{InputError, TransformError};
pub use language::Language;
pub use model::*;
