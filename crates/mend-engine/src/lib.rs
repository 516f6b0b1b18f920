//! The fix pipeline: generate patches, validate them, apply them with
//! backups and roll them back.

pub mod applier;
pub mod generator;
pub mod validator;

pub use applier::{ApplyError, ApplyOptions, AppliedImplementation, PatchApplier};
pub use generator::{GenerationContext, PatchGenerator};
pub use validator::{FsSources, PatchValidator, SourceLookup};
