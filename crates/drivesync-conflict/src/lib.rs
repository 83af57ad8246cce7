//! DriveSync Conflict - Conflict resolution
//!
//! Provides:
//! - Glob-based policy rules choosing a resolution strategy per path
//! - Conflict copy naming for keep-both outcomes
//! - A resolver turning conflict records into concrete actions

pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use error::ConflictPolicyError;
pub use namer::ConflictNamer;
pub use policy::{ConflictRule, PolicyEngine, Strategy};
pub use resolver::{ConflictResolver, ResolvedConflict};
