//! Shared error types for the jarcloak workspace.

/// Error types shared by every jarcloak crate.
pub mod errors;
