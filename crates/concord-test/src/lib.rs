//! Test harnesses for the Concord spec unifier.
//!
//! Provides `TestWorkspace` for in-process runs over a throwaway input tree
//! and CLI regression tests for the `concord` binary.

#[cfg(test)]
pub mod cli;
pub mod workspace;

pub use workspace::{TestError, TestWorkspace};
