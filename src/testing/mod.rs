//! Testing infrastructure for qreport.
//!
//! - **Mocks**: test doubles for the git seam ([`MockGitRunner`]); the LLM
//!   double is [`crate::llm::MockLlmClient`]
//! - **Fixtures**: temporary project directories with sample exports
//!   (test builds only)

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
