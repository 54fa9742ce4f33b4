//! Forge client adapters.

pub mod gitlab;

pub use gitlab::GitLabForge;
