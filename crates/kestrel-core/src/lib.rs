//! Core types, configuration, and error handling for Kestrel.
//!
//! This crate provides the shared foundation used by the other Kestrel
//! crates:
//! - [`KestrelError`] — unified error type using `thiserror`
//! - [`KestrelConfig`] — configuration loaded from `.kestrel.toml`
//! - Shared types: [`PullRequestRef`], [`Severity`], [`Finding`],
//!   [`ReviewComment`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{KestrelConfig, LlmConfig, ReviewConfig};
pub use error::KestrelError;
pub use types::{
    normalize_body, Finding, OutputFormat, PullRequestRef, ReviewComment, Severity,
};

/// A convenience `Result` type for Kestrel operations.
pub type Result<T> = std::result::Result<T, KestrelError>;
