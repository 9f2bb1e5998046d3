#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Axon Chain Types
//!
//! This crate is the foundational library for the Axon chain, containing all
//! core data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `axon-types` has minimal dependencies and is itself a
//! dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `Block`, `ChainTransaction`, `Address`, and the
//! error enums.

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::ChainError> = std::result::Result<T, E>;

/// Core application-level data structures like `Block`, `Transaction`, and `Address`.
pub mod app;
/// The canonical, deterministic binary codec for consensus-critical state.
pub mod codec;
/// Shared chain and consensus configuration structures.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
