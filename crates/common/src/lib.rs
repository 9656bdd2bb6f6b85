//! Common utilities shared across the session authentication crates.

#![warn(clippy::pedantic)]

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT structure utilities (size limit, segments, unsigned payload)
pub mod jwt;
