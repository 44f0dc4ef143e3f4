//! Core vocabulary: configuration, error types and reputation entries.

pub mod config;
pub mod errors;
pub mod reputation;
