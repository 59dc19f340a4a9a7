//! Shared error plumbing used across the bridgeway crates.

pub mod error;

pub use error::FromMessage;
