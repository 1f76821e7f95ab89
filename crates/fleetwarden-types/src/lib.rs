//! Shared types for the Fleetwarden reliability layer.
//!
//! This crate defines the data models, configuration structs, and typed
//! errors used across the workspace. It carries no runtime logic beyond
//! validation and small helpers, so it compiles fast and can be depended
//! on by external integrations without pulling in the reliability layer.

pub mod error;
pub mod models;

pub use error::{ConfigError, ProxyError, SendError, StoreError, TypedError};
