//! HTTP request validation and response bodies

/// Compiled JSON schemas for incoming requests
pub mod schema;
/// Typed request and response bodies
pub mod message;
