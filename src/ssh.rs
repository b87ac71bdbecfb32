//! Authenticated remote sessions to the cluster login node

/// Private key decoding
pub mod key;
/// Session and connector traits, remote command rendering
pub mod session;
/// russh implementation of the session traits
pub mod client;
