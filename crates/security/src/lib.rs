//! Security for chatrelay: shared-token checks and session allowlists.
//!
//! Provides:
//! - **Token gate**: compares the caller's token with the configured one
//! - **Allowlists**: which sessions may use the bridge

pub mod allowlist;
pub mod gate;

pub use allowlist::SessionAllowlist;
pub use gate::{StaticAuthGate, normalize_token};
