//! # Festa Security
//!
//! Deletion of bot messages is reserved for a single configured principal.

pub mod allowlist;

pub use allowlist::PrincipalGuard;
