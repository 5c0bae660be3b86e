//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Field names are camelCase, as the web client expects.
//! - Closed sets (positions, years, branches) are parsed here, at the boundary.

pub mod admin;
pub mod auth;
pub mod candidate;
pub mod otp;
pub mod pagination;
pub mod student;
pub mod tally;
pub mod verification;
pub mod vote;
