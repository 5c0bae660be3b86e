//! Data types, split by where they live:
//!
//! - [`api`]: request and response bodies.
//! - [`common`]: types shared by the API and the database, e.g. the closed
//!   candidate enums.
//! - [`db`]: documents as stored in MongoDB, plus the operations on them.
//! - [`mongodb`]: glue for talking to the database.

pub mod api;
pub mod common;
pub mod db;
pub mod mongodb;
