//! Database documents and the operations that mutate them.
//!
//! Each stored type comes in two flavours: a `...Core`/`New...` struct
//! without an ID, used for inserts, and the full document with its `_id`,
//! used for reads.

pub mod admin;
pub mod candidate;
pub mod ledger;
pub mod otp;
pub mod session;
pub mod voter;
