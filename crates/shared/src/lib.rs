// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Cashier Shared Module
//!
//! Pieces used by both the billing library and the API server:
//! the clock abstraction and Postgres pool/migration helpers.

pub mod clock;
pub mod db;

pub use clock::{Clock, FixedClock, SystemClock};
pub use db::{create_pool, run_migrations};
