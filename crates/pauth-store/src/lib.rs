//! The storage abstraction: a narrow `UserStore`/`TokenStore` pair plus an
//! in-memory implementation of both, keyed the way the persisted documents
//! are keyed in §6 (`_id` = username / token).
//!
//! Every mutating method is document-atomic: it takes the guarding mutex for
//! its whole read-modify-write, so two primaries confirming two pairings for
//! the same user concurrently never lose an appended device.

pub mod models;
pub mod store;

pub use store::{InMemoryTokenStore, InMemoryUserStore, TokenStore, UserStore};
