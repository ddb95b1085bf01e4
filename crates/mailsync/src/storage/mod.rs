//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for accounts and their
//! mirrored emails. The trait-based design allows swapping between in-memory
//! and SQLite storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{AccountStore, EmailStore, MailStore, SyncOutcome, TokenUpdate};
