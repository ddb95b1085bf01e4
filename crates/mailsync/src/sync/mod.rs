//! Sync engine for mirroring a Gmail mailbox into local storage
//!
//! Provides idempotent sync passes that can be safely retried.

mod engine;
mod result;
mod stats;
mod timing;

pub use engine::SyncService;
pub use result::{
    ErrorScope, SyncError, SyncErrorKind, SyncMode, SyncResult, classify_auth, classify_provider,
};
pub use stats::MailboxStats;
pub use timing::{Cooldown, check_cooldown};
