//! Domain models for mail entities

mod account;
mod email;
pub mod label;

pub use account::{Account, Provider, SyncStatus};
pub use email::{Attachment, Direction, Email, EmailAddress, EmailBuilder};
