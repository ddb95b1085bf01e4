//! Sync timing utilities for cooldown management
//!
//! Pure functions that can be tested without a store or provider.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Result of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    Ready,
    /// Still cooling down for the given time
    Wait(Duration),
}

impl Cooldown {
    pub fn is_ready(&self) -> bool {
        matches!(self, Cooldown::Ready)
    }
}

/// Check whether a new pass may start.
///
/// # Arguments
/// * `last_sync_at` - When the last pass completed (None if never synced)
/// * `cooldown` - Minimum time that must elapse between passes
/// * `now` - Current time
///
/// # Returns
/// `Ready` when never synced or `now - last_sync_at >= cooldown`, otherwise
/// `Wait` with the remaining time.
pub fn check_cooldown(
    last_sync_at: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Cooldown {
    let Some(last) = last_sync_at else {
        return Cooldown::Ready;
    };

    // A timestamp in the future counts as zero elapsed
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= cooldown {
        Cooldown::Ready
    } else {
        Cooldown::Wait(cooldown - elapsed)
    }
}
