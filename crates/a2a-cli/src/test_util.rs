//! Test-only helpers shared across `a2a-cli`'s `#[cfg(test)]` modules.

use std::sync::{Mutex, OnceLock};

/// Serialize tests that mutate process environment variables (`SECRET_KEY`,
/// `A2A_DATABASE_URL`) so parallel `#[test]` runs don't stomp on each other.
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
