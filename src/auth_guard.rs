// Brute-force lockout for the admin password check.
//
// Each client walks a small state machine: Clean -> Warned (1 failure) ->
// Banned (2nd failure, for BAN_DURATION). A correct password while not banned
// clears the client's entry. Ban expiry is passive; the entry stays until the
// next attempt and is re-evaluated then.

use crate::client_id::ClientId;
use crate::error::{AppError, lock_mutex_app_error};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const BAN_THRESHOLD: u32 = 2;
pub const BAN_DURATION: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Granted,
    Denied { fail_count: u32 },
    // Whole minutes left on the ban, rounded up.
    Banned { minutes_left: u64 },
}

#[derive(Debug, Clone, Copy, Default)]
struct FailedAuth {
    fail_count: u32,
    ban_until: Option<Instant>,
}

pub struct AuthGuard {
    threshold: u32,
    ban_duration: Duration,
    // Never evicted; see rate_limiter for the same trade-off.
    failed: Mutex<HashMap<ClientId, FailedAuth>>,
}

impl Default for AuthGuard {
    fn default() -> Self {
        Self::new(BAN_THRESHOLD, BAN_DURATION)
    }
}

impl AuthGuard {
    pub fn new(threshold: u32, ban_duration: Duration) -> Self {
        Self {
            threshold,
            ban_duration,
            failed: Mutex::new(HashMap::new()),
        }
    }

    /// Records one verification attempt by `client` and returns the outcome.
    ///
    /// `password_ok` is only honoured when the client is not currently banned.
    pub fn verify(
        &self,
        client: ClientId,
        password_ok: bool,
        now: Instant,
    ) -> Result<Verdict, AppError> {
        let mut failed = lock_mutex_app_error(&self.failed, "failed auth attempts")?;

        if let Some(ban_until) = failed.get(&client).and_then(|entry| entry.ban_until) {
            if now < ban_until {
                let remaining = ban_until - now;
                let minutes_left = remaining.as_nanos().div_ceil(60 * 1_000_000_000) as u64;
                return Ok(Verdict::Banned { minutes_left });
            }
        }

        if password_ok {
            if failed.remove(&client).is_some() {
                tracing::info!("Cleared failed attempts for {}", client);
            }
            return Ok(Verdict::Granted);
        }

        let entry = failed.entry(client).or_default();
        entry.fail_count += 1;
        if entry.fail_count >= self.threshold {
            entry.ban_until = Some(now + self.ban_duration);
            tracing::warn!(
                "Banning {} for {} minutes after {} failed password attempts",
                client,
                self.ban_duration.as_secs() / 60,
                entry.fail_count
            );
        } else {
            tracing::info!(
                "Failed password attempt {} of {} from {}",
                entry.fail_count,
                self.threshold,
                client
            );
        }

        Ok(Verdict::Denied {
            fail_count: entry.fail_count,
        })
    }
}
