// Per-client download cooldown.
// A client may start a new download only once the cooldown window has elapsed
// since its previous admitted download started.

use crate::client_id::ClientId;
use crate::error::{AppError, lock_mutex_app_error};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// Minimum gap between two downloads of the same client, across all files.
pub const DOWNLOAD_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    // Whole seconds until the client may retry, rounded up.
    Rejected { wait_secs: u64 },
}

pub struct RateLimiter {
    cooldown: Duration,
    // Start time of each client's last admitted download.
    // Entries are never evicted, so this grows with the number of distinct clients.
    last_download: Mutex<HashMap<ClientId, Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DOWNLOAD_COOLDOWN)
    }
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_download: Mutex::new(HashMap::new()),
        }
    }

    /// Decides whether `client` may start a download at `now`.
    ///
    /// On admission the client's timestamp is overwritten with `now` before any
    /// byte is streamed, so overlapping slow downloads cannot dodge the window.
    pub fn admit(&self, client: ClientId, now: Instant) -> Result<Admission, AppError> {
        let mut last_download = lock_mutex_app_error(&self.last_download, "download cooldowns")?;

        if let Some(last) = last_download.get(&client) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                let wait_secs = remaining.as_nanos().div_ceil(1_000_000_000) as u64;
                tracing::debug!(
                    "Download rejected for {}: {}ms since last download, wait {}s",
                    client,
                    elapsed.as_millis(),
                    wait_secs
                );
                return Ok(Admission::Rejected { wait_secs });
            }
        }

        last_download.insert(client, now);
        Ok(Admission::Admitted)
    }

    // Number of clients that have ever been admitted.
    pub fn tracked_clients(&self) -> usize {
        self.last_download.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn client(last_octet: u8) -> ClientId {
        ClientId(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)))
    }

    #[test]
    fn test_first_download_is_admitted() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        assert_eq!(limiter.admit(client(1), now).unwrap(), Admission::Admitted);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_cooldown_example_timeline() {
        let limiter = RateLimiter::default();
        let t0 = Instant::now();

        assert_eq!(limiter.admit(client(1), t0).unwrap(), Admission::Admitted);
        assert_eq!(
            limiter.admit(client(1), t0 + Duration::from_secs(3)).unwrap(),
            Admission::Rejected { wait_secs: 7 }
        );
        assert_eq!(
            limiter.admit(client(1), t0 + Duration::from_secs(11)).unwrap(),
            Admission::Admitted
        );
    }

    #[test]
    fn test_wait_time_rounds_up() {
        let limiter = RateLimiter::default();
        let t0 = Instant::now();
        limiter.admit(client(1), t0).unwrap();

        let result = limiter
            .admit(client(1), t0 + Duration::from_millis(2_500))
            .unwrap();
        assert_eq!(result, Admission::Rejected { wait_secs: 8 });

        let result = limiter
            .admit(client(1), t0 + Duration::from_millis(9_999))
            .unwrap();
        assert_eq!(result, Admission::Rejected { wait_secs: 1 });
    }

    #[test]
    fn test_rejection_does_not_reset_window() {
        let limiter = RateLimiter::default();
        let t0 = Instant::now();
        limiter.admit(client(1), t0).unwrap();
        limiter.admit(client(1), t0 + Duration::from_secs(9)).unwrap();

        // Still measured from t0, not from the rejected attempt at t0 + 9s.
        assert_eq!(
            limiter.admit(client(1), t0 + Duration::from_secs(10)).unwrap(),
            Admission::Admitted
        );
    }

    #[test]
    fn test_window_measured_from_admission() {
        let limiter = RateLimiter::default();
        let t0 = Instant::now();
        limiter.admit(client(1), t0).unwrap();
        let t1 = t0 + Duration::from_secs(10);
        limiter.admit(client(1), t1).unwrap();

        assert_eq!(
            limiter.admit(client(1), t1 + Duration::from_secs(4)).unwrap(),
            Admission::Rejected { wait_secs: 6 }
        );
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::default();
        let t0 = Instant::now();
        limiter.admit(client(1), t0).unwrap();

        assert_eq!(
            limiter.admit(client(2), t0 + Duration::from_secs(1)).unwrap(),
            Admission::Admitted
        );
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_custom_cooldown() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let t0 = Instant::now();
        limiter.admit(client(1), t0).unwrap();
        assert_eq!(
            limiter.admit(client(1), t0 + Duration::from_secs(1)).unwrap(),
            Admission::Rejected { wait_secs: 1 }
        );
        assert_eq!(
            limiter.admit(client(1), t0 + Duration::from_secs(2)).unwrap(),
            Admission::Admitted
        );
    }
}
