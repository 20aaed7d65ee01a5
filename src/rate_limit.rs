use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Submissions per visitor per form, counted in fixed windows.
pub struct SubmissionRateLimiter {
    /// (form_id, ip) -> (count, window_start)
    windows: DashMap<(Uuid, IpAddr), (u32, Instant)>,
}

impl SubmissionRateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Count one submission. `Err` carries the seconds until the window
    /// resets. A limit of zero turns limiting off for the form.
    pub fn check(&self, form_id: Uuid, ip: IpAddr, limit: u32, window_secs: u64) -> Result<(), u64> {
        if limit == 0 {
            return Ok(());
        }

        let window = Duration::from_secs(window_secs);
        let now = Instant::now();
        let mut entry = self.windows.entry((form_id, ip)).or_insert((0, now));
        let (count, started) = entry.value_mut();

        if now.duration_since(*started) > window {
            *count = 0;
            *started = now;
        }

        if *count >= limit {
            let waited = now.duration_since(*started).as_secs();
            return Err(window_secs.saturating_sub(waited).max(1));
        }

        *count += 1;
        Ok(())
    }

    /// Forget windows that started more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, (_, started)| now.duration_since(*started) < max_age);
        before - self.windows.len()
    }
}

impl Default for SubmissionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
