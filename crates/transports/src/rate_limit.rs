use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::transport::TransportCapabilities;

/// Sliding-window limiter for outbound publishes.
///
/// Each adapter owns one, sized from its capability declaration. Callers
/// await [`PublishRateLimiter::acquire`] before publishing: the call
/// claims a slot immediately while fewer than `limit` publishes sit
/// inside the window, and otherwise sleeps until the oldest one ages
/// out.
pub struct PublishRateLimiter {
    limit: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl PublishRateLimiter {
    /// A limit of 0 is clamped to 1 so `acquire` can always make
    /// progress.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(messages_per_minute: u32) -> Self {
        Self::new(messages_per_minute as usize, Duration::from_secs(60))
    }

    pub fn from_capabilities(capabilities: &TransportCapabilities) -> Self {
        Self::per_minute(capabilities.messages_per_minute)
    }

    /// Claim a publish slot, sleeping until one frees up.
    pub async fn acquire(&self) {
        loop {
            let deadline = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while let Some(oldest) = sent.front() {
                    if now.duration_since(*oldest) >= self.window {
                        sent.pop_front();
                    } else {
                        break;
                    }
                }
                if sent.len() < self.limit {
                    sent.push_back(now);
                    None
                } else {
                    sent.front().map(|oldest| *oldest + self.window)
                }
            };
            match deadline {
                None => return,
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_inside_limit_is_immediate() {
        let limiter = PublishRateLimiter::per_minute(10);
        let started = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_window_to_slide() {
        let limiter = PublishRateLimiter::new(2, Duration::from_millis(50));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third publish has to wait for the first to age out.
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_slot_frees_after_window_passes() {
        let limiter = PublishRateLimiter::new(1, Duration::from_millis(20));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(15));
    }

    #[test]
    fn test_zero_limit_clamps_to_one() {
        let limiter = PublishRateLimiter::per_minute(0);
        assert_eq!(limiter.limit, 1);
    }

    #[test]
    fn test_sized_from_capabilities() {
        let capabilities = TransportCapabilities {
            can_edit: true,
            can_delete: true,
            can_search: true,
            realtime: true,
            messages_per_minute: 7,
            messages_per_hour: 420,
            messages_per_day: 10_080,
        };
        let limiter = PublishRateLimiter::from_capabilities(&capabilities);
        assert_eq!(limiter.limit, 7);
        assert_eq!(limiter.window, Duration::from_secs(60));
    }
}
