//! Token-bucket request throttle

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `rate` tokens per second, holding at
/// most `rate` tokens
#[derive(Debug)]
pub struct Throttle {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl Throttle {
    pub fn new(requests_per_second: usize) -> Self {
        let rate = requests_per_second.max(1) as f64;
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling request");
            sleep(wait).await;
        }
    }

    /// Tokens currently available, rounded down
    pub async fn available(&self) -> usize {
        let bucket = self.bucket.lock().await;
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        (bucket.tokens + elapsed * self.rate).min(self.rate).floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let throttle = Throttle::new(2);
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
        assert_eq!(throttle.available().await, 0);

        // third request waits for a refill
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(499));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_to_capacity() {
        let throttle = Throttle::new(5);
        for _ in 0..5 {
            throttle.acquire().await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(throttle.available().await, 5);
    }
}
