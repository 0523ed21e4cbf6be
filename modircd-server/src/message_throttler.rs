use std::time::{Duration, Instant};

/// Spaces out the lines of one connection to at most `max_messages_per_second`.
#[derive(Debug, Clone)]
pub(crate) struct MessageThrottler {
    last_timestamp: Instant,
    threshold: Duration,
}

impl MessageThrottler {
    pub(crate) fn new(max_messages_per_second: u32) -> Self {
        Self {
            last_timestamp: Instant::now(),
            threshold: Duration::from_secs(1) / max_messages_per_second.max(1),
        }
    }

    pub(crate) async fn maybe_slow_down(&mut self) {
        let elapsed = self.last_timestamp.elapsed();
        if elapsed < self.threshold {
            let delay = self.threshold - elapsed;
            tokio::time::sleep(delay).await;
        }
        self.last_timestamp = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::MessageThrottler;

    #[tokio::test]
    async fn spaces_out_messages() {
        let mut throttler = MessageThrottler::new(50);
        let start = Instant::now();
        for _ in 0..5 {
            throttler.maybe_slow_down().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        let throttler = MessageThrottler::new(0);
        assert_eq!(throttler.threshold, Duration::from_secs(1));
    }
}
