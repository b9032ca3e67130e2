//! Flood prevention (spec.md section 4.6): a token-bucket pacer that limits how fast outgoing
//! lines drain from the send queue, modeled on the throttle real IRC networks apply to clients
//! that write too fast ("Excess Flood").

use std::time::{Duration, Instant};

/// Configuration for a [`FloodPreventer`]. Defaults mirror a common IRCd throttle: burst up to 4
/// lines, then one line drains off the counter every 2 seconds.
#[derive(Debug, Clone, Copy)]
pub struct FloodPreventerConfig {
    pub max_burst: f64,
    pub period_ms: u64,
}

impl Default for FloodPreventerConfig {
    fn default() -> Self {
        FloodPreventerConfig {
            max_burst: 4.0,
            period_ms: 2000,
        }
    }
}

/// Ceiling applied to the counter (Open Question 1, SPEC_FULL.md section F): a long-idle
/// connection shouldn't accumulate unbounded burst credit, so the counter saturates instead of
/// decrementing below zero or growing past what any realistic burst needs.
const COUNTER_CEILING: f64 = (1u64 << 31) as f64 - 1.0;

/// Token-bucket pacer, one instance per connection, consulted by the send-queue drainer before
/// every pop.
pub struct FloodPreventer {
    config: FloodPreventerConfig,
    counter: f64,
    last_decrement: Instant,
}

impl FloodPreventer {
    pub fn new(config: FloodPreventerConfig) -> Self {
        FloodPreventer {
            config,
            counter: 0.0,
            last_decrement: Instant::now(),
        }
    }

    fn decay(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_decrement).as_millis() as f64;
        let decrements = elapsed_ms / self.config.period_ms as f64;
        self.counter = (self.counter - decrements).max(0.0);
        let consumed_ms = (elapsed_ms % self.config.period_ms as f64) as u64;
        self.last_decrement = now - Duration::from_millis(consumed_ms);
    }

    /// How long the drainer should wait before popping the next message without pushing the
    /// counter past `max_burst`. Zero if the bucket is already under budget.
    pub fn send_delay(&mut self) -> Duration {
        let now = Instant::now();
        self.decay(now);
        let elapsed_ms = now.saturating_duration_since(self.last_decrement).as_millis() as f64;
        let over_budget_ms = (self.counter - self.config.max_burst) * self.config.period_ms as f64 - elapsed_ms;
        Duration::from_millis(over_budget_ms.max(0.0) as u64)
    }

    /// Record that a line was just sent.
    pub fn message_sent(&mut self) {
        self.counter = (self.counter + 1.0).min(COUNTER_CEILING);
    }
}

impl Default for FloodPreventer {
    fn default() -> Self {
        FloodPreventer::new(FloodPreventerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_up_to_max_incur_no_delay() {
        let mut fp = FloodPreventer::new(FloodPreventerConfig {
            max_burst: 4.0,
            period_ms: 2000,
        });
        for _ in 0..4 {
            assert_eq!(fp.send_delay(), Duration::from_millis(0));
            fp.message_sent();
        }
        assert!(fp.send_delay() > Duration::from_millis(0));
    }

    #[test]
    fn delay_grows_with_excess_p6() {
        let mut fp = FloodPreventer::new(FloodPreventerConfig {
            max_burst: 2.0,
            period_ms: 1000,
        });
        fp.message_sent();
        fp.message_sent();
        fp.message_sent();
        let delay_at_3 = fp.send_delay();
        fp.message_sent();
        let delay_at_4 = fp.send_delay();
        assert!(delay_at_4 > delay_at_3);
    }

    #[test]
    fn idle_time_drains_the_bucket() {
        let mut fp = FloodPreventer::new(FloodPreventerConfig {
            max_burst: 1.0,
            period_ms: 50,
        });
        fp.message_sent();
        fp.message_sent();
        assert!(fp.send_delay() > Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(fp.send_delay(), Duration::from_millis(0));
    }

    #[test]
    fn counter_saturates_rather_than_overflowing() {
        let mut fp = FloodPreventer::new(FloodPreventerConfig::default());
        for _ in 0..10_000_000 {
            fp.message_sent();
        }
        assert!(fp.counter <= COUNTER_CEILING);
        assert!(fp.send_delay().as_millis() > 0);
    }
}
