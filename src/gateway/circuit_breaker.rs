//! Circuit breaker guarding the exchange connection
//!
//! Opens after a run of consecutive transport failures and rejects calls until
//! the cool-down has elapsed. The first call after the cool-down is a probe:
//! success closes the circuit, failure reopens it.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    /// Cool-down elapsed, next call decides
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may be sent now
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.cooldown);
                if cooled {
                    tracing::info!("Circuit breaker half-open, sending probe request");
                    self.state = CircuitState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed, exchange reachable again");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;

        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}
