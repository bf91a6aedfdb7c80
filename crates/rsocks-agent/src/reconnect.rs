//! Exponential backoff between agent dial attempts

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Growth factor applied after every retry
    pub multiplier: f64,
    /// Retries allowed in a row without a successful session (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("Gave up reconnecting after {0} attempts")]
    MaxAttemptsReached(usize),
}

/// Tracks consecutive failed attempts and the delay before the next one
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay the next call to [`wait`](Self::wait) will sleep for
    pub fn next_backoff(&self) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(self.attempt as i32);
        let scaled = self.config.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(scaled.min(self.config.max_backoff.as_secs_f64()))
    }

    /// Sleep before the next attempt, or fail once the attempt budget is spent
    pub async fn wait(&mut self) -> Result<(), ReconnectError> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt >= max_attempts {
                return Err(ReconnectError::MaxAttemptsReached(self.attempt));
            }
        }

        let delay = self.next_backoff();
        self.attempt += 1;
        debug!(
            "Retrying rendezvous in {:?} (attempt {})",
            delay, self.attempt
        );
        tokio::time::sleep(delay).await;

        Ok(())
    }

    /// Forget earlier failures (call once a session is up)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: Option<usize>) -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_caps() {
        let mut manager = ReconnectManager::new(config(None));

        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(manager.next_backoff());
            manager.wait().await.unwrap();
        }

        let millis: Vec<u128> = delays.iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![10, 20, 40, 80, 100, 100]);
        assert_eq!(manager.attempt(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_starts_over() {
        let mut manager = ReconnectManager::new(config(None));
        manager.wait().await.unwrap();
        manager.wait().await.unwrap();

        manager.reset();

        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.next_backoff(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget() {
        let mut manager = ReconnectManager::new(config(Some(2)));

        assert!(manager.wait().await.is_ok());
        assert!(manager.wait().await.is_ok());
        assert!(matches!(
            manager.wait().await,
            Err(ReconnectError::MaxAttemptsReached(2))
        ));
    }
}
