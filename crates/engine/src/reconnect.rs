//! Backoff and retry for the push channel.
//!
//! A dropped push connection is retried for as long as the session token
//! is alive. Every attempt is preceded by a sleep: 1s, 2s, 4s, ... capped
//! at 30s by default. The poll reconciler keeps the store current while
//! this runs.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{PushClient, PushConnection};

/// Backoff parameters, built from [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay sequence for consecutive failed attempts.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            max: config.max_delay,
            multiplier: config.multiplier.max(1.0),
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt. Advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.mul_f64(self.multiplier).min(self.max);
        self.attempts += 1;
        current
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Keep trying to connect until it succeeds or `cancel` fires.
///
/// Returns `None` only on cancellation.
pub async fn reconnect_loop(
    client: &PushClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<PushConnection> {
    let mut backoff = Backoff::new(config);

    loop {
        let delay = backoff.next_delay();
        let attempt = backoff.attempts();
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Push reconnect scheduled");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = async {
                tokio::time::sleep(delay).await;
                client.connect().await
            } => Some(result),
        };

        match outcome {
            None => {
                tracing::debug!(attempt, "Push reconnect abandoned");
                return None;
            }
            Some(Ok(conn)) => {
                tracing::info!(attempt, client_id = %conn.client_id, "Push channel reconnected");
                return Some(conn);
            }
            Some(Err(e)) => {
                tracing::warn!(attempt, error = %e, "Push reconnect failed");
            }
        }
    }
}
