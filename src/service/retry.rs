//! Transaction start with bounded exponential backoff on transient failures.

use crate::error::{is_transient, translate_db_error, AppError};
use crate::settings::RetrySettings;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Begin a transaction, retrying transient acquisition failures.
pub async fn begin(pool: &PgPool, policy: RetryPolicy) -> Result<Transaction<'static, Postgres>, AppError> {
    let mut attempt = 0;
    loop {
        match pool.begin().await {
            Ok(tx) => return Ok(tx),
            Err(e) if is_transient(&e) => {
                if attempt >= policy.max_retries {
                    tracing::warn!(error = %e, attempts = attempt + 1, "giving up on database connection");
                    return Err(AppError::Unavailable(e.to_string()));
                }
                let delay = policy.delay(attempt);
                tracing::debug!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying transaction start");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(translate_db_error(e, |_, _| None)),
        }
    }
}
