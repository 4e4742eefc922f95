use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff policy for whole-job re-attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
    ) -> Self {
        let clamped_attempts = max_attempts.max(1);
        let clamped_base = base_delay_ms.max(1);
        let clamped_max_delay = max_delay_ms.max(clamped_base);
        let clamped_jitter = jitter_pct.clamp(0.0, 1.0);
        Self {
            max_attempts: clamped_attempts,
            base_delay_ms: clamped_base,
            max_delay_ms: clamped_max_delay,
            jitter_pct: clamped_jitter,
        }
    }

    /// Ingestion jobs retry whole, and only a bounded number of times.
    pub fn default_job() -> Self {
        Self::new(3, 1_000, 30_000, 0.2)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let mut delay = self.base_delay_ms.saturating_mul(exp);
        if delay > self.max_delay_ms {
            delay = self.max_delay_ms;
        }
        let jitter = if self.jitter_pct > 0.0 {
            let mut rng = rand::thread_rng();
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rng.gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jitter)
    }

    pub async fn retry_async<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.retry_async_when(op, |_| true).await
    }

    /// Retry only while `should_retry` accepts the error; a rejected error
    /// is returned immediately without consuming further attempts.
    pub async fn retry_async_when<F, Fut, T, E, P>(
        &self,
        mut op: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_job()
    }
}
