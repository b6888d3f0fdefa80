//! Client-side minimum interval between oracle calls.
//!
//! One [`RateGate`] is shared by every call site of a run. It throttles; it
//! does not queue or batch. Callers arriving during the interval wait while
//! holding the gate, so bursts are serialized.

use super::{Oracle, OracleError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Minimum-interval gate
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    /// Gate that spaces calls at least `min_interval` apart
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Gate that never waits
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured interval
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call is allowed, then mark it. Returns the time slept.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_call.lock().await;
        let waited = match *last {
            Some(prev) => self.min_interval.saturating_sub(prev.elapsed()),
            None => Duration::ZERO,
        };
        if !waited.is_zero() {
            debug!(wait_ms = waited.as_millis() as u64, "rate limiting oracle call");
            tokio::time::sleep(waited).await;
        }
        *last = Some(Instant::now());
        waited
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Oracle whose calls pass through a shared [`RateGate`]
#[derive(Debug, Clone)]
pub struct Throttled<O> {
    inner: O,
    gate: Arc<RateGate>,
}

impl<O> Throttled<O> {
    /// Wrap `inner` behind `gate`
    pub const fn new(inner: O, gate: Arc<RateGate>) -> Self {
        Self { inner, gate }
    }

    /// Wrapped oracle
    pub const fn inner(&self) -> &O {
        &self.inner
    }

    /// Shared gate
    pub fn gate(&self) -> Arc<RateGate> {
        Arc::clone(&self.gate)
    }
}

#[async_trait]
impl<O: Oracle> Oracle for Throttled<O> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate_json(
        &self,
        schema: &Value,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<Value, OracleError> {
        self.gate.acquire().await;
        self.inner.generate_json(schema, prompt, image).await
    }

    async fn generate_multimodal(&self, prompt: &str, image: &[u8]) -> Result<String, OracleError> {
        self.gate.acquire().await;
        self.inner.generate_multimodal(prompt, image).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::oracle::MockOracle;

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let gate = RateGate::new(Duration::from_secs(60));
        assert_eq!(gate.acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_call_is_spaced() {
        let gate = RateGate::new(Duration::from_millis(40));
        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_unlimited_gate() {
        let gate = RateGate::unlimited();
        gate.acquire().await;
        assert_eq!(gate.acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_gate_shared_across_wrappers() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(30)));
        let mock = MockOracle::new().with_text("YES").with_text("NO");
        let a = Throttled::new(mock.clone(), Arc::clone(&gate));
        let b = Throttled::new(mock.clone(), gate);
        let start = Instant::now();
        assert_eq!(a.generate_multimodal("1", b"").await.unwrap(), "YES");
        assert_eq!(b.generate_multimodal("2", b"").await.unwrap(), "NO");
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(a.name(), "mock");
    }
}
