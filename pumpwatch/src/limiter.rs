use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default ceiling on concurrent in-flight requests per venue.
pub const DEFAULT_REQUESTS_IN_FLIGHT: usize = 5;

/// Bounds concurrent outbound requests against a single venue.
///
/// [`RateLimiter::acquire`] suspends the caller until a slot frees and
/// returns an RAII permit, so the bound holds on every exit path including
/// errors and cancellation. This component cannot fail, only delay.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_IN_FLIGHT)
    }
}

impl RateLimiter {
    pub fn new(requests_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(requests_in_flight)),
        }
    }

    /// Acquire a permit, suspending until one frees. The permit releases its
    /// slot on drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("RateLimiter semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn test_rate_limiter_never_exceeds_ceiling() {
        const CEILING: usize = 3;
        const TASKS: usize = 20;

        let limiter = RateLimiter::new(CEILING);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..TASKS {
            let limiter = limiter.clone();
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            tasks.spawn(async move {
                let _permit = limiter.acquire().await;
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(max_observed.load(Ordering::SeqCst) <= CEILING);
    }
}
