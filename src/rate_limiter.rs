use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};

use crate::config::RateQuota;
use crate::error::AppError;

/// GCRA rate limiter keyed by HTTP method
///
/// One instance is shared by every route, so the quota applies per process.
/// Excess requests are rejected, never queued.
pub struct MethodRateLimiter<C: Clock = DefaultClock> {
    limiter: RateLimiter<Method, DefaultKeyedStateStore<Method>, C, NoOpMiddleware<C::Instant>>,
    clock: C,
}

impl MethodRateLimiter<DefaultClock> {
    /// Create a rate limiter
    /// per_second: sustained requests per second
    /// burst: requests admitted back to back before the rate applies
    pub fn new(quota: RateQuota) -> anyhow::Result<Self> {
        Self::with_clock(quota, DefaultClock::default())
    }
}

impl<C: Clock> MethodRateLimiter<C> {
    pub fn with_clock(quota: RateQuota, clock: C) -> anyhow::Result<Self> {
        let Some(per_second) = NonZeroU32::new(quota.per_second) else {
            anyhow::bail!("Rate limit must admit at least one request per second");
        };
        let Some(burst) = NonZeroU32::new(quota.burst) else {
            anyhow::bail!("Rate limit burst must be greater than zero");
        };

        let quota = Quota::per_second(per_second).allow_burst(burst);
        let limiter = RateLimiter::new(quota, DefaultKeyedStateStore::default(), &clock);

        Ok(Self { limiter, clock })
    }

    /// Admit or reject one request. On rejection returns the number of seconds
    /// until the next request for `method` would be admitted.
    pub fn check(&self, method: &Method) -> Result<(), u64> {
        self.limiter.check_key(method).map(|_| ()).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
        })
    }
}

/// Middleware rejecting requests over the configured quota
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<MethodRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check(request.method()) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!(
                method = %request.method(),
                retry_after_secs,
                "Rate limit exceeded"
            );
            AppError::TooManyRequests { retry_after_secs }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::time::Duration;

    fn limiter(per_second: u32, burst: u32) -> (MethodRateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter =
            MethodRateLimiter::with_clock(RateQuota { per_second, burst }, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_burst_then_reject() {
        let (limiter, _clock) = limiter(1, 3);
        for _ in 0..3 {
            assert!(limiter.check(&Method::POST).is_ok());
        }
        let retry = limiter.check(&Method::POST).unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn test_spaced_requests_are_never_rejected() {
        let (limiter, clock) = limiter(2, 1);
        for _ in 0..20 {
            assert!(limiter.check(&Method::POST).is_ok());
            clock.advance(Duration::from_millis(500));
        }
    }

    #[test]
    fn test_quota_replenishes() {
        let (limiter, clock) = limiter(1, 1);
        assert!(limiter.check(&Method::GET).is_ok());
        assert!(limiter.check(&Method::GET).is_err());
        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(&Method::GET).is_ok());
    }

    #[test]
    fn test_methods_are_limited_independently() {
        let (limiter, _clock) = limiter(1, 1);
        assert!(limiter.check(&Method::GET).is_ok());
        assert!(limiter.check(&Method::GET).is_err());
        assert!(limiter.check(&Method::POST).is_ok());
    }

    #[test]
    fn test_zero_quota_fails_construction() {
        assert!(MethodRateLimiter::new(RateQuota { per_second: 0, burst: 1 }).is_err());
        assert!(MethodRateLimiter::new(RateQuota { per_second: 1, burst: 0 }).is_err());
    }
}
