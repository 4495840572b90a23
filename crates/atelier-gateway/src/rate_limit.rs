use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::time::Duration;

use atelier_common::{Error, Result};
use atelier_config::RateLimitConfig;
use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::{debug, warn};

use crate::state::SharedState;

/// Per-client request budget: `max_requests` per `window`, refilled
/// evenly across the window.
pub struct ApiRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    window_secs: u64,
}

impl ApiRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        let burst = NonZeroU32::new(config.max_requests)
            .ok_or_else(|| Error::Config("rate limit max_requests must be non-zero".into()))?;
        if config.window_secs == 0 {
            return Err(Error::Config("rate limit window must be non-zero".into()));
        }
        let quota = Quota::with_period(config.refill_period())
            .ok_or_else(|| {
                Error::Config(format!(
                    "rate limit window of {}s is too short for {} requests",
                    config.window_secs, config.max_requests
                ))
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
            window_secs: config.window_secs,
        })
    }

    pub fn check(&self, client: IpAddr) -> bool {
        self.limiter.check_key(&client).is_ok()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Number of clients currently holding limiter state.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Forget clients whose budget has fully refilled.
    pub fn prune(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let after = self.limiter.len();
        if after < before {
            debug!("rate limiter pruned {} idle client(s), {after} tracked", before - after);
        }
    }
}

/// Middleware rejecting clients that exceeded their budget with 429.
pub async fn enforce(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if state.rate_limiter.check(client) {
        return next.run(req).await;
    }

    warn!("rate limit exceeded: client={client}, path={}", req.uri().path());
    let body = serde_json::json!({
        "error": "too_many_requests",
        "retry_after_secs": state.rate_limiter.window_secs,
    });
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_tracked_per_client() {
        let limiter = ApiRateLimiter::new(&RateLimitConfig {
            window_secs: 60,
            max_requests: 2,
        })
        .unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(a));
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn prune_drops_clients_after_refill() {
        let limiter = ApiRateLimiter::new(&RateLimitConfig {
            window_secs: 1,
            max_requests: 4,
        })
        .unwrap();
        for i in 0..3u32 {
            assert!(limiter.check(IpAddr::V4(Ipv4Addr::from(i))));
        }
        assert_eq!(limiter.tracked_clients(), 3);

        limiter.prune();
        assert_eq!(limiter.tracked_clients(), 3);

        // One request refills after 250ms.
        std::thread::sleep(Duration::from_millis(400));
        let active = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert!(limiter.check(active));

        limiter.prune();
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.check(active));
    }

    #[test]
    fn budget_too_dense_for_window_is_rejected() {
        let result = ApiRateLimiter::new(&RateLimitConfig {
            window_secs: 1,
            max_requests: u32::MAX,
        });
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("too short")),
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = ApiRateLimiter::new(&RateLimitConfig {
            window_secs: 60,
            max_requests: 0,
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
