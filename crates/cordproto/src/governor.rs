//! Rate/backoff governor.
//!
//! Every outbound REST call asks [`RateGovernor::acquire`] first and reports
//! back through [`RateGovernor::record`]. The governor only follows what
//! Discord tells it in response headers; it does not predict limits.
//!
//! Waiting is FIFO-ish per route at best: whoever wakes first after a reset
//! takes the budget. There is no fairness scheduler.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::rest::RestResponse;
use crate::route::{Method, RouteKey};

/// Discord's documented global ceiling for bots.
pub const DEFAULT_GLOBAL_PER_SECOND: u32 = 50;

/// Outcome of a non-blocking admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead; one unit of budget has been reserved.
    Go,
    /// Try again after this long.
    Wait(Duration),
}

/// What the governor knows about one bucket.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    pub limit: Option<u32>,
    /// `None` until Discord has told us.
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
    pub bucket: Option<String>,
    pub backoff_until: Option<Instant>,
    /// Admitted calls whose response has not been recorded yet.
    pub in_flight: u32,
}

/// Windows are keyed by Discord's bucket hash once we have seen it, so
/// routes that share a bucket share a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WindowKey {
    Route(RouteKey),
    Bucket { hash: String, major: Option<String> },
}

#[derive(Debug)]
struct GovernorState {
    windows: HashMap<WindowKey, RateWindow>,
    buckets: HashMap<(Method, &'static str), String>,
    global_backoff_until: Option<Instant>,
    global_window_start: Instant,
    global_count: u32,
}

impl GovernorState {
    fn key_for(&self, route: &RouteKey) -> WindowKey {
        match self.buckets.get(&(route.method, route.template)) {
            Some(hash) => WindowKey::Bucket {
                hash: hash.clone(),
                major: route.major.clone(),
            },
            None => WindowKey::Route(route.clone()),
        }
    }
}

#[derive(Debug)]
pub struct RateGovernor {
    state: Mutex<GovernorState>,
    global_per_second: u32,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_PER_SECOND)
    }
}

impl RateGovernor {
    pub fn new(global_per_second: u32) -> Self {
        Self {
            state: Mutex::new(GovernorState {
                windows: HashMap::new(),
                buckets: HashMap::new(),
                global_backoff_until: None,
                global_window_start: Instant::now(),
                global_count: 0,
            }),
            global_per_second: global_per_second.max(1),
        }
    }

    /// Non-blocking admission. `Go` reserves one unit of budget.
    pub fn admit(&self, route: &RouteKey) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(until) = state.global_backoff_until {
            if until > now {
                return Admission::Wait(until - now);
            }
            state.global_backoff_until = None;
        }

        if now >= state.global_window_start + Duration::from_secs(1) {
            state.global_window_start = now;
            state.global_count = 0;
        }
        if state.global_count >= self.global_per_second {
            let reopen = state.global_window_start + Duration::from_secs(1);
            return Admission::Wait(reopen - now);
        }

        let key = state.key_for(route);
        let window = state.windows.entry(key).or_default();

        if let Some(until) = window.backoff_until {
            if until > now {
                return Admission::Wait(until - now);
            }
            window.backoff_until = None;
        }

        if let Some(reset_at) = window.reset_at {
            if reset_at <= now {
                window.remaining = window.limit;
                window.reset_at = None;
            }
        }

        match window.remaining {
            Some(0) => match window.reset_at {
                Some(reset_at) => return Admission::Wait(reset_at - now),
                // Exhausted with no reset known: let one call through to learn the reset
                None => window.remaining = None,
            },
            Some(n) => window.remaining = Some(n - 1),
            None => {}
        }
        window.in_flight += 1;

        state.global_count += 1;
        Admission::Go
    }

    /// Block (asynchronously) until the route admits us, or fail with
    /// `RateLimited` if that would take us past `deadline`.
    pub async fn acquire<'a>(
        &'a self,
        route: &'a RouteKey,
        deadline: Instant,
    ) -> Result<Reservation<'a>, RemoteError> {
        loop {
            match self.admit(route) {
                Admission::Go => {
                    return Ok(Reservation {
                        governor: self,
                        route,
                        recorded: false,
                    })
                }
                Admission::Wait(delay) => {
                    if Instant::now() + delay > deadline {
                        return Err(RemoteError::RateLimited {
                            retry_after: delay,
                            global: self.is_globally_throttled(),
                        });
                    }
                    debug!(route = %route, delay_ms = delay.as_millis() as u64, "rate limit wait");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fold a response's rate-limit information back into the windows.
    pub fn record(&self, route: &RouteKey, response: &RestResponse) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let rate = &response.rate;

        if let Some(hash) = &rate.bucket {
            let route_key = (route.method, route.template);
            if state.buckets.get(&route_key) != Some(hash) {
                // Carry what we learned under the old key into the bucket key
                let old_key = state.key_for(route);
                state.buckets.insert(route_key, hash.clone());
                let new_key = state.key_for(route);
                if let Some(window) = state.windows.remove(&old_key) {
                    state.windows.entry(new_key).or_insert(window);
                }
            }
        }

        let key = state.key_for(route);
        if let Some(window) = state.windows.get_mut(&key) {
            window.in_flight = window.in_flight.saturating_sub(1);
        }

        if response.status == 429 {
            let retry_after = response.retry_after().unwrap_or(Duration::from_secs(1));
            let until = now + retry_after;
            if response.is_global_limit() {
                warn!(route = %route, retry_after_ms = retry_after.as_millis() as u64, "global rate limit");
                state.global_backoff_until = Some(until);
            } else {
                warn!(route = %route, retry_after_ms = retry_after.as_millis() as u64, "route rate limit");
                let window = state.windows.entry(key.clone()).or_default();
                window.backoff_until = Some(until);
                window.remaining = Some(0);
                window.reset_at = Some(until);
            }
        }

        let window = state.windows.entry(key).or_default();
        if rate.bucket.is_some() {
            window.bucket = rate.bucket.clone();
        }
        if let Some(limit) = rate.limit {
            window.limit = Some(limit);
        }
        if response.status != 429 {
            // Discord's count does not include calls we already let through
            if let Some(remaining) = rate.remaining {
                window.remaining = Some(remaining.saturating_sub(window.in_flight));
            }
            if let Some(reset_after) = rate.reset_after {
                window.reset_at = Some(now + reset_after);
            }
        }
    }

    /// Give back an admission that will never be recorded.
    pub fn release(&self, route: &RouteKey) {
        let mut state = self.state.lock();
        let key = state.key_for(route);
        if let Some(window) = state.windows.get_mut(&key) {
            window.in_flight = window.in_flight.saturating_sub(1);
        }
    }

    pub fn is_globally_throttled(&self) -> bool {
        let state = self.state.lock();
        state
            .global_backoff_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Snapshot of one route's window, mostly for tests and diagnostics.
    pub fn window(&self, route: &RouteKey) -> Option<RateWindow> {
        let state = self.state.lock();
        let key = state.key_for(route);
        state.windows.get(&key).cloned()
    }
}

/// One admitted call. Dropped without [`Reservation::record`] (transport
/// error, cancelled task) it releases its in-flight slot.
#[must_use]
#[derive(Debug)]
pub struct Reservation<'a> {
    governor: &'a RateGovernor,
    route: &'a RouteKey,
    recorded: bool,
}

impl Reservation<'_> {
    pub fn record(mut self, response: &RestResponse) {
        self.recorded = true;
        self.governor.record(self.route, response);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.governor.release(self.route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Snowflake;
    use crate::rest::RateHeaders;
    use crate::route::RestRequest;
    use serde_json::json;

    fn route(channel: u64) -> RouteKey {
        RestRequest::post("/channels/{}/messages", &[&Snowflake(channel)]).route
    }

    fn headers(remaining: u32, reset_after_ms: u64) -> RateHeaders {
        RateHeaders {
            limit: Some(5),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_millis(reset_after_ms)),
            bucket: Some("abcd".into()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_route_is_admitted() {
        let gov = RateGovernor::default();
        assert_eq!(gov.admit(&route(1)), Admission::Go);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_window_waits_until_reset() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(0, 2_000)));

        match gov.admit(&r) {
            Admission::Wait(d) => assert_eq!(d, Duration::from_millis(2_000)),
            Admission::Go => panic!("should not admit with remaining 0"),
        }

        tokio::time::advance(Duration::from_millis(2_000)).await;
        assert_eq!(gov.admit(&r), Admission::Go);
        // limit 5, one reserved
        assert_eq!(gov.window(&r).unwrap().remaining, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_never_goes_negative() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(2, 10_000)));

        assert_eq!(gov.admit(&r), Admission::Go);
        assert_eq!(gov.admit(&r), Admission::Go);
        assert!(matches!(gov.admit(&r), Admission::Wait(_)));
        assert_eq!(gov.window(&r).unwrap().remaining, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_count_against_reported_remaining() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(2, 10_000)));

        // Two calls go out; the first answers while the second is in flight
        assert_eq!(gov.admit(&r), Admission::Go);
        assert_eq!(gov.admit(&r), Admission::Go);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(1, 9_000)));

        assert_eq!(gov.window(&r).unwrap().in_flight, 1);
        assert!(matches!(gov.admit(&r), Admission::Wait(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_reservation_releases_in_flight() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(3, 10_000)));

        let held = gov.acquire(&r, Instant::now() + Duration::from_secs(1)).await.unwrap();
        assert_eq!(gov.window(&r).unwrap().in_flight, 1);
        drop(held);
        assert_eq!(gov.window(&r).unwrap().in_flight, 0);

        let recorded = gov.acquire(&r, Instant::now() + Duration::from_secs(1)).await.unwrap();
        recorded.record(&RestResponse::json(200, json!({})).with_rate(headers(1, 9_000)));
        let window = gov.window(&r).unwrap();
        assert_eq!(window.in_flight, 0);
        assert_eq!(window.remaining, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn major_parameters_are_independent() {
        let gov = RateGovernor::default();
        gov.record(&route(1), &RestResponse::json(200, json!({})).with_rate(headers(0, 5_000)));

        assert!(matches!(gov.admit(&route(1)), Admission::Wait(_)));
        assert_eq!(gov.admit(&route(2)), Admission::Go);
    }

    #[tokio::test(start_paused = true)]
    async fn global_429_blocks_every_route() {
        let gov = RateGovernor::default();
        let resp = RestResponse::json(429, json!({"retry_after": 1.5, "global": true}));
        gov.record(&route(1), &resp);

        assert!(gov.is_globally_throttled());
        assert_eq!(
            gov.admit(&route(99)),
            Admission::Wait(Duration::from_millis(1_500))
        );

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(gov.admit(&route(99)), Admission::Go);
    }

    #[tokio::test(start_paused = true)]
    async fn route_429_only_blocks_that_route() {
        let gov = RateGovernor::default();
        let resp = RestResponse::json(429, json!({"retry_after": 3.0, "global": false}));
        gov.record(&route(1), &resp);

        assert!(!gov.is_globally_throttled());
        assert!(matches!(gov.admit(&route(1)), Admission::Wait(_)));
        assert_eq!(gov.admit(&route(2)), Admission::Go);
    }

    #[tokio::test(start_paused = true)]
    async fn global_per_second_ceiling() {
        let gov = RateGovernor::new(3);
        for i in 0..3 {
            assert_eq!(gov.admit(&route(i)), Admission::Go);
        }
        assert_eq!(gov.admit(&route(10)), Admission::Wait(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(gov.admit(&route(10)), Admission::Go);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sleeps_until_reset() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(0, 750)));

        let start = Instant::now();
        let _reservation = gov.acquire(&r, start + Duration::from_secs(5)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_fast_past_deadline() {
        let gov = RateGovernor::default();
        let r = route(1);
        gov.record(&r, &RestResponse::json(200, json!({})).with_rate(headers(0, 10_000)));

        let start = Instant::now();
        let err = gov
            .acquire(&r, start + Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::RateLimited { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_bucket_shares_window() {
        let gov = RateGovernor::default();
        let get = RestRequest::get("/channels/{}/messages", &[&Snowflake(1)]).route;
        let post = route(1);

        let mut rate = headers(0, 4_000);
        rate.bucket = Some("shared".into());
        gov.record(&get, &RestResponse::json(200, json!([])).with_rate(rate.clone()));
        gov.record(&post, &RestResponse::json(200, json!({})).with_rate(rate));

        assert!(matches!(gov.admit(&get), Admission::Wait(_)));
        assert!(matches!(gov.admit(&post), Admission::Wait(_)));
    }
}
