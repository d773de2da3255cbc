use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::HealthStatus;

/// Errors related to backend operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A type-safe representation of a backend target URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUrl {
    url: String,
    is_secure: bool,
    authority: String,
}

impl BackendUrl {
    pub fn new(url: &str) -> BackendResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        let is_secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(BackendError::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {url}"
                )))
            }
        };

        let authority = parsed
            .host_str()
            .map(|host| match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            })
            .ok_or_else(|| BackendError::InvalidUrl(format!("missing host in {url}")))?;

        Ok(BackendUrl {
            url: url.to_string(),
            is_secure,
            authority,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// `host[:port]`, suitable for the outbound `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn into_string(self) -> String {
        self.url
    }
}

impl FromStr for BackendUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendUrl::new(s)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Rolling health-check state for one backend. Grouped behind a single
/// mutex so a probe result applies its reset-then-increment-then-threshold
/// sequence as one atomic transition instead of three independent updates
/// that concurrent callers (an active probe racing a passive failure) could
/// interleave.
#[derive(Debug, Default)]
struct Counters {
    consecutive_successes: u32,
    consecutive_failures: u32,
    /// Unix epoch millis of the last probe (active or passive), 0 if never
    /// checked.
    last_checked_at_millis: u64,
}

impl Counters {
    fn mark_checked_now(&mut self) {
        if let Ok(since_epoch) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_checked_at_millis = since_epoch.as_millis() as u64;
        }
    }
}

/// A single upstream instance within a backend group.
///
/// `healthy` and `in_flight` stay lock-free atomics so backend selection
/// never blocks on a lock on the request hot path; the health checker's
/// rolling counters are guarded by `counters` instead, since probe results
/// arrive far less often and must apply serially per backend.
#[derive(Debug)]
pub struct Backend {
    pub url: BackendUrl,
    pub weight: u32,
    healthy: AtomicBool,
    in_flight: AtomicU64,
    counters: Mutex<Counters>,
}

impl Backend {
    pub fn new(url: BackendUrl, weight: u32) -> Self {
        Self {
            url,
            weight,
            healthy: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> HealthStatus {
        if self.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn begin_request(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { backend: self }
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.counters.lock().expect("backend counters mutex poisoned").consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.counters.lock().expect("backend counters mutex poisoned").consecutive_failures
    }

    /// When this backend was last probed, active or passive, or `None` if it
    /// has never been checked.
    pub fn last_checked_at(&self) -> Option<SystemTime> {
        let millis = self
            .counters
            .lock()
            .expect("backend counters mutex poisoned")
            .last_checked_at_millis;
        if millis == 0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Records one successful probe. Returns `true` if this transitioned the
    /// backend from unhealthy to healthy (the `healthy_threshold`-th
    /// consecutive success).
    pub fn record_probe_success(&self, healthy_threshold: u32) -> bool {
        let mut counters = self.counters.lock().expect("backend counters mutex poisoned");
        counters.mark_checked_now();
        counters.consecutive_failures = 0;
        counters.consecutive_successes += 1;
        if counters.consecutive_successes >= healthy_threshold && !self.healthy.load(Ordering::Acquire) {
            self.healthy.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Records one failed probe. Returns `true` if this transitioned the
    /// backend from healthy to unhealthy (the `unhealthy_threshold`-th
    /// consecutive failure).
    pub fn record_probe_failure(&self, unhealthy_threshold: u32) -> bool {
        let mut counters = self.counters.lock().expect("backend counters mutex poisoned");
        counters.mark_checked_now();
        counters.consecutive_successes = 0;
        counters.consecutive_failures += 1;
        if counters.consecutive_failures >= unhealthy_threshold && self.healthy.load(Ordering::Acquire) {
            self.healthy.store(false, Ordering::Release);
            return true;
        }
        false
    }
}

/// RAII guard decrementing a backend's in-flight counter when dropped,
/// regardless of whether the request succeeded, failed, or panicked.
pub struct InFlightGuard<'a> {
    backend: &'a Backend,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_url_valid() {
        let url = "http://example.com";
        let backend_url = BackendUrl::new(url).expect("valid http url should parse");
        assert_eq!(backend_url.as_str(), url);
        assert!(!backend_url.is_secure());
        assert_eq!(backend_url.authority(), "example.com");

        let secure_url = "https://secure.example.com:8443";
        let secure_backend_url =
            BackendUrl::new(secure_url).expect("valid https url should parse");
        assert!(secure_backend_url.is_secure());
        assert_eq!(secure_backend_url.authority(), "secure.example.com:8443");
    }

    #[test]
    fn test_backend_url_invalid() {
        assert!(BackendUrl::new("example.com").is_err());
        assert!(BackendUrl::new("ftp://example.com").is_err());
    }

    #[test]
    fn test_backend_url_from_str() {
        let url = "http://example.com";
        let backend_url: BackendUrl = url.parse().expect("parse should succeed");
        assert_eq!(backend_url.as_str(), url);
    }

    #[test]
    fn test_backend_url_display() {
        let url = "http://example.com";
        let backend_url = BackendUrl::new(url).unwrap();
        assert_eq!(backend_url.to_string(), url);
    }

    #[test]
    fn test_flap_damping_requires_consecutive_events() {
        let url = BackendUrl::new("http://example.com").unwrap();
        let backend = Backend::new(url, 1);
        assert!(backend.is_healthy());

        // One failure shouldn't flip state when the threshold is 3.
        assert!(!backend.record_probe_failure(3));
        assert!(backend.is_healthy());

        // A success resets the failure streak.
        assert!(!backend.record_probe_success(2));
        assert_eq!(backend.consecutive_failures(), 0);

        assert!(!backend.record_probe_failure(3));
        assert!(!backend.record_probe_failure(3));
        assert!(backend.record_probe_failure(3));
        assert!(!backend.is_healthy());

        assert!(!backend.record_probe_success(2));
        assert!(backend.is_healthy() == false);
        assert!(backend.record_probe_success(2));
        assert!(backend.is_healthy());
    }

    #[test]
    fn test_in_flight_guard_decrements_on_drop() {
        let url = BackendUrl::new("http://example.com").unwrap();
        let backend = Backend::new(url, 1);
        assert_eq!(backend.in_flight(), 0);
        {
            let _guard = backend.begin_request();
            assert_eq!(backend.in_flight(), 1);
        }
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_last_checked_at_tracks_probes() {
        let url = BackendUrl::new("http://example.com").unwrap();
        let backend = Backend::new(url, 1);
        assert!(backend.last_checked_at().is_none());

        backend.record_probe_success(1);
        assert!(backend.last_checked_at().is_some());

        let first = backend.last_checked_at().unwrap();
        backend.record_probe_failure(1);
        assert!(backend.last_checked_at().unwrap() >= first);
    }
}
