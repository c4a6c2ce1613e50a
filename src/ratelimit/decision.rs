//! Admission decisions and response shaping.

use serde_json::json;

/// `X-RateLimit-Limit` header name.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// `X-RateLimit-Remaining` header name.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// `X-RateLimit-Reset` header name (epoch seconds, rounded up).
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// `Retry-After` header name (seconds, denied responses only).
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// The outcome of one rate limit check.
///
/// Derived from the observed count on every check, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The configured limit the count was checked against
    pub limit: u64,
    /// Quota left in the current window
    pub remaining: u64,
    /// When the current window ends, epoch milliseconds
    pub reset_at: u64,
    /// Whole seconds until the caller should retry; 0 when admitted
    pub retry_after_secs: u64,
}

impl Decision {
    /// Derive a decision from an observed count.
    pub(crate) fn from_count(observed: u64, limit: u64, reset_at: u64, now: u64) -> Self {
        let allowed = observed <= limit;
        let retry_after_secs = if allowed {
            0
        } else {
            ceil_secs(reset_at.saturating_sub(now))
        };

        Self {
            allowed,
            limit,
            remaining: limit.saturating_sub(observed),
            reset_at,
            retry_after_secs,
        }
    }

    /// Window reset time as epoch seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        ceil_secs(self.reset_at)
    }

    /// The standard rate-limit headers for this decision.
    ///
    /// `Retry-After` is present only on denials.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at_secs().to_string()),
        ];
        if !self.allowed {
            headers.push((HEADER_RETRY_AFTER, self.retry_after_secs.to_string()));
        }
        headers
    }
}

fn ceil_secs(millis: u64) -> u64 {
    (millis + 999) / 1000
}

/// Stamps rate-limit headers onto an outgoing response.
///
/// A no-op when header emission is disabled, but always returned so callers
/// never branch on configuration themselves.
#[derive(Debug, Clone)]
pub struct HeaderApplier {
    headers: Vec<(&'static str, String)>,
}

impl HeaderApplier {
    pub(crate) fn new(decision: &Decision) -> Self {
        Self {
            headers: decision.headers(),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Invoke `set` once per header.
    pub fn apply<F>(&self, mut set: F)
    where
        F: FnMut(&str, &str),
    {
        for (name, value) in &self.headers {
            set(name, value);
        }
    }

    /// The headers this applier would stamp.
    pub fn headers(&self) -> &[(&'static str, String)] {
        &self.headers
    }
}

/// The response artifact produced when a request is denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialResponse {
    /// HTTP status code
    pub status: u16,
    /// Headers to attach to the denial
    pub headers: Vec<(String, String)>,
    /// Serialized response body
    pub body: String,
}

impl DenialResponse {
    /// The default denial: status 429, the standard headers, and a JSON body
    /// naming the retry delay.
    pub fn default_for(decision: &Decision) -> Self {
        let mut headers: Vec<(String, String)> = decision
            .headers()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));

        let body = json!({
            "error": "Too many requests, please try again later.",
            "retryAfter": decision.retry_after_secs,
        })
        .to_string();

        Self {
            status: 429,
            headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_allowed_under_limit() {
        let decision = Decision::from_count(3, 10, 60_000, 1_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 7);
        assert_eq!(decision.retry_after_secs, 0);
    }

    #[test]
    fn test_decision_allowed_at_limit_with_zero_remaining() {
        let decision = Decision::from_count(10, 10, 60_000, 1_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, 0);
    }

    #[test]
    fn test_decision_denied_over_limit() {
        let decision = Decision::from_count(11, 10, 61_000, 1_000);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        // ceil((61000 - 1000) / 1000) = 60
        assert_eq!(decision.retry_after_secs, 60);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = Decision::from_count(11, 10, 2_500, 1_000);
        assert_eq!(decision.retry_after_secs, 2);
    }

    #[test]
    fn test_reset_at_secs_rounds_up() {
        let decision = Decision::from_count(1, 10, 90_500, 1_000);
        assert_eq!(decision.reset_at_secs(), 91);
    }

    #[test]
    fn test_headers_on_allowed_decision() {
        let decision = Decision::from_count(4, 10, 60_000, 1_000);
        let headers = decision.headers();

        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], (HEADER_LIMIT, "10".to_string()));
        assert_eq!(headers[1], (HEADER_REMAINING, "6".to_string()));
        assert_eq!(headers[2], (HEADER_RESET, "60".to_string()));
    }

    #[test]
    fn test_headers_on_denied_decision_include_retry_after() {
        let decision = Decision::from_count(11, 10, 31_000, 1_000);
        let headers = decision.headers();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], (HEADER_RETRY_AFTER, "30".to_string()));
    }

    #[test]
    fn test_header_applier_stamps_all_headers() {
        let decision = Decision::from_count(11, 10, 31_000, 1_000);
        let applier = HeaderApplier::new(&decision);

        let mut seen = Vec::new();
        applier.apply(|name, value| seen.push((name.to_string(), value.to_string())));

        assert_eq!(seen.len(), 4);
        assert!(seen.iter().any(|(n, _)| n == HEADER_RETRY_AFTER));
    }

    #[test]
    fn test_disabled_header_applier_is_noop() {
        let applier = HeaderApplier::disabled();

        let mut calls = 0;
        applier.apply(|_, _| calls += 1);

        assert_eq!(calls, 0);
        assert!(applier.headers().is_empty());
    }

    #[test]
    fn test_default_denial_response() {
        let decision = Decision::from_count(11, 10, 31_000, 1_000);
        let denial = DenialResponse::default_for(&decision);

        assert_eq!(denial.status, 429);
        assert!(denial
            .headers
            .iter()
            .any(|(n, v)| n == HEADER_RETRY_AFTER && v == "30"));

        let body: serde_json::Value = serde_json::from_str(&denial.body).unwrap();
        assert_eq!(body["retryAfter"], 30);
        assert!(body["error"].is_string());
    }
}
