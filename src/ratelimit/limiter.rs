//! The rate limiter orchestrator.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::{Algorithm, RateLimiterConfig};
use crate::error::Result;
use crate::store::CounterStore;

use super::decision::{Decision, DenialResponse, HeaderApplier};
use super::{fixed, sliding};

/// Derives the quota identifier for a request.
pub type KeyGenerator = Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>;

/// Optional override for the denial artifact. Returning `None` declines,
/// falling through to the default response.
pub type DenialHandler = Arc<dyn Fn(&Decision) -> Option<DenialResponse> + Send + Sync>;

/// Connection-level facts the limiter may derive an identifier from.
///
/// Only the directly observed client address belongs here; extracting
/// addresses from proxy headers is a host-framework concern.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// The peer address the request arrived from, if known
    pub client_addr: Option<IpAddr>,
}

impl RequestInfo {
    /// A request with no known client address.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request from the given client address.
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            client_addr: Some(addr),
        }
    }
}

/// The full result of evaluating a request.
pub struct Evaluation {
    /// The admission decision
    pub decision: Decision,
    /// The response to send instead of proceeding; present only on denial
    pub denial: Option<DenialResponse>,
    /// Stamps rate-limit headers onto whatever response goes out
    pub headers: HeaderApplier,
}

/// Checks identifiers against a configured limit and window.
///
/// The limiter is stateless per call beyond its immutable configuration; all
/// counter state lives in the store, so one limiter can be shared freely
/// across tasks.
pub struct RateLimiter {
    config: RateLimiterConfig,
    store: Arc<dyn CounterStore>,
    key_generator: KeyGenerator,
    on_limit_reached: Option<DenialHandler>,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    ///
    /// Fails fast on malformed configuration; nothing is clamped.
    pub fn new(config: RateLimiterConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            key_generator: Arc::new(default_key_generator),
            on_limit_reached: None,
        })
    }

    /// Replace the identifier-derivation function.
    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(generator);
        self
    }

    /// Install a denial-artifact override.
    pub fn with_denial_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Decision) -> Option<DenialResponse> + Send + Sync + 'static,
    {
        self.on_limit_reached = Some(Arc::new(handler));
        self
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check the rate limit for an identifier, consuming one unit of quota.
    pub async fn check(&self, identifier: &str) -> Result<Decision> {
        let key = format!("{}:{}", self.config.prefix, identifier);

        trace!(
            key = %key,
            algorithm = ?self.config.algorithm,
            "Checking rate limit"
        );

        let decision = match self.config.algorithm {
            Algorithm::FixedWindow => {
                fixed::check(
                    self.store.as_ref(),
                    &key,
                    self.config.limit,
                    self.config.window_ms,
                )
                .await?
            }
            Algorithm::SlidingWindow => {
                sliding::check(
                    self.store.as_ref(),
                    &key,
                    self.config.limit,
                    self.config.window_ms,
                )
                .await?
            }
        };

        if !decision.allowed {
            debug!(
                key = %key,
                limit = self.config.limit,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Derive the quota identifier for a request.
    pub fn resolve_key(&self, request: &RequestInfo) -> String {
        (self.key_generator)(request)
    }

    /// The full pipeline: resolve the identifier, check it, and shape the
    /// response.
    ///
    /// On denial the configured handler may supply a replacement artifact;
    /// if it declines, the default 429 response is used. The header applier
    /// is always returned and is a no-op when header emission is disabled.
    pub async fn evaluate(&self, request: &RequestInfo) -> Result<Evaluation> {
        let identifier = self.resolve_key(request);
        let decision = self.check(&identifier).await?;

        let denial = if decision.allowed {
            None
        } else {
            let overridden = self
                .on_limit_reached
                .as_ref()
                .and_then(|handler| handler(&decision));
            Some(overridden.unwrap_or_else(|| DenialResponse::default_for(&decision)))
        };

        let headers = if self.config.skip_headers {
            HeaderApplier::disabled()
        } else {
            HeaderApplier::new(&decision)
        };

        Ok(Evaluation {
            decision,
            denial,
            headers,
        })
    }

    /// Release the store's resources.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

fn default_key_generator(request: &RequestInfo) -> String {
    match request.client_addr {
        Some(addr) => addr.to_string(),
        None => "unknown".to_string(),
    }
}
