//! # Graceful Degradation Coordinator
//!
//! Single entry point through which all degradable operations are invoked.
//! The coordinator owns one circuit breaker and one fallback configuration
//! per registered dependency and computes per-dependency and system-wide
//! degradation levels.
//!
//! ## Call flow
//!
//! ```text
//! execute_with_degradation("loyalty-ledger", key, op)
//!   ├── unregistered? run op directly (explicit escape hatch)
//!   ├── breaker rejects (open)? ──┐
//!   ├── breaker admits, op fails ─┤
//!   │                             ▼
//!   │                  fallback chain, strict order:
//!   │                    1. cache read        (use_cache)
//!   │                    2. fallback operation (retry/timeout bounded)
//!   │                    3. static defaults   (use_default_values)
//!   │                    4. DegradationError::Exhausted
//!   └── breaker admits, op succeeds: return result
//! ```
//!
//! The coordinator is explicitly constructed and dependency-injected by the
//! application's startup wiring; there is no process-global instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::degradation::{
    DegradationLevel, FallbackCache, FallbackConfig, MokaFallbackCache, ServiceHealth,
};
use crate::error::{BoxError, DegradationError};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, StateChange, StateListener};

/// Callback fired synchronously whenever a breaker state change recomputes a
/// service's degradation level.
pub type DegradationCallback = Arc<dyn Fn(&str, DegradationLevel) + Send + Sync>;

struct RegisteredService {
    breaker: Arc<CircuitBreaker>,
    fallback: FallbackConfig,
}

/// Coordinates circuit breakers and fallback strategies for named
/// dependencies.
pub struct DegradationCoordinator {
    services: DashMap<String, RegisteredService>,
    cache: Arc<dyn FallbackCache>,
}

impl DegradationCoordinator {
    /// Create a coordinator using the given cache accessor for the cache
    /// fallback stage.
    pub fn new(cache: Arc<dyn FallbackCache>) -> Self {
        Self {
            services: DashMap::new(),
            cache,
        }
    }

    /// Create a coordinator with the default in-process moka cache.
    pub fn with_default_cache() -> Self {
        Self::new(Arc::new(MokaFallbackCache::default()))
    }

    /// Register a dependency for degradable execution.
    ///
    /// Must be called before `execute_with_degradation` is used for `name`.
    /// Re-registration is last-write-wins: the previous breaker and fallback
    /// config are replaced wholesale.
    pub fn register_service(
        &self,
        name: impl Into<String>,
        breaker_config: CircuitBreakerConfig,
        fallback: FallbackConfig,
        on_degradation: Option<DegradationCallback>,
    ) {
        let name = name.into();

        let listener: StateListener = Arc::new(move |change: StateChange<'_>| {
            let level =
                DegradationLevel::from_breaker(change.to, change.metrics.failure_rate);
            info!(
                service = change.service,
                from = ?change.from,
                to = ?change.to,
                level = ?level,
                "Dependency degradation level recomputed"
            );
            if let Some(callback) = &on_degradation {
                callback(change.service, level);
            }
        });

        let breaker = Arc::new(CircuitBreaker::with_state_listener(
            name.clone(),
            breaker_config,
            listener,
        ));

        if self
            .services
            .insert(name.clone(), RegisteredService { breaker, fallback })
            .is_some()
        {
            debug!(service = %name, "Service re-registered; previous breaker replaced");
        } else {
            debug!(service = %name, "Service registered for degradable execution");
        }
    }

    /// Whether `name` has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// The breaker guarding `name`, for operational tooling (force-open,
    /// metrics scraping). `None` for unregistered dependencies.
    pub fn circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.services.get(name).map(|s| Arc::clone(&s.breaker))
    }

    /// Execute `operation` against the named dependency with breaker gating
    /// and the configured fallback chain (no per-call fallback operation).
    ///
    /// `cache_key` identifies the call context for the cache fallback stage;
    /// calls that would produce different results must use different keys.
    pub async fn execute_with_degradation<T, F, Fut>(
        &self,
        service: &str,
        cache_key: &str,
        operation: F,
    ) -> Result<T, DegradationError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        self.execute_inner(
            service,
            cache_key,
            operation,
            None::<fn() -> std::future::Ready<Result<T, BoxError>>>,
        )
        .await
    }

    /// Like [`execute_with_degradation`](Self::execute_with_degradation) but
    /// with a per-call fallback operation tried after the cache stage. The
    /// fallback operation is bounded by the registered config's
    /// `retry_attempts` and `timeout`; its successful result is cached when
    /// `use_cache` is set.
    pub async fn execute_with_fallback<T, F, Fut, FB, FutB>(
        &self,
        service: &str,
        cache_key: &str,
        operation: F,
        fallback_operation: FB,
    ) -> Result<T, DegradationError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        FB: Fn() -> FutB,
        FutB: Future<Output = Result<T, BoxError>>,
    {
        self.execute_inner(service, cache_key, operation, Some(fallback_operation))
            .await
    }

    async fn execute_inner<T, F, Fut, FB, FutB>(
        &self,
        service: &str,
        cache_key: &str,
        operation: F,
        fallback_operation: Option<FB>,
    ) -> Result<T, DegradationError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        FB: Fn() -> FutB,
        FutB: Future<Output = Result<T, BoxError>>,
    {
        // Clone the entry out of the map so no shard lock is held across await
        let Some((breaker, fallback)) = self
            .services
            .get(service)
            .map(|s| (Arc::clone(&s.breaker), s.fallback.clone()))
        else {
            debug!(service, "Unregistered dependency; executing without protection");
            return operation().await.map_err(|source| DegradationError::Operation {
                service: service.to_string(),
                source,
            });
        };

        let cause = if breaker.should_allow() {
            let start = Instant::now();
            match operation().await {
                Ok(value) => {
                    breaker.record_success(start.elapsed());
                    return Ok(value);
                }
                Err(source) => {
                    breaker.record_failure(start.elapsed());
                    DegradationError::Operation {
                        service: service.to_string(),
                        source,
                    }
                }
            }
        } else {
            warn!(service, "Circuit open; skipping primary operation");
            DegradationError::CircuitOpen {
                service: service.to_string(),
            }
        };

        self.handle_degradation(service, cache_key, &fallback, fallback_operation, cause)
            .await
    }

    /// Walk the fallback chain for a failed or rejected primary operation.
    /// Each stage is attempted at most once per call; only the fallback
    /// operation itself is retried, bounded by the registered config.
    async fn handle_degradation<T, FB, FutB>(
        &self,
        service: &str,
        cache_key: &str,
        config: &FallbackConfig,
        fallback_operation: Option<FB>,
        cause: DegradationError,
    ) -> Result<T, DegradationError>
    where
        T: Serialize + DeserializeOwned,
        FB: Fn() -> FutB,
        FutB: Future<Output = Result<T, BoxError>>,
    {
        warn!(service, cause = %cause, "Entering degraded execution");
        let full_key = format!("degradation:{service}:{cache_key}");

        // Stage 1: cache read
        if config.use_cache {
            if let Some(value) = self.cache.get(&full_key).await {
                match serde_json::from_value::<T>(value) {
                    Ok(result) => {
                        info!(service, stage = "cache", "Degraded call served from cache");
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(service, error = %e, "Cached fallback value failed to deserialize")
                    }
                }
            } else {
                debug!(service, stage = "cache", "No cached value available");
            }
        }

        // Stage 2: fallback operation
        if let Some(fallback_op) = fallback_operation {
            let attempts = config.retry_attempts.max(1);
            for attempt in 1..=attempts {
                match tokio::time::timeout(config.timeout, fallback_op()).await {
                    Ok(Ok(result)) => {
                        if config.use_cache {
                            match serde_json::to_value(&result) {
                                Ok(json) => {
                                    self.cache.set(&full_key, json, config.cache_ttl).await
                                }
                                Err(e) => {
                                    warn!(service, error = %e, "Fallback result not cacheable")
                                }
                            }
                        }
                        info!(
                            service,
                            stage = "fallback_operation",
                            attempt,
                            "Degraded call served by fallback operation"
                        );
                        return Ok(result);
                    }
                    Ok(Err(e)) => {
                        warn!(service, attempt, error = %e, "Fallback operation failed")
                    }
                    Err(_) => warn!(
                        service,
                        attempt,
                        timeout_ms = config.timeout.as_millis() as u64,
                        "Fallback operation timed out"
                    ),
                }
            }
        }

        // Stage 3: static defaults
        if config.use_default_values {
            if let Some(default) = &config.default_values {
                match serde_json::from_value::<T>(default.clone()) {
                    Ok(result) => {
                        info!(
                            service,
                            stage = "default_values",
                            "Degraded call served by configured defaults"
                        );
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(service, error = %e, "Configured default failed to deserialize")
                    }
                }
            }
        }

        error!(service, cause = %cause, "All fallback stages exhausted");
        Err(DegradationError::Exhausted {
            service: service.to_string(),
            source: Box::new(cause),
        })
    }

    /// Derived health for one registered dependency.
    pub fn get_service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.services
            .get(name)
            .map(|s| ServiceHealth::from_breaker(&s.breaker))
    }

    /// Derived health for every registered dependency, for the operational
    /// status surface.
    pub fn get_all_service_health(&self) -> Vec<ServiceHealth> {
        self.services
            .iter()
            .map(|s| ServiceHealth::from_breaker(&s.breaker))
            .collect()
    }

    /// The least healthy of all registered services' degradation levels.
    /// `Full` when nothing is registered.
    pub fn get_system_degradation_level(&self) -> DegradationLevel {
        self.services
            .iter()
            .map(|s| {
                let metrics = s.breaker.metrics();
                DegradationLevel::from_breaker(metrics.current_state, metrics.failure_rate)
            })
            .max()
            .unwrap_or(DegradationLevel::Full)
    }
}
