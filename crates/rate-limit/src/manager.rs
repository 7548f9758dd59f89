//! Rate limit manager implementation.

use std::{collections::BTreeMap, sync::Arc};

use config::{PresetName, RateLimitConfig};

use crate::{
    clock::Clock,
    error::RateLimitError,
    key::KeyGenerator,
    policy::RateLimitPolicy,
    route::RouteTable,
    storage::Storage,
};

/// Owns the counter store and the policy of every preset, and picks the policy of a request.
pub struct RateLimitManager {
    enabled: bool,
    storage: Arc<Storage>,
    presets: BTreeMap<PresetName, Arc<RateLimitPolicy>>,
    routes: RouteTable<Arc<RateLimitPolicy>>,
}

impl RateLimitManager {
    /// Create a new rate limit manager with the configured storage backend.
    pub async fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        let storage = Arc::new(Storage::from_config(&config.storage, config.sweep_interval, clock.clone()).await?);

        let presets: BTreeMap<_, _> = PresetName::ALL
            .into_iter()
            .map(|name| {
                let quota = config.presets.resolve(name);

                let policy = RateLimitPolicy::builder(storage.clone(), clock.clone())
                    .preset(&quota)
                    .key_generator(KeyGenerator::from(config.key))
                    .skip_system_endpoints(config.skip_system_endpoints)
                    .standard_headers(config.standard_headers)
                    .legacy_headers(config.legacy_headers)
                    .on_limit_reached(|denial| {
                        log::warn!(
                            "Rate limit '{}' reached for {}, retry in {}s",
                            denial.policy,
                            denial.state.key,
                            denial.retry_after_secs
                        );
                    })
                    .build();

                (name, Arc::new(policy))
            })
            .collect();

        let mut routes = RouteTable::new();

        for route in &config.routes {
            if let Some(policy) = presets.get(&route.preset) {
                routes.push(route.path.clone(), route.method, policy.clone());
            }
        }

        log::debug!(
            "Rate limiting {} with {} routes",
            if config.enabled { "enabled" } else { "disabled" },
            routes.len()
        );

        Ok(Self {
            enabled: config.enabled,
            storage,
            presets,
            routes,
        })
    }

    /// Whether rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The policy applied to a request, if any route matches.
    pub fn policy_for(&self, method: &str, path: &str) -> Option<&RateLimitPolicy> {
        if !self.enabled {
            return None;
        }

        self.routes.find(method, path).map(Arc::as_ref)
    }

    /// The policy of a preset.
    pub fn preset(&self, name: PresetName) -> Option<&RateLimitPolicy> {
        self.presets.get(&name).map(Arc::as_ref)
    }

    /// Stop background work of the store.
    pub fn shutdown(&self) {
        self.storage.shutdown();
    }
}
