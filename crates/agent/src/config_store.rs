use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

use bazaar_core::domain::support_config::{SupportConfig, DEFAULT_MARKETPLACE};
use bazaar_db::repositories::SupportConfigRepository;

struct CachedConfig {
    config: SupportConfig,
    fetched_at: Instant,
}

/// Resolves the effective support configuration for a marketplace:
/// its active row, else the active `default` row, else the built-in default.
pub struct ConfigStore {
    repository: Arc<dyn SupportConfigRepository>,
    ttl: Duration,
    builtin: SupportConfig,
    cache: RwLock<HashMap<String, CachedConfig>>,
}

impl ConfigStore {
    pub fn new(repository: Arc<dyn SupportConfigRepository>, ttl: Duration) -> Self {
        Self { repository, ttl, builtin: SupportConfig::default(), cache: RwLock::new(HashMap::new()) }
    }

    /// Model used by the built-in fallback when no row is configured.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.builtin.model = model.into();
        self
    }

    pub fn builtin(&self) -> &SupportConfig {
        &self.builtin
    }

    pub async fn get_active_config(&self, marketplace: &str) -> SupportConfig {
        if !self.ttl.is_zero() {
            if let Some(cached) = self.cache.read().await.get(marketplace) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return cached.config.clone();
                }
            }
        }

        let mut cacheable = true;
        let mut resolved = None;
        for candidate in [marketplace, DEFAULT_MARKETPLACE] {
            match self.repository.find_active(candidate).await {
                Ok(Some(config)) => {
                    resolved = Some(config);
                    break;
                }
                Ok(None) => {}
                Err(error) => {
                    cacheable = false;
                    warn!(
                        event_name = "support_config.lookup_failed",
                        marketplace = candidate,
                        error = %error,
                        "support config lookup failed; falling back"
                    );
                }
            }
            if candidate == DEFAULT_MARKETPLACE {
                break;
            }
        }
        let config = resolved.unwrap_or_else(|| self.builtin.clone());

        if cacheable && !self.ttl.is_zero() {
            self.cache.write().await.insert(
                marketplace.to_string(),
                CachedConfig { config: config.clone(), fetched_at: Instant::now() },
            );
        }
        config
    }

    pub async fn invalidate(&self, marketplace: &str) {
        self.cache.write().await.remove(marketplace);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bazaar_core::domain::support_config::{SupportConfig, DEFAULT_MARKETPLACE};
    use bazaar_db::repositories::{
        InMemorySupportConfigRepository, RepositoryError, SupportConfigRepository,
    };

    use super::ConfigStore;

    #[derive(Default)]
    struct CountingRepository {
        inner: InMemorySupportConfigRepository,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SupportConfigRepository for CountingRepository {
        async fn find_active(
            &self,
            marketplace: &str,
        ) -> Result<Option<SupportConfig>, RepositoryError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_active(marketplace).await
        }

        async fn save(&self, config: SupportConfig) -> Result<(), RepositoryError> {
            self.inner.save(config).await
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl SupportConfigRepository for BrokenRepository {
        async fn find_active(&self, _: &str) -> Result<Option<SupportConfig>, RepositoryError> {
            Err(RepositoryError::Decode("corrupt row".to_string()))
        }

        async fn save(&self, _: SupportConfig) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn marketplace_row_wins_over_default_row() {
        let repo = Arc::new(InMemorySupportConfigRepository::default());
        let mut ebay = SupportConfig::for_marketplace("ebay");
        ebay.max_tokens = 200;
        repo.save(ebay).await.expect("save ebay");
        let mut fallback = SupportConfig::default();
        fallback.max_tokens = 900;
        repo.save(fallback).await.expect("save default");

        let store = ConfigStore::new(repo, Duration::ZERO);
        assert_eq!(store.get_active_config("ebay").await.max_tokens, 200);
        assert_eq!(store.get_active_config("etsy").await.max_tokens, 900);
    }

    #[tokio::test]
    async fn builtin_default_is_served_when_nothing_is_configured() {
        let store =
            ConfigStore::new(Arc::new(InMemorySupportConfigRepository::default()), Duration::ZERO)
                .with_default_model("llama3.1");

        let config = store.get_active_config("amazon").await;
        assert_eq!(config.marketplace, DEFAULT_MARKETPLACE);
        assert_eq!(config.model, "llama3.1");
    }

    #[tokio::test]
    async fn lookup_errors_degrade_to_builtin_default() {
        let store = ConfigStore::new(Arc::new(BrokenRepository), Duration::from_secs(30));
        let config = store.get_active_config("amazon").await;
        assert_eq!(&config, store.builtin());
    }

    #[tokio::test]
    async fn cached_entries_are_served_until_ttl_expires() {
        let repo = Arc::new(CountingRepository::default());
        repo.save(SupportConfig::for_marketplace("amazon")).await.expect("save");
        let store = ConfigStore::new(repo.clone(), Duration::from_secs(60));

        store.get_active_config("amazon").await;
        store.get_active_config("amazon").await;
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 1);

        store.invalidate("amazon").await;
        store.get_active_config("amazon").await;
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 2);
    }
}
