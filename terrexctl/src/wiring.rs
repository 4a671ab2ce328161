use std::sync::Arc;

use anyhow::{Context, anyhow};
use terrex_config::{EndpointConfig, TerrexConfig};
use terrex_core::{
    ProductionOrchestrator,
    clock::{Clock, SystemClock},
    infra::{
        CommandJobIndex, FsDistributionCache, HttpInventoryOracle, HttpOrderingService,
        InMemoryLeaseStore, InMemoryWorkItemStore, LogNotifier, PatternClassifier,
        PostgresWorkItemStore, RedisLeaseStore, WebhookNotifier,
    },
    orchestration::Collaborators,
    ports::{NotificationSink, SharedLeaseStore, WorkItemStore},
};
use tracing::{info, warn};

/// Connect every collaborator named in the config.
pub async fn build_orchestrator(config: &TerrexConfig) -> anyhow::Result<ProductionOrchestrator> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn WorkItemStore> = match config.database.url.as_deref() {
        Some(url) => Arc::new(
            PostgresWorkItemStore::connect_with(url, config.database.max_connections)
                .await
                .context("failed to connect to the work-item database")?,
        ),
        None => {
            warn!("no database configured; using an in-memory store that is lost on exit");
            Arc::new(InMemoryWorkItemStore::new())
        }
    };

    let lease: Arc<dyn SharedLeaseStore> = match &config.redis {
        Some(redis) => Arc::new(
            RedisLeaseStore::new(&redis.url, redis.key_prefix.clone())
                .await
                .context("failed to connect to the lease store")?,
        ),
        None => {
            info!("no redis configured; purge lease is held in process");
            Arc::new(InMemoryLeaseStore::new(clock.clone()))
        }
    };

    let inventory = HttpInventoryOracle::with_timeout(
        required_url(&config.inventory, "inventory")?,
        config.inventory.timeout(),
    )
    .context("invalid inventory endpoint")?;
    let ordering = HttpOrderingService::with_timeout(
        required_url(&config.ordering, "ordering")?,
        config.ordering.timeout(),
    )
    .context("invalid ordering endpoint")?;

    let notifier: Arc<dyn NotificationSink> = match config.notifications.url() {
        Some(url) => Arc::new(
            WebhookNotifier::new(url, config.notifications.timeout())
                .context("invalid notifications endpoint")?,
        ),
        None => {
            info!("no notification endpoint configured; notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let classifier = PatternClassifier::from_config(&config.orchestrator.classifier)
        .context("invalid classifier rules")?;
    if classifier.is_empty() {
        warn!("classifier has no rules; every processing failure becomes a hard error");
    }

    info!(
        cache.root = %config.cache.root.display(),
        cache.quota_bytes = config.cache.quota_bytes,
        classifier.rules = classifier.len(),
        "orchestrator collaborators ready"
    );

    let collaborators = Collaborators {
        store,
        inventory: Arc::new(inventory),
        ordering: Arc::new(ordering),
        cluster: Arc::new(CommandJobIndex::new(
            config.cluster.list_command.clone(),
            config.cluster.kill_command.clone(),
        )),
        cache: Arc::new(FsDistributionCache::new(
            config.cache.root.clone(),
            config.cache.quota_bytes,
        )),
        classifier: Arc::new(classifier),
        notifier,
        lease,
        clock,
    };
    Ok(ProductionOrchestrator::new(
        collaborators,
        config.orchestrator.clone(),
    ))
}

fn required_url<'a>(endpoint: &'a EndpointConfig, name: &str) -> anyhow::Result<&'a str> {
    endpoint
        .url()
        .ok_or_else(|| anyhow!("{name}.url is not configured"))
}
