use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use super::queue::RecomputeQueue;
use super::scoring;
use crate::config::HotspotConfig;
use crate::error::Result;
use crate::incidents::IncidentStore;
use crate::messaging::DomainEvents;
use crate::models::{BucketKey, HotspotCluster, Incident};

/// Pattern/Hotspot Engine: incremental, per-bucket clustering
pub struct HotspotEngine {
    config: HotspotConfig,
    store: Arc<dyn IncidentStore>,
    clusters: RwLock<BTreeMap<BucketKey, HotspotCluster>>,
    queue: RecomputeQueue,
    recomputes: AtomicU64,
    events: Option<DomainEvents>,
}

impl HotspotEngine {
    pub fn new(config: HotspotConfig, store: Arc<dyn IncidentStore>) -> Self {
        Self {
            config,
            store,
            clusters: RwLock::new(BTreeMap::new()),
            queue: RecomputeQueue::new(),
            recomputes: AtomicU64::new(0),
            events: None,
        }
    }

    pub fn with_events(mut self, events: DomainEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Buckets an incident falls into, one per configured window
    pub fn bucket_keys(&self, incident: &Incident) -> Vec<BucketKey> {
        self.config
            .windows_days
            .iter()
            .map(|days| BucketKey::new(&incident.institution, &incident.location.key, *days))
            .collect()
    }

    /// Incident created or updated: queue its buckets for recompute
    pub fn notify_incident(&self, incident: &Incident) {
        for key in self.bucket_keys(incident) {
            if self.queue.request(key.clone()) {
                debug!("Queued hotspot recompute for {}", key);
            } else {
                debug!("Coalesced hotspot recompute for {}", key);
            }
        }
    }

    /// Recompute one bucket as of `at`
    pub async fn recompute(&self, key: &BucketKey, at: DateTime<Utc>) -> Result<()> {
        let incidents = self.store.list_at(&key.institution, &key.spatial).await?;
        let cluster = scoring::build_cluster(key, &incidents, &self.config, at);
        self.recomputes.fetch_add(1, Ordering::SeqCst);

        match cluster {
            Some(cluster) => {
                debug!(
                    "Hotspot {} recomputed: {} incidents, score {:.3}",
                    cluster.id,
                    cluster.incident_count(),
                    cluster.score
                );
                if let Some(events) = &self.events {
                    events.hotspot_updated(&cluster).await;
                }
                self.clusters.write().await.insert(key.clone(), cluster);
            }
            None => {
                if self.clusters.write().await.remove(key).is_some() {
                    debug!("Hotspot {} emptied", key);
                }
            }
        }
        Ok(())
    }

    async fn process(&self, key: BucketKey) {
        if let Err(e) = self.recompute(&key, Utc::now()).await {
            // Cluster stays at its previous state; last_recomputed shows how stale it is
            warn!("Hotspot recompute for {} failed: {}", key, e);
        }
        self.queue.finish(&key);
    }

    /// Drain the queue on the current task. Returns the number of buckets processed.
    pub async fn run_pending(&self) -> usize {
        let mut processed = 0;
        while let Some(key) = self.queue.take() {
            self.process(key).await;
            processed += 1;
        }
        processed
    }

    /// Spawn the recompute workers and the periodic refresh of known buckets
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let refresh = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let workers = self.config.recompute_workers.max(1);
        info!("Starting hotspot engine with {} recompute workers", workers);

        let mut handles = Vec::with_capacity(workers + 1);
        for _ in 0..workers {
            let engine = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        key = engine.queue.next() => engine.process(key).await,
                    }
                }
            }));
        }

        // Decay moves scores without any write, so known buckets are refreshed periodically
        let engine = self;
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(refresh);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let keys: Vec<BucketKey> = engine.clusters.read().await.keys().cloned().collect();
                        for key in keys {
                            engine.queue.request(key);
                        }
                    }
                }
            }
            info!("Hotspot engine stopped");
        }));
        handles
    }

    /// Throw away every cluster and rebuild from the incident set
    pub async fn rebuild(&self) -> Result<usize> {
        let incidents = self.store.all().await?;
        self.clusters.write().await.clear();

        let mut keys: Vec<BucketKey> = incidents
            .iter()
            .filter(|i| scoring::counts(i))
            .flat_map(|i| self.bucket_keys(i))
            .collect();
        keys.sort();
        keys.dedup();

        let at = Utc::now();
        for key in &keys {
            self.recompute(key, at).await?;
        }
        info!("Rebuilt {} hotspot buckets from {} incidents", keys.len(), incidents.len());
        Ok(keys.len())
    }

    /// Clusters of an institution, optionally restricted to one window
    pub async fn clusters(&self, institution: &str, window_days: Option<u32>) -> Vec<HotspotCluster> {
        self.clusters
            .read()
            .await
            .values()
            .filter(|c| c.bucket.institution == institution)
            .filter(|c| window_days.map_or(true, |w| c.bucket.window_days == w))
            .cloned()
            .collect()
    }

    /// Ranked clusters, highest score first
    pub async fn top(&self, institution: &str, window_days: Option<u32>, limit: usize) -> Vec<HotspotCluster> {
        let mut ranked = scoring::rank(self.clusters(institution, window_days).await);
        ranked.truncate(limit);
        ranked
    }

    /// Number of recomputations performed so far
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }
}
