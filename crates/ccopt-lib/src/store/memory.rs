//! In-memory metrics store with JSON snapshot persistence

use super::MetricsSource;
use crate::error::{OptimizerError, Result};
use crate::model::write_atomic;
use crate::models::{InstanceFilter, InstanceInfo, MetricSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Serialized inventory plus metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub instances: Vec<InstanceInfo>,
    pub metrics: Vec<MetricSample>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the snapshot atomically (temp file, fsync, rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_atomic(path, &serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    instances: BTreeMap<String, InstanceInfo>,
    metrics: HashMap<String, Vec<MetricSample>>,
}

/// Thread-safe metrics source backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut inner = StoreInner::default();
        for instance in snapshot.instances {
            inner.instances.insert(instance.instance_ref.clone(), instance);
        }
        for sample in snapshot.metrics {
            inner
                .metrics
                .entry(sample.instance_ref.clone())
                .or_default()
                .push(sample);
        }
        for samples in inner.metrics.values_mut() {
            samples.sort_by_key(|s| s.timestamp);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let snapshot = Snapshot::load(path)?;
        info!(
            path = %path.display(),
            instances = snapshot.instances.len(),
            samples = snapshot.metrics.len(),
            "Loaded metrics snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            instances: inner.instances.values().cloned().collect(),
            metrics: inner
                .instances
                .keys()
                .filter_map(|id| inner.metrics.get(id))
                .flatten()
                .cloned()
                .collect(),
        }
    }

    pub async fn upsert_instance(&self, instance: InstanceInfo) {
        let mut inner = self.inner.write().await;
        inner.instances.insert(instance.instance_ref.clone(), instance);
    }

    /// Append samples, keeping each instance's series ordered by timestamp
    pub async fn add_metrics(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let mut inner = self.inner.write().await;
        let mut touched = Vec::new();
        for sample in samples {
            touched.push(sample.instance_ref.clone());
            inner
                .metrics
                .entry(sample.instance_ref.clone())
                .or_default()
                .push(sample);
        }
        touched.sort();
        touched.dedup();
        for id in touched {
            if let Some(series) = inner.metrics.get_mut(&id) {
                series.sort_by_key(|s| s.timestamp);
            }
        }
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetricsStore {
    async fn get_metrics(
        &self,
        instance_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>> {
        let inner = self.inner.read().await;
        let samples: Vec<MetricSample> = inner
            .metrics
            .get(instance_ref)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!(instance_ref = %instance_ref, samples = samples.len(), "Read metrics window");
        Ok(samples)
    }

    async fn get_instance(&self, instance_ref: &str) -> Result<InstanceInfo> {
        let inner = self.inner.read().await;
        inner
            .instances
            .get(instance_ref)
            .cloned()
            .ok_or_else(|| OptimizerError::InstanceNotFound(instance_ref.to_string()))
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .map(|i| i.instance_ref.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn instance(id: &str, env: &str) -> InstanceInfo {
        InstanceInfo {
            instance_ref: id.to_string(),
            cloud_instance_id: format!("i-{}", id),
            hourly_cost: Some(0.1),
            environment: Some(env.to_string()),
            region: Some("us-west-2".to_string()),
            instance_type: Some("m5.large".to_string()),
            created_at: None,
        }
    }

    fn sample(id: &str, ts: DateTime<Utc>) -> MetricSample {
        MetricSample {
            instance_ref: id.to_string(),
            timestamp: ts,
            cpu_pct: Some(10.0),
            mem_pct: Some(20.0),
            net_in_bytes: Some(1_000_000),
            net_out_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_window_is_bounded_and_ordered() {
        let now = Utc::now();
        let store = InMemoryMetricsStore::new();
        store.upsert_instance(instance("a", "dev")).await;
        store
            .add_metrics(vec![
                sample("a", now - Duration::hours(1)),
                sample("a", now - Duration::days(10)),
                sample("a", now - Duration::hours(5)),
            ])
            .await;

        let window = store.get_metrics("a", now - Duration::days(7)).await.unwrap();
        assert_eq!(window.len(), 2);
        assert!(window[0].timestamp < window[1].timestamp);
    }

    #[tokio::test]
    async fn test_list_instances_filters() {
        let store = InMemoryMetricsStore::new();
        store.upsert_instance(instance("a", "dev")).await;
        store.upsert_instance(instance("b", "prod")).await;

        let all = store.list_instances(&InstanceFilter::default()).await.unwrap();
        assert_eq!(all, vec!["a".to_string(), "b".to_string()]);

        let prod = store
            .list_instances(&InstanceFilter {
                environment: Some("prod".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(prod, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let store = InMemoryMetricsStore::new();
        let err = store.get_instance("missing").await.unwrap_err();
        assert!(matches!(err, OptimizerError::InstanceNotFound(_)));
        assert!(store.get_metrics("missing", Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("snapshot.json");
        let now = Utc::now();

        let store = InMemoryMetricsStore::new();
        store.upsert_instance(instance("a", "dev")).await;
        store.add_metrics(vec![sample("a", now)]).await;
        store.snapshot().await.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reloaded = InMemoryMetricsStore::load(&path).unwrap();
        assert_eq!(reloaded.get_instance("a").await.unwrap().environment.as_deref(), Some("dev"));
        assert_eq!(
            reloaded.get_metrics("a", now - Duration::days(1)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_snapshot_save_replaces_previous() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");

        let store = InMemoryMetricsStore::new();
        store.upsert_instance(instance("a", "dev")).await;
        store.snapshot().await.save(&path).unwrap();
        store.upsert_instance(instance("b", "prod")).await;
        store.snapshot().await.save(&path).unwrap();

        let reloaded = Snapshot::load(&path).unwrap();
        assert_eq!(reloaded.instances.len(), 2);
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("snapshot.json")]);
    }
}
