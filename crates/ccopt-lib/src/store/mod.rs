//! Metrics and inventory sources
//!
//! The relational store is an external collaborator; the pipeline only needs
//! a bounded metrics window per instance plus inventory lookups.

mod memory;
pub mod synthetic;

pub use memory::{InMemoryMetricsStore, Snapshot};

use crate::error::Result;
use crate::models::{InstanceFilter, InstanceInfo, MetricSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read access to instance inventory and utilization samples
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Samples for an instance with `timestamp >= since`, oldest first
    async fn get_metrics(&self, instance_ref: &str, since: DateTime<Utc>)
        -> Result<Vec<MetricSample>>;

    /// Inventory record for an instance
    async fn get_instance(&self, instance_ref: &str) -> Result<InstanceInfo>;

    /// References of all instances matching the filter, in stable order
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<String>>;
}
