//! Deterministic synthetic inventory and utilization data
//!
//! Produces snapshots with a realistic mix of idle, moderate and busy
//! instances for demos and tests.

use super::Snapshot;
use crate::models::{InstanceInfo, MetricSample};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Instance types offered by the generator with their on-demand hourly price
const CATALOG: &[(&str, f64)] = &[
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("t3.medium", 0.0416),
    ("c5.xlarge", 0.17),
    ("r5.large", 0.126),
];

const ENVIRONMENTS: &[&str] = &["dev", "staging", "prod"];

const REGIONS: &[&str] = &["us-west-2", "us-east-1", "eu-west-1"];

/// Configuration for synthetic data generation
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub instances: usize,
    pub days: i64,
    /// Interval between samples
    pub sample_interval: Duration,
    /// Probability that any single reading is absent
    pub missing_rate: f64,
    pub seed: u64,
    /// Timestamp of the newest sample
    pub end: DateTime<Utc>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            instances: 100,
            days: 7,
            sample_interval: Duration::hours(1),
            missing_rate: 0.02,
            seed: 42,
            end: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Profile {
    Idle,
    Moderate,
    Busy,
}

impl Profile {
    /// (cpu range, memory range) in percent
    fn ranges(self) -> ((f64, f64), (f64, f64)) {
        match self {
            Profile::Idle => ((3.0, 15.0), (8.0, 22.0)),
            Profile::Moderate => ((20.0, 45.0), (25.0, 55.0)),
            Profile::Busy => ((55.0, 90.0), (50.0, 85.0)),
        }
    }
}

/// Generate a snapshot of instances and hourly metrics
pub fn generate(config: &SyntheticConfig) -> Snapshot {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = config.end - Duration::days(config.days);

    let mut instances = Vec::with_capacity(config.instances);
    let mut profiles = Vec::with_capacity(config.instances);
    for i in 0..config.instances {
        let (instance_type, hourly_cost) = CATALOG[i % CATALOG.len()];
        let environment = ENVIRONMENTS[i % ENVIRONMENTS.len()];
        let region = REGIONS[(i / ENVIRONMENTS.len()) % REGIONS.len()];

        // Non-production fleets skew idle, production skews busy
        let roll: f64 = rng.random();
        let profile = match (environment, roll) {
            ("prod", r) if r < 0.25 => Profile::Idle,
            ("prod", r) if r < 0.6 => Profile::Moderate,
            ("prod", _) => Profile::Busy,
            (_, r) if r < 0.6 => Profile::Idle,
            (_, r) if r < 0.85 => Profile::Moderate,
            _ => Profile::Busy,
        };
        profiles.push(profile);

        instances.push(InstanceInfo {
            instance_ref: format!("inst-{:04}", i),
            cloud_instance_id: format!("i-synth-{:08x}", rng.random::<u32>()),
            hourly_cost: Some(hourly_cost),
            environment: Some(environment.to_string()),
            region: Some(region.to_string()),
            instance_type: Some(instance_type.to_string()),
            created_at: Some(start - Duration::days(rng.random_range(0..30))),
        });
    }

    let mut metrics = Vec::new();
    let mut ts = start;
    while ts <= config.end {
        for (instance, profile) in instances.iter().zip(&profiles) {
            let ((cpu_lo, cpu_hi), (mem_lo, mem_hi)) = profile.ranges();
            let cpu = round2(rng.random_range(cpu_lo..cpu_hi));
            let mem = round2(rng.random_range(mem_lo..mem_hi));
            let net_in = rng.random_range(10_000_000u64..50_000_000);
            let net_out = rng.random_range(10_000_000u64..50_000_000);

            metrics.push(MetricSample {
                instance_ref: instance.instance_ref.clone(),
                timestamp: ts,
                cpu_pct: maybe(&mut rng, config.missing_rate, cpu),
                mem_pct: maybe(&mut rng, config.missing_rate, mem),
                net_in_bytes: maybe(&mut rng, config.missing_rate, net_in),
                net_out_bytes: maybe(&mut rng, config.missing_rate, net_out),
            });
        }
        ts += config.sample_interval;
    }

    Snapshot { instances, metrics }
}

fn maybe<T>(rng: &mut StdRng, missing_rate: f64, value: T) -> Option<T> {
    if missing_rate > 0.0 && rng.random_bool(missing_rate.min(1.0)) {
        None
    } else {
        Some(value)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
