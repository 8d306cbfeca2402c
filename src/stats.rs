use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::registry::RegistryOperation;

/// Metrics sink for failure counters
///
/// Implementations must tolerate concurrent increments from many callers.
pub trait Stats: Send + Sync {
    fn inc_count(&self, name: &str);
}

/// Name of the counter incremented when `operation` fails for `repository`
///
/// e.g. "ecr.putimage.team/web.failure"
pub fn failure_counter(operation: RegistryOperation, repository: &str) -> String {
    format!("ecr.{}.{}.failure", operation.metric_key(), repository)
}

/// Forwards counters to the `metrics` facade
///
/// Counters are dropped unless the host application installs a recorder.
#[derive(Debug, Clone, Default)]
pub struct MetricsStats {
    prefix: Option<String>,
}

impl MetricsStats {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }
}

impl Stats for MetricsStats {
    fn inc_count(&self, name: &str) {
        let name = match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        metrics::counter!(name).increment(1);
    }
}

/// Emits each increment as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStats;

impl Stats for LogStats {
    fn inc_count(&self, name: &str) {
        tracing::warn!(counter = %name, "Incremented failure counter");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl Stats for NoopStats {
    fn inc_count(&self, _name: &str) {}
}

/// Keeps counters in memory so they can be inspected
#[derive(Debug, Default)]
pub struct MemoryStats {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.snapshot().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.snapshot().values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Stats for MemoryStats {
    fn inc_count(&self, name: &str) {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_failure_counter_names() {
        assert_eq!(
            failure_counter(RegistryOperation::BatchGetImage, "web"),
            "ecr.batchget.web.failure"
        );
        assert_eq!(
            failure_counter(RegistryOperation::DescribeImages, "team/web"),
            "ecr.descimg.team/web.failure"
        );
    }

    #[test]
    fn test_memory_stats_counts() {
        let stats = MemoryStats::new();
        stats.inc_count("a");
        stats.inc_count("a");
        stats.inc_count("b");

        assert_eq!(stats.count("a"), 2);
        assert_eq!(stats.count("b"), 1);
        assert_eq!(stats.count("c"), 0);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_memory_stats_concurrent_increments() {
        let stats = Arc::new(MemoryStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.inc_count("shared");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.count("shared"), 800);
    }

    #[test]
    fn test_metrics_stats_ignores_empty_prefix() {
        assert!(MetricsStats::new(Some(String::new())).prefix.is_none());
        // No recorder installed: must not panic
        MetricsStats::new(Some("cd".to_string())).inc_count("ecr.putimage.web.failure");
    }
}
