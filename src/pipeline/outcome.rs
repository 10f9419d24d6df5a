//! Per-outcome counters shared between the sink, the transforms, and the monitor.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Concurrent `outcome label → count` table.
#[derive(Debug, Default)]
pub struct OutcomeStats {
    counts: DashMap<String, u64>,
}

impl OutcomeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one occurrence of `label`.
    pub fn record(&self, label: &str) {
        if let Some(mut count) = self.counts.get_mut(label) {
            *count += 1;
            return;
        }
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).map_or(0, |c| *c)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    /// Sorted copy of the table.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let stats = OutcomeStats::new();
        stats.record("OK");
        stats.record("OK");
        stats.record("NXDOMAIN");

        assert_eq!(stats.get("OK"), 2);
        assert_eq!(stats.get("NXDOMAIN"), 1);
        assert_eq!(stats.get("Timeout"), 0);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let stats = OutcomeStats::new();
        for label in ["Timeout", "NXDOMAIN", "OK", "OK"] {
            stats.record(label);
        }
        let keys: Vec<_> = stats.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["NXDOMAIN", "OK", "Timeout"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records() {
        let stats = OutcomeStats::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    stats.record("OK");
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(stats.get("OK"), 8000);
    }
}
