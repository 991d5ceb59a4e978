//! Append-only logs shared between producers and the aggregator.

use std::sync::Arc;

use kbload_core::{ResourceSample, TaskOutcome};
use parking_lot::Mutex;

/// Lock-protected, append-only buffer scoped to a single run.
///
/// Producers only ever push; readers take a snapshot. Entries are never
/// updated in place.
#[derive(Debug)]
pub struct AppendLog<T> {
    entries: Mutex<Vec<T>>,
}

/// Outcomes recorded by virtual users and lifecycle steps.
pub type OutcomeSink = AppendLog<TaskOutcome>;

/// Samples recorded by the resource sampler.
pub type SampleSink = AppendLog<ResourceSample>;

impl<T: Clone> AppendLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn record(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of everything recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    /// Fold over the entries without cloning them.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.entries.lock())
    }
}

impl<T: Clone> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kbload_core::OperationKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let sink = OutcomeSink::shared();
        let mut handles = Vec::new();

        for worker in 0..16 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    sink.record(TaskOutcome::succeeded(
                        OperationKind::Insert,
                        Utc::now(),
                        Duration::from_micros(worker * 1000 + i),
                        200,
                        None,
                    ));
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(sink.len(), 16 * 250);
        assert_eq!(sink.with_entries(|e| e.iter().filter(|o| o.success).count()), 4000);
    }
}
