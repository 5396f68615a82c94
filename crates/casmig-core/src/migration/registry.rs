use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::types::{MigrationProgress, MigrationResult, RunId};

struct RunEntry {
    progress: watch::Receiver<MigrationProgress>,
    result: Option<MigrationResult>,
    cancel: CancellationToken,
}

/// Concurrent table of runs keyed by run id.
///
/// Holds the latest progress snapshot (through the watch receiver), the
/// terminal result once recorded, and the cancellation signal of each run.
#[derive(Default)]
pub struct MigrationRegistry {
    runs: DashMap<RunId, RunEntry>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        id: RunId,
        progress: watch::Receiver<MigrationProgress>,
        cancel: CancellationToken,
    ) {
        self.runs.insert(
            id,
            RunEntry {
                progress,
                result: None,
                cancel,
            },
        );
    }

    /// Store the terminal result. The first recorded result wins.
    pub(crate) fn record_result(&self, id: &RunId, result: MigrationResult) -> bool {
        match self.runs.get_mut(id) {
            Some(mut entry) if entry.result.is_none() => {
                entry.result = Some(result);
                true
            }
            _ => false,
        }
    }

    pub fn progress(&self, id: &RunId) -> Option<MigrationProgress> {
        self.runs.get(id).map(|entry| entry.progress.borrow().clone())
    }

    pub fn result(&self, id: &RunId) -> Option<MigrationResult> {
        self.runs.get(id).and_then(|entry| entry.result.clone())
    }

    /// Signal cancellation. `false` for unknown or already finished runs.
    pub fn cancel(&self, id: &RunId) -> bool {
        match self.runs.get(id) {
            Some(entry) if entry.result.is_none() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stream of snapshots starting with the latest one. Ends once the run
    /// has published its terminal snapshot and released the channel.
    pub fn subscribe(&self, id: &RunId) -> Option<WatchStream<MigrationProgress>> {
        self.runs
            .get(id)
            .map(|entry| WatchStream::new(entry.progress.clone()))
    }

    /// Every finished run, oldest start first.
    pub fn results(&self) -> Vec<(RunId, MigrationResult)> {
        let mut results: Vec<(RunId, MigrationResult)> = self
            .runs
            .iter()
            .filter_map(|entry| {
                entry
                    .result
                    .as_ref()
                    .map(|result| (entry.key().clone(), result.clone()))
            })
            .collect();
        results.sort_by_key(|(_, result)| result.start_time);
        results
    }

    /// Drop finished runs that ended more than `days` days ago.
    pub fn cleanup_old_migrations(&self, days: u32) -> usize {
        self.cleanup_ended_before(Utc::now() - Duration::days(i64::from(days)))
    }

    /// Drop finished runs whose end time is before `cutoff`. Runs still in
    /// flight are never removed.
    pub fn cleanup_ended_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, entry| match &entry.result {
            Some(result) => result.end_time.map_or(true, |end| end >= cutoff),
            None => true,
        });
        let removed = before.saturating_sub(self.runs.len());
        if removed > 0 {
            tracing::info!(removed, %cutoff, "removed old migration runs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MigrationStatus;

    fn finished(registry: &MigrationRegistry, ended: DateTime<Utc>) -> RunId {
        let id = RunId::generate();
        let (_tx, rx) = watch::channel(MigrationProgress::not_started(ended));
        registry.register(id.clone(), rx, CancellationToken::new());
        let mut result = MigrationResult::orchestration_failure(ended, "x");
        result.end_time = Some(ended);
        registry.record_result(&id, result);
        id
    }

    #[test]
    fn test_unknown_run() {
        let registry = MigrationRegistry::new();
        let id = RunId::from("missing");
        assert!(registry.progress(&id).is_none());
        assert!(registry.result(&id).is_none());
        assert!(registry.subscribe(&id).is_none());
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_first_result_wins() {
        let registry = MigrationRegistry::new();
        let id = finished(&registry, Utc::now());
        let mut other = MigrationResult::orchestration_failure(Utc::now(), "y");
        other.status = MigrationStatus::Completed;
        assert!(!registry.record_result(&id, other));
        assert_eq!(registry.result(&id).unwrap().status, MigrationStatus::Failed);
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_cleanup_keeps_recent_and_running() {
        let registry = MigrationRegistry::new();
        let now = Utc::now();
        let old = finished(&registry, now - Duration::days(10));
        let recent = finished(&registry, now - Duration::hours(1));
        let running = RunId::generate();
        let (_tx, rx) = watch::channel(MigrationProgress::not_started(now - Duration::days(30)));
        registry.register(running.clone(), rx, CancellationToken::new());

        assert_eq!(registry.cleanup_ended_before(now - Duration::days(7)), 1);
        assert!(registry.progress(&old).is_none());
        assert!(registry.result(&recent).is_some());
        assert!(registry.progress(&running).is_some());
        assert_eq!(registry.results().len(), 1);
    }

    #[test]
    fn test_cancel_signals_token() {
        let registry = MigrationRegistry::new();
        let id = RunId::generate();
        let token = CancellationToken::new();
        let (_tx, rx) = watch::channel(MigrationProgress::not_started(Utc::now()));
        registry.register(id.clone(), rx, token.clone());
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
    }
}
