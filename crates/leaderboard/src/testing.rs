//! In-memory leaderboard for unit and integration testing.
//!
//! Wires a coordinator and a ranking engine to one shared store with
//! unregistered metrics, so tests can submit and query without a database.

use std::sync::Arc;

use crate::config::LeaderboardConfig;
use crate::coordinator::SubmissionCoordinator;
use crate::metrics::LeaderboardMetrics;
use crate::ranking::RankingEngine;
use crate::storage::memory::MemoryStore;
use crate::store::LeaderboardStore;

/// A leaderboard backed by a [`MemoryStore`] (or any other store) for tests.
///
/// # Example
///
/// ```ignore
/// let lb = TestLeaderboard::new();
/// let record = lb.coordinator().submit(Submission::new(3, 45.2, "Ada")).await?;
/// let board = lb.engine().stage_leaderboard(3).await?;
/// assert_eq!(board.records[0].record.id, record.id);
/// ```
pub struct TestLeaderboard {
    store: Arc<dyn LeaderboardStore>,
    memory: Option<MemoryStore>,
    coordinator: SubmissionCoordinator,
    engine: RankingEngine,
    metrics: Arc<LeaderboardMetrics>,
}

impl TestLeaderboard {
    /// In-memory leaderboard with default configuration.
    pub fn new() -> Self {
        Self::with_config(LeaderboardConfig::default())
    }

    /// In-memory leaderboard with custom configuration.
    pub fn with_config(config: LeaderboardConfig) -> Self {
        let memory = MemoryStore::new();
        let mut harness = Self::with_store(Arc::new(memory.clone()), config);
        harness.memory = Some(memory);
        harness
    }

    /// Leaderboard over an arbitrary store, e.g. a SQLite in-memory database
    /// or a wrapper that injects failures.
    pub fn with_store(store: Arc<dyn LeaderboardStore>, config: LeaderboardConfig) -> Self {
        config
            .validate()
            .expect("TestLeaderboard config should be valid");
        let config = Arc::new(config);
        let metrics = Arc::new(LeaderboardMetrics::unregistered());
        let coordinator = SubmissionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&metrics),
        );
        let engine = RankingEngine::new(Arc::clone(&store), config);

        Self {
            store,
            memory: None,
            coordinator,
            engine,
            metrics,
        }
    }

    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.coordinator
    }

    pub fn engine(&self) -> &RankingEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn LeaderboardStore> {
        &self.store
    }

    /// The backing memory store, if the harness created one.
    pub fn memory(&self) -> Option<&MemoryStore> {
        self.memory.as_ref()
    }

    pub fn metrics(&self) -> &LeaderboardMetrics {
        &self.metrics
    }
}

impl Default for TestLeaderboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Submission;

    #[tokio::test]
    async fn submit_then_read_back() {
        let lb = TestLeaderboard::new();
        let record = lb
            .coordinator()
            .submit(Submission::new(3, 45.2, "Ada"))
            .await
            .unwrap();

        let board = lb.engine().stage_leaderboard(3).await.unwrap();
        assert_eq!(board.records.len(), 1);
        assert_eq!(board.records[0].record.id, record.id);
        assert_eq!(lb.memory().unwrap().record_count(), 1);
        assert_eq!(lb.metrics().submissions_accepted.get(), 1);
    }

    #[tokio::test]
    async fn custom_config_limits_leaderboard() {
        let lb = TestLeaderboard::with_config(LeaderboardConfig {
            leaderboard_size: 2,
            ..Default::default()
        });
        for (name, time) in [("a", 3.0), ("b", 1.0), ("c", 2.0)] {
            lb.coordinator()
                .submit(Submission::new(1, time, name))
                .await
                .unwrap();
        }

        let board = lb.engine().stage_leaderboard(1).await.unwrap();
        let names: Vec<_> = board
            .records
            .iter()
            .map(|r| r.record.player_name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    #[should_panic(expected = "TestLeaderboard config should be valid")]
    fn invalid_config_panics() {
        let _ = TestLeaderboard::with_config(LeaderboardConfig {
            leaderboard_size: 0,
            ..Default::default()
        });
    }
}
