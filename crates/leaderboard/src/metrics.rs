use prometheus::{IntCounter, Opts, Registry};

/// Leaderboard prometheus metrics.
pub struct LeaderboardMetrics {
    /// Submissions persisted successfully.
    pub submissions_accepted: IntCounter,
    /// Submissions rejected by validation.
    pub submissions_rejected: IntCounter,
    /// Replays stored alongside an accepted submission.
    pub replays_stored: IntCounter,
    /// Submissions that passed validation but failed to persist.
    pub persistence_failures: IntCounter,
}

impl LeaderboardMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let submissions_accepted = IntCounter::with_opts(Opts::new(
            "leaderboard_submissions_accepted_total",
            "Submissions persisted successfully",
        ))?;
        let submissions_rejected = IntCounter::with_opts(Opts::new(
            "leaderboard_submissions_rejected_total",
            "Submissions rejected by validation",
        ))?;
        let replays_stored = IntCounter::with_opts(Opts::new(
            "leaderboard_replays_stored_total",
            "Replays stored alongside an accepted submission",
        ))?;
        let persistence_failures = IntCounter::with_opts(Opts::new(
            "leaderboard_persistence_failures_total",
            "Submissions that passed validation but failed to persist",
        ))?;

        registry.register(Box::new(submissions_accepted.clone()))?;
        registry.register(Box::new(submissions_rejected.clone()))?;
        registry.register(Box::new(replays_stored.clone()))?;
        registry.register(Box::new(persistence_failures.clone()))?;

        Ok(Self {
            submissions_accepted,
            submissions_rejected,
            replays_stored,
            persistence_failures,
        })
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self {
            submissions_accepted: IntCounter::new("leaderboard_submissions_accepted_total", "accepted")
                .expect("valid metric name"),
            submissions_rejected: IntCounter::new("leaderboard_submissions_rejected_total", "rejected")
                .expect("valid metric name"),
            replays_stored: IntCounter::new("leaderboard_replays_stored_total", "replays")
                .expect("valid metric name"),
            persistence_failures: IntCounter::new("leaderboard_persistence_failures_total", "failures")
                .expect("valid metric name"),
        }
    }
}
