//! Raft configuration (timeouts and protocol policy flags).

use std::time::Duration;

/// Raft configuration.
///
/// The core only reads the policy flags (via the state view); the timeouts
/// are for the timer collaborator that raises `ElectionTimeout` and
/// `HeartbeatTimeout` messages.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Shard ID for observability events (default: 0).
    /// Used to identify this Raft group in multi-group deployments.
    pub shard_id: u32,

    /// Heartbeat interval (leader → followers).
    ///
    /// Must be < election_timeout_min to prevent spurious elections.
    ///
    /// Default: 150ms
    pub heartbeat_interval: Duration,

    /// Minimum election timeout (follower → candidate).
    ///
    /// Randomized between [min, max] to prevent split votes.
    ///
    /// Default: 300ms
    pub election_timeout_min: Duration,

    /// Maximum election timeout.
    ///
    /// Default: 600ms
    pub election_timeout_max: Duration,

    /// Run a non-disruptive pre-election before bumping the term.
    ///
    /// Default: true
    pub supports_pre_voting: bool,

    /// Never stand for election (still votes for others).
    ///
    /// Default: false
    pub refuses_to_be_leader: bool,

    /// Capacity of the driver's inbound message queue.
    ///
    /// Default: 1024
    pub inbox_capacity: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            heartbeat_interval: Duration::from_millis(150),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(600),
            supports_pre_voting: true,
            refuses_to_be_leader: false,
            inbox_capacity: 1024,
        }
    }
}

impl RaftConfig {
    /// Validate configuration (ensure invariants hold).
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(format!(
                "heartbeat_interval ({:?}) must be < election_timeout_min ({:?})",
                self.heartbeat_interval, self.election_timeout_min
            ));
        }

        if self.election_timeout_min >= self.election_timeout_max {
            return Err(format!(
                "election_timeout_min ({:?}) must be < election_timeout_max ({:?})",
                self.election_timeout_min, self.election_timeout_max
            ));
        }

        if self.inbox_capacity == 0 {
            return Err("inbox_capacity must be > 0".to_string());
        }

        Ok(())
    }

    /// Get randomized election timeout.
    ///
    /// Returns a random duration between [election_timeout_min, election_timeout_max].
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;
        let min_ms = self.election_timeout_min.as_millis() as u64;
        let max_ms = self.election_timeout_max.as_millis() as u64;
        let random_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
        Duration::from_millis(random_ms)
    }
}
