//! Engine configuration, populated from environment variables.

use std::time::Duration;

/// Runtime configuration for an [`Engine`](crate::Engine).
///
/// All fields have defaults, so an engine can be started with zero
/// configuration.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `TRUSTMESH_THROTTLE_MS` | `1000` | Notification coalescing interval per target |
/// | `TRUSTMESH_MAX_PENDING_PER_TARGET` | `64` | Buffered reactions per unknown target |
/// | `TRUSTMESH_MAX_PENDING_TARGETS` | `1024` | Unknown targets tracked at once |
/// | `TRUSTMESH_FEED_PAGE` | `50` | Default feed batch size |
/// | `TRUSTMESH_LIVE_CAPACITY` | `256` | Broadcast buffer per live query |
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum spacing between two notifications for the same target.
    pub throttle: Duration,

    /// How many reactions to hold for a target event that has not arrived.
    pub max_pending_per_target: usize,

    /// How many distinct unknown targets to hold reactions for. The target
    /// that has waited longest is dropped first.
    pub max_pending_targets: usize,

    /// Batch size used by `FeedCursor::load_default`.
    pub feed_page: usize,

    /// Events buffered per live query for slow handle readers.
    pub live_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(1000),
            max_pending_per_target: 64,
            max_pending_targets: 1024,
            feed_page: 50,
            live_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Populate config from environment variables, applying defaults where
    /// absent or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            throttle: env_parse("TRUSTMESH_THROTTLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.throttle),
            max_pending_per_target: env_parse("TRUSTMESH_MAX_PENDING_PER_TARGET")
                .unwrap_or(defaults.max_pending_per_target),
            max_pending_targets: env_parse("TRUSTMESH_MAX_PENDING_TARGETS")
                .unwrap_or(defaults.max_pending_targets),
            feed_page: env_parse("TRUSTMESH_FEED_PAGE").unwrap_or(defaults.feed_page),
            live_capacity: env_parse::<usize>("TRUSTMESH_LIVE_CAPACITY")
                .map(|c| c.max(1))
                .unwrap_or(defaults.live_capacity),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = EngineConfig::default();
        assert_eq!(c.throttle, Duration::from_secs(1));
        assert!(c.live_capacity > 0);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        std::env::set_var("TRUSTMESH_THROTTLE_MS", "250");
        std::env::set_var("TRUSTMESH_FEED_PAGE", "not-a-number");
        let c = EngineConfig::from_env();
        std::env::remove_var("TRUSTMESH_THROTTLE_MS");
        std::env::remove_var("TRUSTMESH_FEED_PAGE");

        assert_eq!(c.throttle, Duration::from_millis(250));
        assert_eq!(c.feed_page, 50);
    }
}
