//! Election configuration

use crate::error::ElectionError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lower bound of the election timeout window
pub const MIN_ELECTION_TIMEOUT_MS: u64 = 150;
/// Upper bound (exclusive) of the election timeout window
pub const MAX_ELECTION_TIMEOUT_MS: u64 = 300;

/// Heartbeat interval, kept well under the election timeout minimum
pub const HEARTBEAT_INTERVAL_MS: u64 = 80;

/// Timer and randomization settings for an elector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Draw election timeouts from `[min, max)` instead of `[0, max)`
    pub respect_min_timeout: bool,
    /// Fixed RNG seed; `None` seeds from OS entropy
    pub rng_seed: Option<u64>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: MIN_ELECTION_TIMEOUT_MS,
            election_timeout_max_ms: MAX_ELECTION_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            respect_min_timeout: false,
            rng_seed: None,
        }
    }
}

impl ElectionConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ElectionError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.election_timeout_min_ms == 0 {
            return Err(ElectionError::InvalidConfig(
                "election_timeout_min_ms must be positive".to_string(),
            ));
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(ElectionError::InvalidConfig(format!(
                "election timeout window [{}, {}) is empty",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(ElectionError::InvalidConfig(format!(
                "heartbeat interval {}ms must be positive and below the {}ms election timeout minimum",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        Ok(())
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Draw the next election timeout.
    ///
    /// The default window is `[0, max)`, so values below the configured
    /// minimum are possible unless `respect_min_timeout` is set.
    pub fn random_election_timeout<R: Rng>(&self, rng: &mut R) -> Duration {
        let low = if self.respect_min_timeout {
            self.election_timeout_min_ms
        } else {
            0
        };
        Duration::from_millis(rng.gen_range(low..self.election_timeout_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ElectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(80));
        assert!(config.heartbeat_interval() < config.election_timeout_min());
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        let config = ElectionConfig {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 300,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ElectionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_slow_heartbeat() {
        let config = ElectionConfig {
            heartbeat_interval_ms: 150,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_full_window_draws_below_min() {
        let config = ElectionConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut saw_below_min = false;
        for _ in 0..1000 {
            let timeout = config.random_election_timeout(&mut rng);
            assert!(timeout < config.election_timeout_max());
            if timeout < config.election_timeout_min() {
                saw_below_min = true;
            }
        }
        assert!(saw_below_min);
    }

    #[test]
    fn test_bounded_window_respects_min() {
        let config = ElectionConfig {
            respect_min_timeout: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let timeout = config.random_election_timeout(&mut rng);
            assert!(timeout >= config.election_timeout_min());
            assert!(timeout < config.election_timeout_max());
        }
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: ElectionConfig =
            serde_json::from_str(r#"{"respect_min_timeout": true, "rng_seed": 42}"#).unwrap();
        assert!(config.respect_min_timeout);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.election_timeout_max_ms, MAX_ELECTION_TIMEOUT_MS);
    }

    #[test]
    fn test_load_from_file() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("election.json");
        std::fs::write(&path, r#"{"election_timeout_min_ms": 200, "heartbeat_interval_ms": 50}"#)?;

        let config = ElectionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.election_timeout_min(), Duration::from_millis(200));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(50));
        assert_eq!(config.election_timeout_max_ms, MAX_ELECTION_TIMEOUT_MS);
        Ok(())
    }

    #[test]
    fn test_load_rejects_invalid_file() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("election.json");
        std::fs::write(&path, r#"{"election_timeout_min_ms": 400}"#)?;
        assert!(matches!(
            ElectionConfig::from_json_file(&path),
            Err(ElectionError::InvalidConfig(_))
        ));

        std::fs::write(&path, "not json")?;
        assert!(matches!(
            ElectionConfig::from_json_file(&path),
            Err(ElectionError::Config(_))
        ));

        assert!(matches!(
            ElectionConfig::from_json_file(dir.path().join("missing.json")),
            Err(ElectionError::Io(_))
        ));
        Ok(())
    }
}
