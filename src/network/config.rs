//! Protocol Configuration

use std::time::Duration;
use rand::{Rng, RngCore};

/// Timeouts and retry policy for the multiplayer clients.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// How long a guest waits for a join response.
    pub join_timeout: Duration,
    /// How long the host waits for every participant to show up before dealing.
    pub presence_timeout: Duration,
    /// Delay between game start and lobby record removal.
    pub lobby_teardown_delay: Duration,
    /// Attempts for a host commit (or a channel subscribe) before giving up.
    pub store_retry_attempts: u32,
    /// Base delay between commit attempts. Doubles per attempt, with jitter.
    pub store_retry_backoff: Duration,
    /// Lobbies older than this are not listed.
    pub lobby_listing_window: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            presence_timeout: Duration::from_secs(30),
            lobby_teardown_delay: Duration::from_secs(2),
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(100),
            lobby_listing_window: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl ProtocolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            join_timeout: env_millis("TRIAD_JOIN_TIMEOUT_MS").unwrap_or(defaults.join_timeout),
            presence_timeout: env_millis("TRIAD_PRESENCE_TIMEOUT_MS").unwrap_or(defaults.presence_timeout),
            lobby_teardown_delay: env_millis("TRIAD_LOBBY_TEARDOWN_MS").unwrap_or(defaults.lobby_teardown_delay),
            store_retry_attempts: std::env::var("TRIAD_STORE_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.store_retry_attempts),
            store_retry_backoff: env_millis("TRIAD_STORE_BACKOFF_MS").unwrap_or(defaults.store_retry_backoff),
            lobby_listing_window: defaults.lobby_listing_window,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, rng: &mut impl RngCore, attempt: u32) -> Duration {
        let base = self.store_retry_backoff.saturating_mul(1u32 << attempt.min(16));
        jittered_backoff(rng, base)
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse().ok().map(Duration::from_millis)
}

/// Equal jitter: the delay lands in `[backoff/2, backoff]`.
pub fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.join_timeout, Duration::from_secs(5));
        assert_eq!(config.store_retry_attempts, 3);
        assert_eq!(config.lobby_listing_window, Duration::from_secs(7200));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = jittered_backoff(&mut rng, Duration::from_millis(100));
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
        assert_eq!(jittered_backoff(&mut rng, Duration::from_millis(1)), Duration::from_millis(1));
    }

    #[test]
    fn test_retry_delay_grows() {
        let config = ProtocolConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let third = config.retry_delay(&mut rng, 2);
        assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));
    }
}
