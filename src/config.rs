use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.smogon.com/stats";

/// Ladder rating cutoff of the published files (`...-1760.json`)
pub const DEFAULT_RATING: u32 = 1760;

/// Tunables for locating and fetching snapshots
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stats root, without trailing slash
    pub base_url: String,
    pub rating: u32,
    pub generation: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rating: DEFAULT_RATING,
            generation: "gen9".to_string(),
            user_agent: concat!("smogon-usage-to-sqlite/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl PipelineConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(10), Duration::from_secs(8));
        assert_eq!(config.backoff_for(40), Duration::from_secs(8));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = PipelineConfig::default().with_base_url("http://localhost/stats/");
        assert_eq!(config.base_url, "http://localhost/stats");
    }
}
