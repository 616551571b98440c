use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `REPLAY_INSIGHTS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub insights: InsightsConfig,
}

/// Tunables for the analytic entry points.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightsConfig {
    /// Maximum number of events per session considered by the journey graph.
    #[serde(default = "default_journey_depth")]
    pub journey_depth: u32,
    /// Number of top transitions requested from the row source.
    #[serde(default = "default_journey_limit")]
    pub journey_limit: u32,
    /// Number of features kept in the popularity table.
    #[serde(default = "default_popularity_limit")]
    pub popularity_limit: usize,
    #[serde(default = "default_journey_lookback_days")]
    pub journey_lookback_days: i64,
    #[serde(default = "default_cohort_lookback_days")]
    pub cohort_lookback_days: i64,
    /// Feature used by feature acquisition when none is given and the
    /// row source cannot suggest one.
    #[serde(default = "default_feature")]
    pub default_feature: String,
}

fn default_journey_depth() -> u32 {
    5
}
fn default_journey_limit() -> u32 {
    20
}
fn default_popularity_limit() -> usize {
    7
}
fn default_journey_lookback_days() -> i64 {
    1
}
fn default_cohort_lookback_days() -> i64 {
    70
}
fn default_feature() -> String {
    "/".to_string()
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            journey_depth: default_journey_depth(),
            journey_limit: default_journey_limit(),
            popularity_limit: default_popularity_limit(),
            journey_lookback_days: default_journey_lookback_days(),
            cohort_lookback_days: default_cohort_lookback_days(),
            default_feature: default_feature(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            insights: InsightsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("REPLAY_INSIGHTS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.insights.journey_depth, 5);
        assert_eq!(config.insights.journey_limit, 20);
        assert_eq!(config.insights.popularity_limit, 7);
        assert_eq!(config.insights.journey_lookback_days, 1);
        assert_eq!(config.insights.cohort_lookback_days, 70);
        assert_eq!(config.insights.default_feature, "/");
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"insights": {"journey_limit": 50}}"#).unwrap();
        assert_eq!(config.insights.journey_limit, 50);
        assert_eq!(config.insights.journey_depth, 5);

        let empty: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.insights.popularity_limit, 7);
    }

    #[test]
    fn test_load_from_environment() {
        // Overrides may be set in the process environment; only loading is checked.
        assert!(AppConfig::load().is_ok());
    }
}
