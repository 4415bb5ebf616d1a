use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Evaluator tick: pending-breach checks and rule reloads.
    #[serde(default = "default_alert_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_alert_tick_secs(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_alert_tick_secs() -> u64 {
    30
}

fn default_feed_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            retention: RetentionConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config '{path}': {e}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.retention.days, 30);
        assert_eq!(config.alert.tick_secs, 30);
    }

    #[test]
    fn partial_config_overrides() {
        let config: Config = toml::from_str(
            r#"
            http_port = 9000

            [retention]
            days = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.retention.days, 7);
        assert_eq!(config.alert.feed_capacity, 1024);
    }
}
