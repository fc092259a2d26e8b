use beacon_exposures::ExposureConfig;
use beacon_observe::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Final configuration with defaults applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub exposures: ExposureConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use beacon_observe::LogFormat;

    #[test]
    fn test_default_values() {
        let config = BeaconConfig::default();
        assert_eq!(config.exposures.buffer_capacity, 1000);
        assert_eq!(config.exposures.flush_interval, Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sections_parse_independently() {
        let config: BeaconConfig = toml::from_str(
            r#"
            [exposures]
            flush_threshold = 10

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.exposures.flush_threshold, 10);
        assert_eq!(config.exposures.buffer_capacity, 1000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = BeaconConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: BeaconConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
