use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_generation(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if url::Url::parse(&upstream.base_url).is_err() {
        return Err(validation_err(format!(
            "upstream.base_url '{}' is not a valid URL",
            upstream.base_url
        )));
    }
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err("upstream.api_key cannot be empty"));
    }
    if upstream.default_model.trim().is_empty() {
        return Err(validation_err("upstream.default_model cannot be empty"));
    }
    if !upstream.models.is_empty() && !upstream.models.contains(&upstream.default_model) {
        return Err(validation_err(format!(
            "upstream.default_model '{}' is not listed in upstream.models",
            upstream.default_model
        )));
    }
    if http::HeaderName::from_bytes(upstream.mode_header.as_bytes()).is_err() {
        return Err(validation_err(format!(
            "upstream.mode_header '{}' is not a valid header name",
            upstream.mode_header
        )));
    }
    if let Some(proxy) = upstream.proxy.as_deref() {
        let lower = proxy.to_ascii_lowercase();
        let known_scheme = lower.starts_with("http://") || lower.starts_with("https://");
        if !known_scheme || url::Url::parse(proxy).is_err() {
            return Err(validation_err(format!(
                "upstream.proxy '{proxy}' must be an http(s) URL"
            )));
        }
    }
    Ok(())
}

fn validate_generation(config: &AppConfig) -> Result<(), ConfigError> {
    let generation = &config.generation;
    if generation.extract_every_chunks == 0 {
        return Err(validation_err(
            "generation.extract_every_chunks must be greater than 0",
        ));
    }

    let table = &generation.progress_table;
    let Some(first) = table.first() else {
        return Err(validation_err("generation.progress_table cannot be empty"));
    };
    if first.threshold != 0 {
        return Err(validation_err(
            "generation.progress_table must start at threshold 0",
        ));
    }
    for pair in table.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.threshold <= prev.threshold {
            return Err(validation_err(
                "generation.progress_table thresholds must be strictly ascending",
            ));
        }
        if next.percent < prev.percent || next.phase < prev.phase {
            return Err(validation_err(
                "generation.progress_table phases and percentages must not decrease",
            ));
        }
    }
    if table.iter().any(|step| step.percent >= 100) {
        return Err(validation_err(
            "generation.progress_table percentages must stay below 100",
        ));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeaturesConfig, GenerationConfig, ServerConfig, UpstreamConfig};
    use crate::progress::{Phase, ProgressStep};

    fn base_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: "https://api.example.com/v1".to_string(),
                api_key: "secret".to_string(),
                default_model: "site-model".to_string(),
                models: vec!["site-model".to_string()],
                mode_header: "x-response-mode".to_string(),
                proxy: None,
            },
            generation: GenerationConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = base_config();
        config.upstream.base_url = "ftp://example.com".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_default_model_not_in_list() {
        let mut config = base_config();
        config.upstream.default_model = "other".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_invalid_mode_header() {
        let mut config = base_config();
        config.upstream.mode_header = "bad header".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_unsorted_progress_table() {
        let mut config = base_config();
        config.generation.progress_table = vec![
            ProgressStep::new(0, Phase::Analyzing, 5),
            ProgressStep::new(10, Phase::Building, 30),
            ProgressStep::new(10, Phase::Styling, 60),
        ];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_progress_table_not_starting_at_zero() {
        let mut config = base_config();
        config.generation.progress_table = vec![ProgressStep::new(3, Phase::Analyzing, 5)];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_progress_table_reaching_hundred() {
        let mut config = base_config();
        config.generation.progress_table = vec![
            ProgressStep::new(0, Phase::Analyzing, 5),
            ProgressStep::new(10, Phase::Finalizing, 100),
        ];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut config = base_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_extract_cadence() {
        let mut config = base_config();
        config.generation.extract_every_chunks = 0;
        assert!(validate_config(&config).is_err());
    }
}
