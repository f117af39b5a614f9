use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig, SeedConfig};
use crate::ConfigError;
use url::Url;

/// Largest number of ids a single batched profile lookup accepts
pub const MAX_PROFILE_BATCH: usize = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    validate_seed_config(&config.seeds)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.profile_batch_size < 1 || config.profile_batch_size > MAX_PROFILE_BATCH {
        return Err(ConfigError::Validation(format!(
            "profile-batch-size must be between 1 and {}, got {}",
            MAX_PROFILE_BATCH, config.profile_batch_size
        )));
    }

    if config.progress_interval < 1 {
        return Err(ConfigError::Validation(
            "progress-interval must be >= 1".to_string(),
        ));
    }

    if config.max_task_attempts < 1 || config.max_task_attempts > 100 {
        return Err(ConfigError::Validation(format!(
            "max-task-attempts must be between 1 and 100, got {}",
            config.max_task_attempts
        )));
    }

    Ok(())
}

/// Validates API client configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if let Some(token) = &config.bearer_token {
        if token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "bearer-token cannot be blank; omit it instead".to_string(),
            ));
        }
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    if config.page_size < 1 || config.page_size > 5000 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 5000, got {}",
            config.page_size
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.export_dir.is_empty() {
        return Err(ConfigError::Validation(
            "export-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates seed configuration
fn validate_seed_config(config: &SeedConfig) -> Result<(), ConfigError> {
    if let Some(id) = config.ids.iter().find(|id| **id <= 0) {
        return Err(ConfigError::Validation(format!(
            "Seed ids must be positive, got {}",
            id
        )));
    }

    if let Some(path) = &config.source_file {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "seeds source-file cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}
