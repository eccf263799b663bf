use url::Url;

use super::ConfigError;

/// Validate the realtime endpoint URL.
///
/// The URL must parse, use the `ws` or `wss` scheme and carry a host.
pub fn validate_endpoint_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        key: "url",
        reason: format!("'{}' is not a valid URL: {}", value, e),
    })?;

    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ConfigError::Invalid {
            key: "url",
            reason: format!("scheme must be ws or wss, got '{}'", url.scheme()),
        });
    }

    if url.host_str().is_none() {
        return Err(ConfigError::Invalid {
            key: "url",
            reason: "URL must have a host".to_string(),
        });
    }

    Ok(url)
}

/// Validate the sampling temperature.
pub fn validate_temperature(temperature: Option<f32>) -> Result<(), ConfigError> {
    match temperature {
        Some(t) if !(0.6..=1.2).contains(&t) => Err(ConfigError::Invalid {
            key: "temperature",
            reason: format!("must be between 0.6 and 1.2, got {}", t),
        }),
        _ => Ok(()),
    }
}

/// Validate that the model name is not blank.
pub fn validate_model(model: &str) -> Result<(), ConfigError> {
    if model.trim().is_empty() {
        return Err(ConfigError::Invalid {
            key: "model",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
