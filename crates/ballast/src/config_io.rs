//! YAML configuration loading.
//!
//! Parsing is strict about shape (serde) and value ranges
//! ([`GuardianConfig::validate`]); a missing document or missing keys
//! fall back to defaults.

use std::error::Error;
use std::fmt;

use ballast_core::config::{ConfigError, GuardianConfig};

/// Failure to load a configuration document.
#[derive(Debug)]
pub enum ConfigLoadError {
    /// The document is not valid YAML for the config shape.
    Parse(serde_yaml::Error),
    /// The document parsed but failed validation.
    Invalid(ConfigError),
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Invalid(e) => write!(f, "config invalid: {e}"),
        }
    }
}

impl Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Invalid(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ConfigLoadError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e)
    }
}

/// Parse and validate a YAML configuration document. An empty
/// document yields the defaults.
pub fn load_config_str(document: &str) -> Result<GuardianConfig, ConfigLoadError> {
    let config: GuardianConfig = if document.trim().is_empty() {
        GuardianConfig::default()
    } else {
        serde_yaml::from_str(document).map_err(ConfigLoadError::Parse)?
    };
    config.validate()?;
    Ok(config)
}
